//! Incremental parser for the backend's SSE-style chat stream.
//!
//! The `/chat` endpoint emits newline-delimited lines; lines prefixed `data: ` carry
//! either a JSON object `{content, error?}` or the literal terminator `[DONE]`.
//! Chunks may split a line anywhere, so the parser buffers across pushes and only
//! yields once a full line is assembled.

use serde::Deserialize;

/// One payload from the stream: a content delta and an optional error flag.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub error: bool,
}

/// A parsed frame: either an event payload or the end-of-stream marker.
/// `Done` is terminal; it is never also yielded as an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(StreamEvent),
    Done,
}

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// Reassembles lines from arbitrary byte chunks and classifies them into frames.
///
/// Not restartable: one parser per transport. After `Done` all further input
/// is discarded.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
    done: bool,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the terminal marker has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one chunk; returns the frames completed by it, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }
        self.buffer.extend_from_slice(chunk);
        while let Some(i) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..i).collect();
            self.buffer.drain(..1);
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches('\r');
            if let Some(frame) = self.classify(line) {
                let terminal = frame == Frame::Done;
                frames.push(frame);
                if terminal {
                    self.done = true;
                    self.buffer.clear();
                    break;
                }
            }
        }
        frames
    }

    /// Classify one complete line. Lines without the `data: ` prefix are ignored,
    /// as are payloads that fail to parse as JSON (one malformed frame must not
    /// lose the rest of the answer).
    fn classify(&self, line: &str) -> Option<Frame> {
        let data = line.strip_prefix(DATA_PREFIX)?;
        if data == DONE_MARKER {
            return Some(Frame::Done);
        }
        match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => {
                // Some backends wrap the terminator in a JSON envelope.
                if event.content.as_deref() == Some(DONE_MARKER) {
                    Some(Frame::Done)
                } else {
                    Some(Frame::Event(event))
                }
            }
            Err(e) => {
                log::warn!("skipping malformed stream frame: {}", e);
                None
            }
        }
    }
}
