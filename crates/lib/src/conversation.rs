//! Conversation state machine: the ordered message log, the pending assistant
//! slot, the active dataset, and the current analysis result.
//!
//! One turn runs `AwaitingUpload?` -> `AwaitingAnalysis` -> `AwaitingChatStream`
//! strictly in sequence; `submit_turn` takes `&mut self` so a second turn cannot
//! interleave with an unsealed pending message. All shared pointers (log, active
//! dataset, current result) are mutated only here — the backend clients are
//! stateless request executors.

use crate::api::{
    classify_result, AnalysisResult, AnalyzeRequest, Backend, ChatRequest, Dataset,
    HistoryMessage, PendingFile, ResultShape,
};
use crate::cache::ResultCache;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Notify;

/// Bounded context window sent to `/analyze` and `/chat`: the most recent
/// messages preceding the turn, oldest first.
pub const HISTORY_WINDOW: usize = 10;

const NO_DATASET_MESSAGE: &str =
    "Please upload a CSV file or select a previously uploaded dataset before asking questions.";
const FILE_ONLY_PROMPT: &str = "File uploaded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Read-only snapshot of an uploaded file's descriptive attributes, detached
/// from the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl From<&PendingFile> for FileMeta {
    fn from(file: &PendingFile) -> Self {
        Self {
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            size_bytes: file.bytes.len() as u64,
        }
    }
}

/// One message in the log. The in-flight assistant placeholder is the only
/// message mutated after creation, and it is sealed exactly once.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub file: Option<FileMeta>,
    pub is_error: bool,
}

impl Message {
    fn user(content: impl Into<String>, file: Option<FileMeta>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            file,
            is_error: false,
        }
    }

    fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            file: None,
            is_error: false,
        }
    }

    fn assistant_error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(content)
        }
    }

    /// Empty assistant slot appended before any network call resolves, so the
    /// front end can show a loading indicator deterministically.
    fn placeholder() -> Self {
        Self::assistant("")
    }
}

/// The dataset used for the next analysis call absent a new upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHandle {
    pub id: String,
    pub filename: String,
    pub row_count: u64,
    pub columns: Vec<String>,
}

impl From<&Dataset> for DatasetHandle {
    fn from(d: &Dataset) -> Self {
        Self {
            id: d.id.clone(),
            filename: d.filename.clone(),
            row_count: d.row_count,
            columns: d.columns.clone(),
        }
    }
}

/// Where the in-flight turn currently is. `Idle` means no turn is in flight
/// and the send control may be enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingUpload,
    AwaitingAnalysis,
    AwaitingChatStream,
}

/// What `submit_turn` did with the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Empty submission: no log change, no network calls.
    Ignored,
    /// No dataset available: instruction message appended, no network calls.
    Rejected,
    /// The turn ran to a sealed assistant message (possibly an error one).
    Completed,
}

/// Owns the message log and the active dataset/result pointers. One instance
/// per session; backends are passed in per call and hold no state.
pub struct Conversation {
    messages: Vec<Message>,
    active_dataset: Option<DatasetHandle>,
    known_datasets: Vec<Dataset>,
    current_result: Option<AnalysisResult>,
    sidebar_visible: bool,
    state: TurnState,
    cancel: Arc<Notify>,
    cache: Option<ResultCache>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            active_dataset: None,
            known_datasets: Vec::new(),
            current_result: None,
            sidebar_visible: false,
            state: TurnState::Idle,
            cancel: Arc::new(Notify::new()),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn active_dataset(&self) -> Option<&DatasetHandle> {
        self.active_dataset.as_ref()
    }

    pub fn known_datasets(&self) -> &[Dataset] {
        &self.known_datasets
    }

    pub fn current_result(&self) -> Option<&AnalysisResult> {
        self.current_result.as_ref()
    }

    pub fn sidebar_visible(&self) -> bool {
        self.sidebar_visible
    }

    pub fn hide_sidebar(&mut self) {
        self.sidebar_visible = false;
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// True while a turn is between submission and its sealed reply; the send
    /// control should be disabled.
    pub fn in_flight(&self) -> bool {
        self.state != TurnState::Idle
    }

    /// Abort the in-flight chat stream, if any. The stream consumer seals the
    /// pending message with whatever partial content exists; it is never left
    /// pending. A no-op when nothing is streaming.
    pub fn abort_stream(&self) {
        self.cancel.notify_waiters();
    }

    /// Handle for aborting from another task while `submit_turn` holds the
    /// exclusive borrow (e.g. a stop button). Waking it has the same effect
    /// as [`Conversation::abort_stream`].
    pub fn cancel_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.cancel)
    }

    /// Adopt a previously uploaded dataset as active. Pure local transition:
    /// no network call, prior messages untouched, one informational message.
    pub fn select_dataset(&mut self, dataset: &Dataset) {
        self.active_dataset = Some(DatasetHandle::from(dataset));
        self.messages.push(Message::assistant(format!(
            "Now using dataset \"{}\" ({} rows). Ask away.",
            dataset.filename, dataset.row_count
        )));
    }

    /// Refresh the known-datasets list. Best-effort: failure is logged and
    /// changes nothing. A successful refresh also backfills row count and
    /// columns on the active handle (upload responses carry neither).
    pub async fn refresh_datasets<B: Backend + ?Sized>(&mut self, backend: &B) {
        match backend.list_datasets().await {
            Ok(datasets) => {
                if let Some(active) = self.active_dataset.as_mut() {
                    if let Some(d) = datasets.iter().find(|d| d.id == active.id) {
                        active.row_count = d.row_count;
                        active.columns = d.columns.clone();
                        if active.filename.is_empty() {
                            active.filename = d.filename.clone();
                        }
                    }
                }
                self.known_datasets = datasets;
            }
            Err(e) => log::warn!("dataset list refresh failed: {}", e),
        }
    }

    /// Run one full turn: append the user message and the pending assistant
    /// slot, then upload (when a file is attached), analyze, and consume the
    /// explanation stream, sealing the pending message exactly once.
    ///
    /// Every failure degrades to an in-chat error message; nothing here is
    /// fatal to the session and the next turn starts clean.
    pub async fn submit_turn<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        prompt: &str,
        file: Option<PendingFile>,
        mut on_chunk: Option<&mut (dyn for<'a> FnMut(&'a str) + Send)>,
    ) -> TurnStatus {
        let prompt = prompt.trim();
        if prompt.is_empty() && file.is_none() {
            return TurnStatus::Ignored;
        }
        if self.active_dataset.is_none() && file.is_none() {
            self.messages.push(Message::user(prompt, None));
            self.messages.push(Message::assistant_error(NO_DATASET_MESSAGE));
            return TurnStatus::Rejected;
        }

        let turn_start = self.messages.len();
        let user_content = if prompt.is_empty() { FILE_ONLY_PROMPT } else { prompt };
        self.messages.push(Message::user(
            user_content,
            file.as_ref().map(FileMeta::from),
        ));
        self.messages.push(Message::placeholder());

        if let Some(ref pending_file) = file {
            self.state = TurnState::AwaitingUpload;
            match backend.upload(pending_file).await {
                Ok(resp) => {
                    log::info!("uploaded dataset {} ({})", resp.id, resp.filename);
                    // Upload-then-immediately-usable: the new dataset serves
                    // this same turn's analyze call.
                    self.active_dataset = Some(DatasetHandle {
                        id: resp.id,
                        filename: resp.filename,
                        row_count: 0,
                        columns: Vec::new(),
                    });
                    self.refresh_datasets(backend).await;
                }
                Err(e) => {
                    // The previously active dataset (if any) stays untouched.
                    log::warn!("upload failed: {}", e);
                    self.seal_pending(format!("Upload failed: {}", e), true);
                    self.state = TurnState::Idle;
                    return TurnStatus::Completed;
                }
            }
        }

        self.state = TurnState::AwaitingAnalysis;
        let dataset_id = match self.active_dataset {
            Some(ref d) => d.id.clone(),
            // Unreachable through the entry guards, but a missing dataset must
            // not take down the session.
            None => {
                self.seal_pending(NO_DATASET_MESSAGE.to_string(), true);
                self.state = TurnState::Idle;
                return TurnStatus::Completed;
            }
        };
        let history = self.history_window(turn_start);
        let analyze_req = AnalyzeRequest {
            prompt: user_content.to_string(),
            dataset_id,
            chat_history: history.clone(),
        };
        let mut job_id = None;
        match backend.analyze(&analyze_req).await {
            Ok(resp) => {
                job_id = resp.job_id;
                if let Some(raw) = resp.result {
                    match classify_result(&raw) {
                        ResultShape::ErrorShaped => {
                            // Falls through to the chat explanation only.
                            log::debug!("suppressing error-shaped analysis result");
                        }
                        ResultShape::Typed(result) => {
                            self.store_in_cache(&result, &raw);
                            self.current_result = Some(result);
                            self.sidebar_visible = true;
                        }
                    }
                }
            }
            Err(e) => {
                // Degrade to explanation-only: the chat request carries no job id.
                log::warn!("analyze failed, proceeding without a job id: {}", e);
            }
        }

        self.state = TurnState::AwaitingChatStream;
        let chat_req = ChatRequest {
            prompt: user_content.to_string(),
            chat_history: history,
            job_id,
        };
        let cancel = Arc::clone(&self.cancel);
        let res = {
            let messages = &mut self.messages;
            let mut cb = |chunk: &str| {
                if let Some(pending) = messages.last_mut() {
                    pending.content.push_str(chunk);
                }
                if let Some(f) = on_chunk.as_mut() {
                    f(chunk);
                }
            };
            backend.chat_stream(&chat_req, &mut cb, &cancel).await
        };
        match res {
            Ok(outcome) => self.seal_pending(outcome.content, outcome.error),
            Err(e) => self.seal_pending(format!("I encountered an error: {}", e), true),
        }
        self.state = TurnState::Idle;
        TurnStatus::Completed
    }

    /// Final content, error flag, and timestamp for the pending slot.
    fn seal_pending(&mut self, content: String, is_error: bool) {
        if let Some(pending) = self.messages.last_mut() {
            pending.content = content;
            pending.is_error = is_error;
            pending.timestamp = Utc::now();
        }
    }

    /// Role+content pairs for the most recent messages preceding the turn,
    /// oldest first, capped at [`HISTORY_WINDOW`].
    fn history_window(&self, turn_start: usize) -> Vec<HistoryMessage> {
        let prior = &self.messages[..turn_start.min(self.messages.len())];
        let skip = prior.len().saturating_sub(HISTORY_WINDOW);
        prior[skip..]
            .iter()
            .map(|m| HistoryMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn store_in_cache(&self, result: &AnalysisResult, raw: &serde_json::Value) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(result.kind(), raw) {
                log::warn!("result cache write failed: {}", e);
            }
        }
    }
}
