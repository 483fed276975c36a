//! HTTP client for the DataPrompt backend (http://127.0.0.1:8000 by default).
//! Upload and analyze are plain JSON/multipart calls; chat is an SSE-style stream.

use crate::stream::{Frame, FrameParser};

use super::{
    AnalysisError, AnalyzeRequest, AnalyzeResponse, Backend, ChatOutcome, ChatRequest,
    ChatStreamError, Dataset, DatasetsResponse, PendingFile, UploadError, UploadResponse,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::Notify;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for the backend HTTP API.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
    /// Whole-request bound for upload/datasets/analyze.
    request_timeout: Duration,
    /// Per-chunk wait bound for the chat stream; a stalled transport seals the
    /// outcome with whatever was accumulated instead of hanging.
    stream_idle_timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, request: Duration, stream_idle: Duration) -> Self {
        self.request_timeout = request;
        self.stream_idle_timeout = stream_idle;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Backend for HttpBackend {
    /// POST /upload — multipart form with a `file` field.
    async fn upload(&self, file: &PendingFile) -> Result<UploadResponse, UploadError> {
        let url = format!("{}/upload", self.base_url);
        let part = reqwest::multipart::Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let res = self
            .client
            .post(&url)
            .multipart(form)
            .timeout(self.request_timeout)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(UploadError::Api(format!("{} {}", status, body)));
        }
        let data: UploadResponse = res.json().await?;
        Ok(data)
    }

    /// GET /datasets — previously uploaded datasets.
    async fn list_datasets(&self) -> Result<Vec<Dataset>, UploadError> {
        let url = format!("{}/datasets", self.base_url);
        let res = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(UploadError::Api(format!("{} {}", status, body)));
        }
        let data: DatasetsResponse = res.json().await?;
        Ok(data.datasets)
    }

    /// POST /analyze — structured analysis; returns the raw result payload and job id.
    async fn analyze(&self, req: &AnalyzeRequest) -> Result<AnalyzeResponse, AnalysisError> {
        let url = format!("{}/analyze", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(req)
            .timeout(self.request_timeout)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AnalysisError::Api(format!("{} {}", status, body)));
        }
        let data: AnalyzeResponse = res.json().await?;
        Ok(data)
    }

    /// POST /chat — streamed explanation. Parses `data: ` frames as they arrive
    /// and calls `on_chunk` for each content delta.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
        cancel: &Notify,
    ) -> Result<ChatOutcome, ChatStreamError> {
        let url = format!("{}/chat", self.base_url);
        // Bounds only the send (headers received); the stream itself is
        // covered by the per-chunk idle timeout below.
        let send = self.client.post(&url).json(req).send();
        let res = match tokio::time::timeout(self.request_timeout, send).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(ChatStreamError::Api(format!(
                    "chat request timed out after {}s",
                    self.request_timeout.as_secs()
                )))
            }
        };
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChatStreamError::Api(format!("{} {}", status, body)));
        }

        let mut stream = res.bytes_stream();
        let mut parser = FrameParser::new();
        let mut outcome = ChatOutcome::default();

        // Registered once, outside the loop: a wake that lands while frames
        // are being processed (not inside the select) must still be observed
        // on the next iteration.
        let notified = cancel.notified();
        tokio::pin!(notified);

        'read: loop {
            let next = tokio::select! {
                _ = &mut notified => {
                    log::debug!("chat stream aborted, sealing with partial content");
                    break 'read;
                }
                next = tokio::time::timeout(self.stream_idle_timeout, stream.next()) => next,
            };
            let chunk = match next {
                // Stalled transport: seal with what we have instead of hanging.
                Err(_) => {
                    log::warn!(
                        "chat stream idle for {}s, sealing with partial content",
                        self.stream_idle_timeout.as_secs()
                    );
                    break 'read;
                }
                // Transport closed without a terminal marker.
                Ok(None) => break 'read,
                Ok(Some(Err(e))) => {
                    if outcome.content.is_empty() {
                        return Err(ChatStreamError::Request(e));
                    }
                    log::warn!("chat transport failed mid-stream: {}", e);
                    outcome.error = true;
                    break 'read;
                }
                Ok(Some(Ok(c))) => c,
            };
            for frame in parser.push(&chunk) {
                match frame {
                    Frame::Event(event) => {
                        if event.error {
                            outcome.error = true;
                        }
                        if let Some(content) = event.content {
                            if !content.is_empty() {
                                on_chunk(&content);
                                outcome.content.push_str(&content);
                            }
                        }
                    }
                    Frame::Done => break 'read,
                }
            }
        }

        Ok(outcome)
    }
}
