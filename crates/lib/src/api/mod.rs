//! Backend API surface: wire types, per-operation errors, and the `Backend` trait
//! implemented by the HTTP client (and by scripted mocks in tests).

mod http;
pub mod result;

pub use http::HttpBackend;
pub use result::{classify_result, AnalysisResult, ResultShape};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// A file staged for upload: descriptive attributes plus the payload bytes.
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl PendingFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Stage a file from disk, guessing the MIME type from the extension
    /// (CSV uploads without an extension fall back to octet-stream).
    pub fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading upload file {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self::new(name, mime_type, bytes))
    }
}

/// `POST /upload` response.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub id: String,
    #[serde(default)]
    pub filename: String,
}

/// One dataset from `GET /datasets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub upload_time: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub row_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct DatasetsResponse {
    #[serde(default)]
    pub datasets: Vec<Dataset>,
}

/// Role + content pair sent as bounded chat history (no timestamps, no files).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

/// `POST /analyze` request body.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest {
    pub prompt: String,
    pub dataset_id: String,
    pub chat_history: Vec<HistoryMessage>,
}

/// `POST /analyze` response: an untyped result payload (classified later) and
/// the job correlation id threaded into the chat request.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub job_id: Option<String>,
}

/// `POST /chat` request body. `job_id` is None when analysis failed and the
/// turn proceeds with the free-text explanation only.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub prompt: String,
    pub chat_history: Vec<HistoryMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Final accumulated state of one chat stream.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    /// Concatenation of all content fragments in arrival order.
    pub content: String,
    /// True when any frame carried the error flag or the transport failed mid-stream.
    pub error: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upload api error: {0}")]
    Api(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analyze request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("analyze api error: {0}")]
    Api(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ChatStreamError {
    #[error("chat request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("chat api error: {0}")]
    Api(String),
}

/// The backend operations the conversation state machine drives. Implementors
/// hold no conversation state; they are plain request executors.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `POST /upload` — multipart upload of one file.
    async fn upload(&self, file: &PendingFile) -> Result<UploadResponse, UploadError>;

    /// `GET /datasets` — previously uploaded datasets.
    async fn list_datasets(&self) -> Result<Vec<Dataset>, UploadError>;

    /// `POST /analyze` — structured analysis for a prompt + dataset.
    async fn analyze(&self, req: &AnalyzeRequest) -> Result<AnalyzeResponse, AnalysisError>;

    /// `POST /chat` — streamed explanation. Calls `on_chunk` for every content
    /// fragment in arrival order and returns the accumulated outcome once the
    /// terminal marker arrives, the transport closes, or `cancel` fires.
    ///
    /// Errors only before any streaming begins (send failure or non-success
    /// status); mid-stream failures seal the outcome with partial content and
    /// the error flag set instead.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
        cancel: &Notify,
    ) -> Result<ChatOutcome, ChatStreamError>;
}
