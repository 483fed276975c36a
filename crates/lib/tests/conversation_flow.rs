//! End-to-end turns through the conversation state machine against a scripted
//! in-process backend. No network; the HTTP client has its own test.

use async_trait::async_trait;
use lib::api::{
    AnalysisError, AnalysisResult, AnalyzeRequest, AnalyzeResponse, Backend, ChatOutcome,
    ChatRequest, ChatStreamError, Dataset, PendingFile, UploadError, UploadResponse,
};
use lib::conversation::{Conversation, Role, TurnStatus};
use serde_json::json;
use std::sync::Mutex;
use tokio::sync::Notify;

enum ChatScript {
    /// Emit these (content, error-flag) frames, then terminate normally.
    Chunks(Vec<(&'static str, bool)>),
    /// Fail before any bytes, as a non-success HTTP status would.
    HttpError(&'static str),
    /// Emit one chunk, then block until cancelled.
    ChunkThenWaitCancel(&'static str),
}

struct MockBackend {
    upload: Option<Result<(&'static str, &'static str), &'static str>>,
    datasets: Vec<Dataset>,
    analyze: Option<Result<(Option<serde_json::Value>, Option<&'static str>), &'static str>>,
    chat: ChatScript,
    upload_calls: Mutex<usize>,
    analyze_requests: Mutex<Vec<AnalyzeRequest>>,
    chat_requests: Mutex<Vec<ChatRequest>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            upload: None,
            datasets: Vec::new(),
            analyze: None,
            chat: ChatScript::Chunks(vec![("ok", false)]),
            upload_calls: Mutex::new(0),
            analyze_requests: Mutex::new(Vec::new()),
            chat_requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockBackend {
    fn upload_count(&self) -> usize {
        *self.upload_calls.lock().expect("lock")
    }

    fn analyze_requests(&self) -> Vec<AnalyzeRequest> {
        self.analyze_requests.lock().expect("lock").clone()
    }

    fn chat_requests(&self) -> Vec<ChatRequest> {
        self.chat_requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn upload(&self, _file: &PendingFile) -> Result<UploadResponse, UploadError> {
        *self.upload_calls.lock().expect("lock") += 1;
        match &self.upload {
            Some(Ok((id, filename))) => Ok(UploadResponse {
                id: id.to_string(),
                filename: filename.to_string(),
            }),
            Some(Err(msg)) => Err(UploadError::Api(msg.to_string())),
            None => panic!("unexpected upload call"),
        }
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>, UploadError> {
        Ok(self.datasets.clone())
    }

    async fn analyze(&self, req: &AnalyzeRequest) -> Result<AnalyzeResponse, AnalysisError> {
        self.analyze_requests.lock().expect("lock").push(req.clone());
        match &self.analyze {
            Some(Ok((result, job_id))) => Ok(AnalyzeResponse {
                result: result.clone(),
                job_id: job_id.map(str::to_string),
            }),
            Some(Err(msg)) => Err(AnalysisError::Api(msg.to_string())),
            None => panic!("unexpected analyze call"),
        }
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
        cancel: &Notify,
    ) -> Result<ChatOutcome, ChatStreamError> {
        self.chat_requests.lock().expect("lock").push(req.clone());
        match &self.chat {
            ChatScript::Chunks(chunks) => {
                let mut outcome = ChatOutcome::default();
                for (content, error) in chunks {
                    if *error {
                        outcome.error = true;
                    }
                    if !content.is_empty() {
                        on_chunk(content);
                        outcome.content.push_str(content);
                    }
                }
                Ok(outcome)
            }
            ChatScript::HttpError(msg) => Err(ChatStreamError::Api(msg.to_string())),
            ChatScript::ChunkThenWaitCancel(content) => {
                on_chunk(content);
                cancel.notified().await;
                Ok(ChatOutcome {
                    content: content.to_string(),
                    error: false,
                })
            }
        }
    }
}

fn dataset(id: &str, row_count: u64) -> Dataset {
    Dataset {
        id: id.to_string(),
        filename: format!("{}.csv", id),
        upload_time: Some("2025-01-01T00:00:00Z".to_string()),
        columns: vec!["week".to_string(), "sales".to_string()],
        row_count,
    }
}

fn csv_file() -> PendingFile {
    PendingFile::new("sales.csv", "text/csv", b"week,sales\n1,10\n".to_vec())
}

#[tokio::test]
async fn full_turn_upload_analyze_stream() {
    let backend = MockBackend {
        upload: Some(Ok(("ds-9", "sales.csv"))),
        datasets: vec![dataset("ds-9", 100)],
        analyze: Some(Ok((
            Some(json!({"type": "predict", "rows": [{"week": 1}], "mae": 1.5, "r2": 0.92})),
            Some("job-1"),
        ))),
        chat: ChatScript::Chunks(vec![("Sales ", false), ("look ", false), ("good.", false)]),
        ..MockBackend::default()
    };

    let mut conv = Conversation::new();
    let mut streamed = String::new();
    let mut collect = |chunk: &str| streamed.push_str(chunk);
    let status = conv
        .submit_turn(&backend, "how do sales look?", Some(csv_file()), Some(&mut collect))
        .await;

    assert_eq!(status, TurnStatus::Completed);
    assert_eq!(backend.upload_count(), 1);

    // Exactly one user message (with file metadata) and one sealed assistant
    // message equal to the concatenated fragments.
    assert_eq!(conv.messages().len(), 2);
    let user = &conv.messages()[0];
    assert_eq!(user.role, Role::User);
    assert_eq!(user.content, "how do sales look?");
    let meta = user.file.as_ref().expect("file metadata");
    assert_eq!(meta.name, "sales.csv");
    assert_eq!(meta.size_bytes, 16);
    let reply = &conv.messages()[1];
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, "Sales look good.");
    assert!(!reply.is_error);
    assert_eq!(streamed, "Sales look good.");

    // The fresh upload became active and was backfilled from the refresh.
    let active = conv.active_dataset().expect("active dataset");
    assert_eq!(active.id, "ds-9");
    assert_eq!(active.row_count, 100);

    // Job id threaded from analyze into chat.
    assert_eq!(backend.chat_requests()[0].job_id.as_deref(), Some("job-1"));

    // Typed result surfaced.
    assert!(conv.sidebar_visible());
    assert!(matches!(conv.current_result(), Some(AnalysisResult::Predict(_))));
    assert!(!conv.in_flight());
}

#[tokio::test]
async fn file_only_turn_uses_fallback_prompt() {
    let backend = MockBackend {
        upload: Some(Ok(("ds-2", "data.csv"))),
        analyze: Some(Ok((None, Some("job-2")))),
        chat: ChatScript::Chunks(vec![("Here is your data.", false)]),
        ..MockBackend::default()
    };

    let mut conv = Conversation::new();
    let status = conv.submit_turn(&backend, "", Some(csv_file()), None).await;

    assert_eq!(status, TurnStatus::Completed);
    assert_eq!(conv.messages()[0].content, "File uploaded");
    assert_eq!(backend.analyze_requests()[0].prompt, "File uploaded");
}

#[tokio::test]
async fn error_shaped_result_is_suppressed_but_job_id_survives() {
    let backend = MockBackend {
        analyze: Some(Ok((
            Some(json!({"error": true, "message": "column not found"})),
            Some("job-7"),
        ))),
        chat: ChatScript::Chunks(vec![("I could not find that column.", false)]),
        ..MockBackend::default()
    };

    let mut conv = Conversation::new();
    conv.select_dataset(&dataset("ds-1", 10));
    let status = conv.submit_turn(&backend, "sum of bogus", None, None).await;

    assert_eq!(status, TurnStatus::Completed);
    assert!(conv.current_result().is_none());
    assert!(!conv.sidebar_visible());
    assert_eq!(backend.chat_requests()[0].job_id.as_deref(), Some("job-7"));
}

#[tokio::test]
async fn chat_http_failure_replaces_pending_with_one_error_message() {
    let backend = MockBackend {
        analyze: Some(Ok((None, Some("job-3")))),
        chat: ChatScript::HttpError("500 Internal Server Error"),
        ..MockBackend::default()
    };

    let mut conv = Conversation::new();
    conv.select_dataset(&dataset("ds-1", 10));
    let before = conv.messages().len();
    let status = conv.submit_turn(&backend, "hello", None, None).await;

    assert_eq!(status, TurnStatus::Completed);
    assert_eq!(conv.messages().len(), before + 2);
    let reply = conv.messages().last().expect("reply");
    assert!(reply.is_error);
    assert!(reply.content.starts_with("I encountered an error:"));
    assert!(reply.content.contains("500"));
}

#[tokio::test]
async fn upload_failure_keeps_prior_dataset_and_stops_the_turn() {
    let backend = MockBackend {
        upload: Some(Err("500 Internal Server Error")),
        ..MockBackend::default()
    };

    let mut conv = Conversation::new();
    conv.select_dataset(&dataset("ds-old", 5));
    let status = conv
        .submit_turn(&backend, "analyze the new file", Some(csv_file()), None)
        .await;

    assert_eq!(status, TurnStatus::Completed);
    assert_eq!(conv.active_dataset().map(|d| d.id.as_str()), Some("ds-old"));
    let reply = conv.messages().last().expect("reply");
    assert!(reply.is_error);
    assert!(reply.content.contains("Upload failed"));
    assert!(reply.content.contains("500"));
    // Never proceeded past the upload phase.
    assert!(backend.analyze_requests().is_empty());
    assert!(backend.chat_requests().is_empty());
}

#[tokio::test]
async fn analysis_failure_degrades_to_explanation_without_job_id() {
    let backend = MockBackend {
        analyze: Some(Err("502 Bad Gateway")),
        chat: ChatScript::Chunks(vec![("Let me answer from context.", false)]),
        ..MockBackend::default()
    };

    let mut conv = Conversation::new();
    conv.select_dataset(&dataset("ds-1", 10));
    let status = conv.submit_turn(&backend, "average sales?", None, None).await;

    assert_eq!(status, TurnStatus::Completed);
    assert_eq!(backend.chat_requests()[0].job_id, None);
    let reply = conv.messages().last().expect("reply");
    assert_eq!(reply.content, "Let me answer from context.");
    assert!(!reply.is_error);
}

#[tokio::test]
async fn error_frame_flags_the_message_without_halting_accumulation() {
    let backend = MockBackend {
        analyze: Some(Ok((None, None))),
        chat: ChatScript::Chunks(vec![
            ("partial ", false),
            ("oops", true),
            (" recovered", false),
        ]),
        ..MockBackend::default()
    };

    let mut conv = Conversation::new();
    conv.select_dataset(&dataset("ds-1", 10));
    conv.submit_turn(&backend, "go", None, None).await;

    let reply = conv.messages().last().expect("reply");
    assert_eq!(reply.content, "partial oops recovered");
    assert!(reply.is_error);
}

#[tokio::test]
async fn history_sent_to_analyze_is_bounded_and_oldest_first() {
    let backend = MockBackend {
        analyze: Some(Ok((None, None))),
        chat: ChatScript::Chunks(vec![("ans", false)]),
        ..MockBackend::default()
    };

    let mut conv = Conversation::new();
    conv.select_dataset(&dataset("ds-1", 10));
    for i in 1..=7 {
        conv.submit_turn(&backend, &format!("q{}", i), None, None).await;
    }

    let requests = backend.analyze_requests();
    // Turn 7 sees the selection message plus six completed turns (13 messages)
    // and must send only the most recent 10, oldest first.
    let last = requests.last().expect("analyze request");
    assert_eq!(last.chat_history.len(), 10);
    assert_eq!(last.chat_history[0].content, "q2");
    assert_eq!(last.chat_history[0].role, "user");
    assert_eq!(last.chat_history[9].content, "ans");
    assert_eq!(last.chat_history[9].role, "assistant");
    // Early turns send the full (short) log.
    assert_eq!(requests[0].chat_history.len(), 1);
}

#[tokio::test]
async fn abort_seals_pending_with_partial_content() {
    let backend = MockBackend {
        analyze: Some(Ok((None, Some("job-9")))),
        chat: ChatScript::ChunkThenWaitCancel("Hello"),
        ..MockBackend::default()
    };

    let mut conv = Conversation::new();
    conv.select_dataset(&dataset("ds-1", 10));
    let cancel = conv.cancel_handle();
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.notify_waiters();
    });

    let status = conv.submit_turn(&backend, "tell me a story", None, None).await;
    stopper.await.expect("stopper task");

    assert_eq!(status, TurnStatus::Completed);
    let reply = conv.messages().last().expect("reply");
    assert_eq!(reply.content, "Hello");
    assert!(!reply.is_error);
    assert!(!conv.in_flight());
}
