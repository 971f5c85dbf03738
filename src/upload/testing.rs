//! In-process transport for exercising upload flows without a server

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{Category, FileBody, Progress, ProgressCallback, Submission, UploadError, UploadTransport};

/// How the fake server answers a given file
#[derive(Debug, Clone, Copy)]
pub(crate) struct FakeResponse {
    /// None simulates a transport failure
    pub status: Option<u16>,
    pub delay: Duration,
}

impl FakeResponse {
    pub fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            delay: Duration::ZERO,
        }
    }

    pub fn network_error() -> Self {
        Self {
            status: None,
            delay: Duration::ZERO,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedSubmission {
    pub category: Category,
    pub name: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

pub(crate) struct FakeTransport {
    default: FakeResponse,
    responses: Mutex<HashMap<String, FakeResponse>>,
    submissions: Mutex<Vec<RecordedSubmission>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::answering(FakeResponse::status(200))
    }

    pub fn answering(default: FakeResponse) -> Self {
        Self {
            default,
            responses: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(&self, file_name: &str, response: FakeResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(file_name.to_string(), response);
    }

    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadTransport for FakeTransport {
    async fn submit(
        &self,
        submission: Submission,
        progress: ProgressCallback,
    ) -> Result<u16, UploadError> {
        let body = match &submission.file.body {
            FileBody::Bytes(bytes) => bytes.clone(),
            FileBody::Path(path) => tokio::fs::read(path).await.map_err(|source| UploadError::Io {
                path: path.clone(),
                source,
            })?,
        };

        self.submissions.lock().unwrap().push(RecordedSubmission {
            category: submission.category,
            name: submission.file.name.clone(),
            content_type: submission.file.content_type.clone(),
            body: body.clone(),
        });

        let response = self
            .responses
            .lock()
            .unwrap()
            .get(&submission.file.name)
            .copied()
            .unwrap_or(self.default);

        let total = body.len() as u64;
        progress(Progress {
            sent: total / 2,
            total,
        });
        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }
        progress(Progress { sent: total, total });

        response
            .status
            .ok_or_else(|| UploadError::Connection("connection reset by peer".to_string()))
    }
}
