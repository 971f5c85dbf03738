//! Multipart transport
//!
//! Streams file bodies from disk instead of buffering them, and reports
//! how many body bytes have been handed to the connection.

use async_trait::async_trait;
use futures::{stream, Stream, TryStreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use std::io;
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::{Category, FileBody, UploadError, UploadFile};
use crate::config::Config;

/// One file plus its category tag
#[derive(Debug, Clone)]
pub struct Submission {
    pub category: Category,
    pub file: UploadFile,
}

/// Bytes of the file body sent so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub sent: u64,
    pub total: u64,
}

impl Progress {
    /// Rounded percentage, or None when the total size is unknown
    pub fn percent(&self) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        let ratio = self.sent.min(self.total) as f64 / self.total as f64;
        Some((ratio * 100.0).round() as u8)
    }
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Sends one multipart submission and returns the HTTP status code.
///
/// `Err` means no response was received at all.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn submit(
        &self,
        submission: Submission,
        progress: ProgressCallback,
    ) -> Result<u16, UploadError>;
}

/// reqwest-backed transport posting to the configured endpoint
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Self {
        Self::with_endpoint(config.upload_endpoint())
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn file_part(file: UploadFile, progress: ProgressCallback) -> Result<Part, UploadError> {
        let part = match file.body {
            FileBody::Path(path) => {
                let handle = File::open(&path).await.map_err(|source| UploadError::Io {
                    path: path.clone(),
                    source,
                })?;
                let total = handle
                    .metadata()
                    .await
                    .map_err(|source| UploadError::Io {
                        path: path.clone(),
                        source,
                    })?
                    .len();

                let body = track_progress(ReaderStream::new(handle), total, progress);
                Part::stream_with_length(Body::wrap_stream(body), total)
            }
            FileBody::Bytes(bytes) => {
                let total = bytes.len() as u64;
                let body = track_progress(
                    stream::once(async move { Ok::<_, io::Error>(bytes) }),
                    total,
                    progress,
                );
                Part::stream_with_length(Body::wrap_stream(body), total)
            }
        };

        Ok(part.file_name(file.name).mime_str(&file.content_type)?)
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn submit(
        &self,
        submission: Submission,
        progress: ProgressCallback,
    ) -> Result<u16, UploadError> {
        let name = submission.file.name.clone();
        let part = Self::file_part(submission.file, progress).await?;

        let form = Form::new()
            .part("file", part)
            .text("upload_type", submission.category.as_str());

        debug!("POST {} ({}, {})", self.endpoint, name, submission.category);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    UploadError::Connection(e.to_string())
                } else {
                    UploadError::Http(e)
                }
            })?;

        Ok(response.status().as_u16())
    }
}

/// Wrap a body stream so every chunk pulled by the connection is reported
fn track_progress<S, B>(
    body: S,
    total: u64,
    progress: ProgressCallback,
) -> impl Stream<Item = io::Result<B>> + Send + Sync + 'static
where
    S: Stream<Item = io::Result<B>> + Send + Sync + 'static,
    B: AsRef<[u8]> + Send + Sync + 'static,
{
    let mut sent = 0u64;
    body.inspect_ok(move |chunk| {
        sent += chunk.as_ref().len() as u64;
        progress(Progress { sent, total });
    })
}
