//! Multipart uploads to the intake server
//!
//! Every file becomes one `POST /upload` carrying a `file` part and an
//! `upload_type` part naming its [`Category`].

mod batch;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{messages, BatchUploader};
pub use transport::{HttpTransport, Progress, ProgressCallback, Submission, UploadTransport};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Purpose of an upload, sent as the `upload_type` form field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Audio,
    Video,
    /// Combined video+audio, also used for screen recordings
    VideoAudio,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Audio, Category::Video, Category::VideoAudio];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Audio => "audio",
            Category::Video => "video",
            Category::VideoAudio => "video-audio",
        }
    }

    /// Extensions the intake server files under this category
    pub fn usual_extensions(&self) -> &'static [&'static str] {
        match self {
            Category::Audio => &["mp3", "wav", "ogg", "flac"],
            Category::Video | Category::VideoAudio => &["mp4", "mov", "avi", "mkv", "webm"],
        }
    }

    pub fn accepts(&self, file_name: &str) -> bool {
        match extension_of(file_name) {
            Some(ext) => self.usual_extensions().contains(&ext.as_str()),
            None => false,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| UploadError::UnknownCategory(s.to_string()))
    }
}

/// Where the bytes of a file come from
#[derive(Debug, Clone)]
pub enum FileBody {
    /// Streamed from disk when the request is sent
    Path(PathBuf),
    /// Already in memory (e.g. an assembled recording)
    Bytes(Vec<u8>),
}

/// A named binary blob selected for upload
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    pub body: FileBody,
}

impl UploadFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let content_type = content_type_for(&name).to_string();

        Self {
            name,
            content_type,
            body: FileBody::Path(path),
        }
    }

    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            body: FileBody::Bytes(bytes),
        }
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Guess the MIME type of the `file` part from its extension
pub fn content_type_for(file_name: &str) -> &'static str {
    match extension_of(file_name).as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

/// Style classification of a status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Error,
    Pending,
    Success,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Error => "error",
            StatusKind::Pending => "pending",
            StatusKind::Success => "success",
        }
    }
}

/// Text shown in a category's status display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub category: Category,
    pub kind: StatusKind,
    pub text: String,
}

impl StatusUpdate {
    pub fn new(category: Category, kind: StatusKind, text: impl Into<String>) -> Self {
        Self {
            category,
            kind,
            text: text.into(),
        }
    }

    pub fn error(category: Category, text: impl Into<String>) -> Self {
        Self::new(category, StatusKind::Error, text)
    }

    pub fn pending(category: Category, text: impl Into<String>) -> Self {
        Self::new(category, StatusKind::Pending, text)
    }

    pub fn success(category: Category, text: impl Into<String>) -> Self {
        Self::new(category, StatusKind::Success, text)
    }
}

/// Terminal state of one file upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum FileOutcome {
    /// The server answered 200
    Uploaded,
    /// The server answered with any other status
    Rejected { status: u16 },
    /// No response was received
    NetworkError { reason: String },
}

impl FileOutcome {
    /// Map a transport result to an outcome. Only 200 counts as success.
    pub fn from_response(result: Result<u16, UploadError>) -> Self {
        match result {
            Ok(200) => FileOutcome::Uploaded,
            Ok(status) => FileOutcome::Rejected { status },
            Err(e) => FileOutcome::NetworkError {
                reason: e.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FileOutcome::Uploaded)
    }

    /// Status line for `file_name` after reaching this outcome
    pub fn status(&self, category: Category, file_name: &str) -> StatusUpdate {
        match self {
            FileOutcome::Uploaded => StatusUpdate::success(category, messages::uploaded(file_name)),
            FileOutcome::Rejected { .. } => {
                StatusUpdate::error(category, messages::upload_failed(file_name))
            }
            FileOutcome::NetworkError { .. } => {
                StatusUpdate::error(category, messages::network_error(file_name))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub name: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

/// Per-file outcomes of one batch, in selection order
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub category: Category,
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|file| file.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no files selected")]
    NoFiles,

    #[error("{count} files selected, at most {max} are allowed per batch")]
    TooManyFiles { count: usize, max: usize },

    #[error("unknown upload type '{0}' (expected audio, video or video-audio)")]
    UnknownCategory(String),

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not reach the upload endpoint: {0}")]
    Connection(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
