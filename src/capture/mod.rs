//! Screen sharing and recording
//!
//! A [`CaptureSession`] owns at most one display-capture stream and at most
//! one recorder bound to it. The capture backends sit behind the
//! `DisplaySource` and `RecorderFactory` traits; the shipped backend
//! drives ffmpeg.

mod ffmpeg;
mod recorder;
mod session;
mod source;
#[cfg(test)]
pub(crate) mod testing;

pub use ffmpeg::{FfmpegDisplaySource, FfmpegRecorderFactory};
pub use session::CaptureSession;
pub use source::{MediaStream, TrackKind, TrackSource};

#[cfg(test)]
pub use recorder::RECORDING_FILE_NAME;
#[cfg(test)]
pub use session::Phase;
#[cfg(test)]
pub use source::MediaTrack;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The user or the platform refused display capture
    #[error("display capture denied: {0}")]
    Denied(String),

    #[error("capture backend unavailable: {0}")]
    Unavailable(String),

    #[error("no active screen share")]
    NoActiveStream,

    #[error("stream has no live tracks")]
    NoLiveTracks,

    #[error("unsupported recording type '{0}'")]
    UnsupportedMimeType(String),

    #[error("recorder error: {0}")]
    Recorder(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
