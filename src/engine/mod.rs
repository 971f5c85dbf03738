//! Command engine - serializes user actions onto the capture session and
//! the batch uploader

mod engine;

pub use engine::{create_engine_channels, Engine};

use std::path::PathBuf;

use crate::upload::Category;

/// Commands that can be sent to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Upload the selected files as one batch
    Upload {
        category: Category,
        paths: Vec<PathBuf>,
    },
    /// Acquire a display-capture stream
    StartSharing,
    /// Release the stream, stopping any recording first
    StopSharing,
    StartRecording,
    StopRecording,
    /// Stop sharing, wait for in-flight uploads and exit
    Shutdown,
}
