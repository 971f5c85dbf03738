//! Recorder state machine and chunk buffering
//!
//! A recorder turns a live stream into a sequence of binary segments. It
//! reports them as [`RecorderEvent`]s on a single channel: any number of
//! `Data` events followed by exactly one `Stopped`.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CaptureError, MediaStream};

/// Requested encoding for screen recordings
pub const RECORDING_MIME_TYPE: &str = "video/webm; codecs=vp9";
/// Type of the assembled recording blob
pub const RECORDING_CONTAINER_TYPE: &str = "video/webm";
pub const RECORDING_FILE_NAME: &str = "screen-recording.webm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// A segment of encoded output, possibly empty
    Data(Vec<u8>),
    /// The recorder flushed everything and will emit nothing further
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Inactive,
    Recording,
}

/// A recorder bound to one stream
#[async_trait]
pub trait MediaRecorder: Send {
    fn state(&self) -> RecorderState;

    /// Begin recording; segments and the final stop go to `events`
    async fn start(&mut self, events: mpsc::UnboundedSender<RecorderEvent>) -> Result<(), CaptureError>;

    /// Stop recording. Returns after the remaining data and the `Stopped`
    /// event have been sent.
    async fn stop(&mut self) -> Result<(), CaptureError>;
}

/// Creates recorders for a stream
pub trait RecorderFactory: Send + Sync {
    fn create(
        &self,
        stream: &MediaStream,
        mime_type: &str,
    ) -> Result<Box<dyn MediaRecorder>, CaptureError>;
}

/// Ordered, append-only segments of one recording
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: Vec<Vec<u8>>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Append a segment. Empty segments are dropped; returns whether the
    /// segment was kept.
    pub fn push(&mut self, chunk: Vec<u8>) -> bool {
        if chunk.is_empty() {
            return false;
        }
        self.chunks.push(chunk);
        true
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Concatenate every segment into one blob, leaving the buffer empty
    pub fn take_blob(&mut self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.total_bytes());
        for chunk in self.chunks.drain(..) {
            blob.extend_from_slice(&chunk);
        }
        blob
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_segments_are_ignored() {
        let mut buffer = ChunkBuffer::new();
        assert!(!buffer.push(Vec::new()));
        assert!(buffer.push(b"abc".to_vec()));
        assert!(!buffer.push(Vec::new()));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_blob_preserves_order() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(b"header|".to_vec());
        buffer.push(b"cluster-1|".to_vec());
        buffer.push(b"cluster-2".to_vec());
        assert_eq!(buffer.total_bytes(), 26);

        assert_eq!(buffer.take_blob(), b"header|cluster-1|cluster-2");
        assert!(buffer.is_empty());
        assert!(buffer.take_blob().is_empty());
    }
}
