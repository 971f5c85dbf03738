//! Capture session
//!
//! Explicit state machine for screen sharing and recording:
//!
//! ```text
//! Idle --start_sharing--> Sharing --start_recording--> Recording
//!  ^                        |  ^                          |
//!  +------stop_sharing------+  +-----stop_recording-------+
//!  ^                                                      |
//!  +-------------------stop_sharing-----------------------+
//! ```
//!
//! Each recording gets its own event consumer task holding a fresh
//! [`ChunkBuffer`]. When the recorder reports `Stopped`, that task
//! assembles the blob and uploads it as one `video-audio` file.
//!
//! A recorder may also end on its own (the encoder exits). The consumer
//! then puts the capture controls back to sharing; the session notices the
//! dead recorder on its next transition.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::recorder::{
    ChunkBuffer, MediaRecorder, RecorderEvent, RecorderFactory, RecorderState,
    RECORDING_CONTAINER_TYPE, RECORDING_FILE_NAME, RECORDING_MIME_TYPE,
};
use super::source::{DisplaySource, MediaStream, StreamConstraints, TrackKind};
use super::CaptureError;
use crate::ui::{CaptureControls, ControlPanel};
use crate::upload::{Category, FileOutcome, ProgressCallback, Submission, UploadFile, UploadTransport};

/// Alert texts
pub mod messages {
    pub const SHARE_FAILED: &str = "Could not share the screen. Please check permissions.";
    pub const SHARE_FIRST: &str = "Please start screen sharing first.";
}

/// Public view of the session state
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sharing,
    Recording,
}

enum SessionState {
    Idle,
    Sharing {
        stream: MediaStream,
    },
    Recording {
        stream: MediaStream,
        recorder: Box<dyn MediaRecorder>,
        end: Arc<RecordingEnd>,
    },
}

/// Claimed once, by either the session or the recording's consumer,
/// whichever handles the end of the recording first
#[derive(Default)]
struct RecordingEnd(Mutex<bool>);

impl RecordingEnd {
    /// Run `f` unless the end was already claimed
    fn claim_with(&self, f: impl FnOnce()) {
        let mut ended = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !*ended {
            *ended = true;
            f();
        }
    }
}

pub struct CaptureSession {
    state: SessionState,
    source: Arc<dyn DisplaySource>,
    recorders: Arc<dyn RecorderFactory>,
    transport: Arc<dyn UploadTransport>,
    panel: Arc<ControlPanel>,
    /// Consumer tasks of past and current recordings
    recordings: Vec<JoinHandle<Option<FileOutcome>>>,
}

impl CaptureSession {
    pub fn new(
        source: Arc<dyn DisplaySource>,
        recorders: Arc<dyn RecorderFactory>,
        transport: Arc<dyn UploadTransport>,
        panel: Arc<ControlPanel>,
    ) -> Self {
        panel.set_capture_controls(CaptureControls::IDLE);
        Self {
            state: SessionState::Idle,
            source,
            recorders,
            transport,
            panel,
            recordings: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        match self.state {
            SessionState::Idle => Phase::Idle,
            SessionState::Sharing { .. } => Phase::Sharing,
            SessionState::Recording { .. } => Phase::Recording,
        }
    }

    #[cfg(test)]
    pub fn stream(&self) -> Option<&MediaStream> {
        match &self.state {
            SessionState::Idle => None,
            SessionState::Sharing { stream } | SessionState::Recording { stream, .. } => Some(stream),
        }
    }

    /// Acquire a display-capture stream and show it on the preview.
    ///
    /// On failure the session stays idle and the user gets an alert.
    pub async fn start_sharing(&mut self) -> Result<(), CaptureError> {
        if !matches!(self.state, SessionState::Idle) {
            debug!("Screen sharing already active");
            return Ok(());
        }

        let stream = match self.source.acquire(StreamConstraints::VIDEO_AND_AUDIO).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to share the screen: {}", e);
                self.panel.alert(messages::SHARE_FAILED);
                return Err(e);
            }
        };

        if !stream.has_track(TrackKind::Audio) {
            warn!("Display capture has no audio track; recordings will be silent");
        }
        info!(
            "Screen sharing started (stream {}, {} track(s))",
            stream.id(),
            stream.tracks().len()
        );

        self.panel.bind_preview(&stream);
        self.panel.set_capture_controls(CaptureControls::SHARING);
        self.state = SessionState::Sharing { stream };
        Ok(())
    }

    /// Stop sharing. A recording in progress is stopped first so its data
    /// is flushed and uploaded before the tracks go away.
    pub async fn stop_sharing(&mut self) {
        let stream = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Idle => {
                debug!("No active screen share to stop");
                return;
            }
            SessionState::Sharing { stream } => stream,
            SessionState::Recording {
                stream,
                mut recorder,
                end,
            } => {
                if let Err(e) = stop_recorder(recorder.as_mut(), &end).await {
                    error!("Failed to stop recording while ending the share: {}", e);
                }
                stream
            }
        };

        stream.stop_all();
        self.panel.clear_preview();
        self.panel.set_capture_controls(CaptureControls::IDLE);
        info!("Screen sharing stopped (stream {})", stream.id());
    }

    /// Start recording the active stream.
    ///
    /// Without an active stream this only raises an alert.
    pub async fn start_recording(&mut self) -> Result<(), CaptureError> {
        let stream = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Idle => {
                self.panel.alert(messages::SHARE_FIRST);
                return Err(CaptureError::NoActiveStream);
            }
            SessionState::Recording {
                stream, recorder, ..
            } if recorder.state() != RecorderState::Recording => {
                debug!("Previous recorder already ended; starting a new one");
                stream
            }
            state @ SessionState::Recording { .. } => {
                debug!("Recording already in progress");
                self.state = state;
                return Ok(());
            }
            SessionState::Sharing { stream } => stream,
        };

        match self.begin_recording(&stream).await {
            Ok((recorder, end)) => {
                info!("Recording started ({})", RECORDING_MIME_TYPE);
                self.state = SessionState::Recording {
                    stream,
                    recorder,
                    end,
                };
                self.panel.set_capture_controls(CaptureControls::RECORDING);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start recording: {}", e);
                self.state = SessionState::Sharing { stream };
                Err(e)
            }
        }
    }

    /// Stop the current recording and keep sharing
    pub async fn stop_recording(&mut self) -> Result<(), CaptureError> {
        if !matches!(self.state, SessionState::Recording { .. }) {
            debug!("No recording in progress");
            return Ok(());
        }

        let SessionState::Recording {
            stream,
            mut recorder,
            end,
        } = std::mem::replace(&mut self.state, SessionState::Idle)
        else {
            return Ok(());
        };

        let result = stop_recorder(recorder.as_mut(), &end).await;
        self.state = SessionState::Sharing { stream };
        self.panel.set_capture_controls(CaptureControls::SHARING);
        info!("Recording stopped");
        result
    }

    /// Wait until every recording upload started so far has finished
    pub async fn wait_for_uploads(&mut self) -> Vec<FileOutcome> {
        let mut outcomes = Vec::new();
        for handle in self.recordings.drain(..) {
            match handle.await {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => error!("Recording upload task failed: {}", e),
            }
        }
        outcomes
    }

    async fn begin_recording(
        &mut self,
        stream: &MediaStream,
    ) -> Result<(Box<dyn MediaRecorder>, Arc<RecordingEnd>), CaptureError> {
        let mut recorder = self.recorders.create(stream, RECORDING_MIME_TYPE)?;

        let end = Arc::new(RecordingEnd::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.recordings.retain(|handle| !handle.is_finished());
        self.recordings.push(tokio::spawn(consume_recording(
            events_rx,
            end.clone(),
            self.transport.clone(),
            self.panel.clone(),
        )));

        recorder.start(events_tx).await?;
        Ok((recorder, end))
    }
}

async fn stop_recorder(
    recorder: &mut dyn MediaRecorder,
    end: &RecordingEnd,
) -> Result<(), CaptureError> {
    // From here on the session owns the control transition
    end.claim_with(|| {});
    if recorder.state() != RecorderState::Recording {
        debug!("Recorder already inactive");
        return Ok(());
    }
    recorder.stop().await
}

/// Single consumer of one recording's events
async fn consume_recording(
    mut events: mpsc::UnboundedReceiver<RecorderEvent>,
    end: Arc<RecordingEnd>,
    transport: Arc<dyn UploadTransport>,
    panel: Arc<ControlPanel>,
) -> Option<FileOutcome> {
    let mut chunks = ChunkBuffer::new();
    let mut stopped = false;

    while let Some(event) = events.recv().await {
        match event {
            RecorderEvent::Data(segment) => {
                let size = segment.len();
                if chunks.push(segment) {
                    trace!("Buffered recording segment of {} bytes", size);
                }
            }
            RecorderEvent::Stopped => {
                stopped = true;
                break;
            }
        }
    }

    if !stopped {
        warn!(
            "Recorder went away without stopping; discarding {} segment(s)",
            chunks.len()
        );
        return None;
    }

    end.claim_with(|| {
        warn!("Recorder ended on its own");
        panel.set_capture_controls(CaptureControls::SHARING);
    });

    if chunks.is_empty() {
        warn!("Recording produced no data; uploading an empty file");
    }

    info!(
        "Assembling recording from {} segment(s), {} bytes",
        chunks.len(),
        chunks.total_bytes()
    );
    let file = UploadFile::from_bytes(
        RECORDING_FILE_NAME,
        RECORDING_CONTAINER_TYPE,
        chunks.take_blob(),
    );

    let progress: ProgressCallback = Arc::new(|_| {});
    let result = transport
        .submit(
            Submission {
                category: Category::VideoAudio,
                file,
            },
            progress,
        )
        .await;

    match &result {
        Ok(200) => info!("Recording sent to the server"),
        Ok(status) => error!("Server rejected the recording with status {}", status),
        Err(e) => error!("Network error sending the recording: {}", e),
    }

    let outcome = FileOutcome::from_response(result);
    panel.set_status(outcome.status(Category::VideoAudio, RECORDING_FILE_NAME));
    Some(outcome)
}
