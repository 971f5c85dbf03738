//! Engine loop
//!
//! Capture commands run inline, in arrival order, so the session never sees
//! two transitions at once. Upload batches are spawned and run concurrently
//! with later commands; one batch per category may be in flight.

use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture::CaptureSession;
use crate::ui::ControlPanel;
use crate::upload::{BatchUploader, Category, UploadFile};

use super::EngineCommand;

pub struct Engine {
    session: CaptureSession,
    uploader: BatchUploader,
    panel: Arc<ControlPanel>,
    cmd_rx: mpsc::Receiver<EngineCommand>,
    /// In-flight batch per category
    batches: HashMap<Category, JoinHandle<()>>,
}

impl Engine {
    pub fn new(
        session: CaptureSession,
        uploader: BatchUploader,
        panel: Arc<ControlPanel>,
        cmd_rx: mpsc::Receiver<EngineCommand>,
    ) -> Self {
        Self {
            session,
            uploader,
            panel,
            cmd_rx,
            batches: HashMap::new(),
        }
    }

    /// Process commands until `Shutdown` or until every sender is gone
    pub async fn run(&mut self) -> Result<()> {
        info!("Engine started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            debug!("Engine command: {:?}", cmd);
            match cmd {
                EngineCommand::Upload { category, paths } => self.start_batch(category, paths),
                EngineCommand::StartSharing => {
                    if let Err(e) = self.session.start_sharing().await {
                        debug!("Sharing not started: {}", e);
                    }
                }
                EngineCommand::StopSharing => self.session.stop_sharing().await,
                EngineCommand::StartRecording => {
                    if let Err(e) = self.session.start_recording().await {
                        debug!("Recording not started: {}", e);
                    }
                }
                EngineCommand::StopRecording => {
                    if let Err(e) = self.session.stop_recording().await {
                        error!("Failed to stop recording: {}", e);
                    }
                }
                EngineCommand::Shutdown => {
                    info!("Shutdown command received");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn start_batch(&mut self, category: Category, paths: Vec<PathBuf>) {
        self.batches.retain(|_, handle| !handle.is_finished());
        if self.batches.contains_key(&category) || !self.panel.is_upload_enabled(category) {
            warn!("A {} upload is already in progress; ignoring new selection", category);
            return;
        }

        let files: Vec<UploadFile> = paths.into_iter().map(UploadFile::from_path).collect();
        let uploader = self.uploader.clone();
        let panel = self.panel.clone();

        let handle = tokio::spawn(async move {
            match uploader.upload(category, files, &panel).await {
                Ok(report) if !report.all_succeeded() => warn!(
                    "{} of {} {} file(s) failed to upload",
                    report.failed(),
                    report.files.len(),
                    category
                ),
                Ok(_) => {}
                Err(e) => debug!("{} batch not started: {}", category, e),
            }
        });
        self.batches.insert(category, handle);
    }

    async fn shutdown(&mut self) {
        self.session.stop_sharing().await;

        let recordings = self.session.wait_for_uploads().await;
        if !recordings.is_empty() {
            info!("{} recording upload(s) finished before exit", recordings.len());
        }

        for (category, handle) in self.batches.drain() {
            if let Err(e) = handle.await {
                error!("{} upload task failed: {}", category, e);
            }
        }
        info!("Engine stopped");
    }
}

/// Create the command channel for the engine
pub fn create_engine_channels() -> (mpsc::Sender<EngineCommand>, mpsc::Receiver<EngineCommand>) {
    mpsc::channel(32)
}
