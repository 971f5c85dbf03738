//! Batch uploader
//!
//! Fires one request per selected file, all at once, and keeps the batch's
//! upload control disabled until every request has reached a terminal
//! state. Status updates from the concurrent requests are funnelled through
//! a single channel and rendered in arrival order, so the status display
//! always shows the most recent event.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    BatchReport, Category, FileOutcome, FileReport, Progress, ProgressCallback, StatusUpdate,
    Submission, UploadError, UploadFile, UploadTransport,
};
use crate::ui::ControlPanel;

/// User-facing status texts
pub mod messages {
    pub const NO_FILES: &str = "Please select one or more files.";
    pub const STARTING: &str = "Starting upload...";

    pub fn too_many_files(max: usize) -> String {
        format!("You can upload a maximum of {} files at once.", max)
    }

    pub fn progress(file_name: &str, percent: u8, completed: usize, total: usize) -> String {
        format!(
            "Uploading {}: {}% ({}/{})",
            file_name, percent, completed, total
        )
    }

    pub fn uploaded(file_name: &str) -> String {
        format!("File {} uploaded successfully!", file_name)
    }

    pub fn upload_failed(file_name: &str) -> String {
        format!("Error uploading file {}.", file_name)
    }

    pub fn network_error(file_name: &str) -> String {
        format!("Network error uploading file {}.", file_name)
    }
}

/// Event sent by an upload task back to the batch
#[derive(Debug)]
enum FileEvent {
    Progress { index: usize, progress: Progress },
    Finished { index: usize, outcome: FileOutcome },
}

#[derive(Clone)]
pub struct BatchUploader {
    transport: Arc<dyn UploadTransport>,
    max_files: usize,
}

impl BatchUploader {
    pub fn new(transport: Arc<dyn UploadTransport>, max_files: usize) -> Self {
        Self {
            transport,
            max_files,
        }
    }

    /// Upload `files` as one batch tagged with `category`.
    ///
    /// Validation failures are shown on the category's status display and
    /// returned as `Err` without issuing any request. Once accepted, the
    /// batch always runs to completion and the report holds one outcome
    /// per file in selection order.
    pub async fn upload(
        &self,
        category: Category,
        files: Vec<UploadFile>,
        panel: &ControlPanel,
    ) -> Result<BatchReport, UploadError> {
        if files.is_empty() {
            panel.set_status(StatusUpdate::error(category, messages::NO_FILES));
            return Err(UploadError::NoFiles);
        }

        if files.len() > self.max_files {
            panel.set_status(StatusUpdate::error(
                category,
                messages::too_many_files(self.max_files),
            ));
            return Err(UploadError::TooManyFiles {
                count: files.len(),
                max: self.max_files,
            });
        }

        let total = files.len();
        info!("Starting {} batch of {} file(s)", category, total);

        panel.set_status(StatusUpdate::pending(category, messages::STARTING));
        panel.set_upload_enabled(category, false);

        let names: Vec<String> = files.iter().map(|file| file.name.clone()).collect();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        for (index, file) in files.into_iter().enumerate() {
            if !category.accepts(&file.name) {
                warn!(
                    "{} does not have a usual {} extension ({:?}); uploading anyway",
                    file.name,
                    category,
                    category.usual_extensions()
                );
            }
            self.spawn_file_upload(index, category, file, event_tx.clone());
        }
        // The receiver ends once every task has dropped its sender
        drop(event_tx);

        let mut outcomes: Vec<Option<FileOutcome>> = vec![None; total];
        let mut completed = 0usize;

        while let Some(event) = event_rx.recv().await {
            match event {
                FileEvent::Progress { index, progress } => {
                    if let Some(percent) = progress.percent() {
                        panel.set_status(StatusUpdate::pending(
                            category,
                            messages::progress(&names[index], percent, completed, total),
                        ));
                    }
                }
                FileEvent::Finished { index, outcome } => {
                    completed += 1;
                    debug!(
                        "{} finished ({}/{}): {:?}",
                        names[index], completed, total, outcome
                    );
                    panel.set_status(outcome.status(category, &names[index]));
                    outcomes[index] = Some(outcome);

                    if completed == total {
                        panel.set_upload_enabled(category, true);
                    }
                }
            }
        }

        // A task that died without reporting still counts toward completion
        if completed < total {
            warn!(
                "{} upload task(s) ended without reporting an outcome",
                total - completed
            );
            panel.set_upload_enabled(category, true);
        }

        let files = names
            .into_iter()
            .zip(outcomes)
            .map(|(name, outcome)| FileReport {
                name,
                outcome: outcome.unwrap_or_else(|| FileOutcome::NetworkError {
                    reason: "upload task aborted".to_string(),
                }),
            })
            .collect();

        let report = BatchReport { category, files };
        info!(
            "{} batch finished: {} uploaded, {} failed",
            category,
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }

    fn spawn_file_upload(
        &self,
        index: usize,
        category: Category,
        file: UploadFile,
        events: mpsc::UnboundedSender<FileEvent>,
    ) {
        let transport = self.transport.clone();

        tokio::spawn(async move {
            let name = file.name.clone();
            let progress_events = events.clone();
            let progress: ProgressCallback = Arc::new(move |progress| {
                let _ = progress_events.send(FileEvent::Progress { index, progress });
            });

            let result = transport.submit(Submission { category, file }, progress).await;
            match &result {
                Ok(200) => info!("Uploaded {}", name),
                Ok(status) => warn!("Upload of {} rejected with status {}", name, status),
                Err(e) => warn!("Upload of {} failed: {}", name, e),
            }

            let _ = events.send(FileEvent::Finished {
                index,
                outcome: FileOutcome::from_response(result),
            });
        });
    }
}
