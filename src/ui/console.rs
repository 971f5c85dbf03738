//! Interactive console
//!
//! Reads commands from stdin and forwards them to the engine, and prints
//! every panel change as it is broadcast.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CaptureControls, ControlPanel, PanelSnapshot, UiEvent};
use crate::engine::EngineCommand;
use crate::upload::{Category, UploadError};

pub const HELP: &str = "\
Commands:
  share                         start screen sharing
  unshare                       stop screen sharing (stops any recording)
  record                        start recording the shared screen
  stop                          stop recording and upload it
  upload <type> <files...>      upload files as audio, video or video-audio
  status                        show the control panel
  help                          show this help
  quit                          finish uploads and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Engine(EngineCommand),
    Status,
    Help,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command '{0}' (type 'help' for a list)")]
    Unknown(String),

    #[error("usage: upload <audio|video|video-audio> <files...>")]
    MissingType,

    #[error(transparent)]
    Category(#[from] UploadError),
}

/// Parse one console line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };

    let parsed = match command.to_ascii_lowercase().as_str() {
        "share" => ConsoleCommand::Engine(EngineCommand::StartSharing),
        "unshare" => ConsoleCommand::Engine(EngineCommand::StopSharing),
        "record" => ConsoleCommand::Engine(EngineCommand::StartRecording),
        "stop" => ConsoleCommand::Engine(EngineCommand::StopRecording),
        "upload" => {
            let category: Category = words.next().ok_or(CommandError::MissingType)?.parse()?;
            // An empty selection is forwarded so the uploader can report it
            let paths = words.map(PathBuf::from).collect();
            ConsoleCommand::Engine(EngineCommand::Upload { category, paths })
        }
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Engine(EngineCommand::Shutdown),
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(parsed))
}

fn describe_controls(controls: &CaptureControls) -> String {
    let available: Vec<&str> = [
        (controls.start_sharing, "share"),
        (controls.stop_sharing, "unshare"),
        (controls.start_recording, "record"),
        (controls.stop_recording, "stop"),
    ]
    .into_iter()
    .filter_map(|(shown, name)| shown.then_some(name))
    .collect();
    available.join(", ")
}

/// One-line rendering of a panel change
pub fn describe(event: &UiEvent) -> String {
    match event {
        UiEvent::Status(update) => format!(
            "[{}] {}: {}",
            update.category,
            update.kind.as_str(),
            update.text
        ),
        UiEvent::UploadEnabled { category, enabled } => {
            if *enabled {
                format!("[{}] upload ready", category)
            } else {
                format!("[{}] upload busy", category)
            }
        }
        UiEvent::CaptureControls(controls) => format!("capture: {}", describe_controls(controls)),
        UiEvent::Alert(message) => format!("ALERT: {}", message),
        UiEvent::PreviewBound { stream_id } => format!("preview: showing stream {}", stream_id),
        UiEvent::PreviewCleared => "preview: cleared".to_string(),
    }
}

pub fn format_snapshot(snapshot: &PanelSnapshot) -> String {
    let mut lines = Vec::new();
    for category in Category::ALL {
        let control = if snapshot.disabled_uploads.contains(&category) {
            "busy"
        } else {
            "ready"
        };
        let status = snapshot
            .statuses
            .iter()
            .find(|status| status.category == category)
            .map(|status| format!("{}: {}", status.kind.as_str(), status.text))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!("{:<12} [{}] {}", category.as_str(), control, status));
    }
    lines.push(format!("capture      {}", describe_controls(&snapshot.capture)));
    lines.push(format!(
        "preview      {}",
        snapshot.preview_stream.as_deref().unwrap_or("none")
    ));
    lines.join("\n")
}

/// Print panel events until the panel goes away
pub fn spawn_renderer(panel: &ControlPanel) -> JoinHandle<()> {
    let mut events = panel.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!(
                    "[{}] {}",
                    chrono::Local::now().format("%H:%M:%S"),
                    describe(&event)
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Console fell behind; skipped {} panel event(s)", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Read commands from stdin until `quit` or end of input
pub async fn run_console(panel: Arc<ControlPanel>, cmd_tx: mpsc::Sender<EngineCommand>) -> Result<()> {
    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Help)) => println!("{}", HELP),
            Ok(Some(ConsoleCommand::Status)) => println!("{}", format_snapshot(&panel.snapshot())),
            Ok(Some(ConsoleCommand::Engine(cmd))) => {
                let quit = cmd == EngineCommand::Shutdown;
                if cmd_tx.send(cmd).await.is_err() {
                    debug!("Engine gone; closing console");
                    return Ok(());
                }
                if quit {
                    return Ok(());
                }
            }
            Err(e) => println!("{}", e),
        }
    }

    debug!("Console input closed");
    let _ = cmd_tx.send(EngineCommand::Shutdown).await;
    Ok(())
}
