//! capture-uploader
//!
//! Uploads audio and video files to an intake server in batches, and can
//! share, record and upload the screen.

mod capture;
mod config;
mod engine;
mod logging;
mod ui;
mod upload;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{error, info};

use capture::{CaptureSession, FfmpegDisplaySource, FfmpegRecorderFactory};
use config::Config;
use engine::{create_engine_channels, Engine, EngineCommand};
use ui::{console, ControlPanel, FfplayPreview, LogPreview, NullPreview, PreviewSurface};
use upload::{BatchUploader, Category, HttpTransport, UploadFile, UploadTransport};

#[derive(Parser)]
#[command(name = "capture-uploader", version)]
#[command(about = "Batch media uploads and screen recording for an intake server")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Intake server base URL, overriding the config file
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Upload files as one batch and exit
    Upload {
        /// Upload type: audio, video or video-audio
        #[arg(long = "type", value_name = "TYPE")]
        category: Category,

        /// Print the batch report as JSON
        #[arg(long)]
        json: bool,

        files: Vec<PathBuf>,
    },
    /// Interactive console with screen sharing and recording (default)
    Interactive,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_guard = logging::init_logging()?;
    info!("capture-uploader {} starting...", env!("CARGO_PKG_VERSION"));
    if let Ok(log_dir) = logging::get_log_dir() {
        info!("Logs are written to {:?}", log_dir);
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.set_base_url(server);
    }
    info!("Configuration loaded from {:?}", config.config_path());

    let runtime = Runtime::new()?;

    let all_succeeded = match cli.command.unwrap_or(Command::Interactive) {
        Command::Upload {
            category,
            json,
            files,
        } => runtime.block_on(run_upload(&config, category, files, json))?,
        Command::Interactive => {
            run_interactive(&runtime, config)?;
            true
        }
    };

    // stdin reads run on a blocking thread that cannot be cancelled
    runtime.shutdown_timeout(Duration::from_secs(1));
    info!("Shutdown complete");

    if !all_succeeded {
        drop(log_guard);
        std::process::exit(1);
    }
    Ok(())
}

/// Run one batch and print its report. Returns whether every file made it.
async fn run_upload(
    config: &Config,
    category: Category,
    paths: Vec<PathBuf>,
    json: bool,
) -> Result<bool> {
    let panel = ControlPanel::new(Box::new(NullPreview));
    let renderer = (!json).then(|| console::spawn_renderer(&panel));

    let transport: Arc<dyn UploadTransport> = Arc::new(HttpTransport::new(config));
    let uploader = BatchUploader::new(transport, config.upload.max_files_per_batch);
    let files = paths.into_iter().map(UploadFile::from_path).collect();

    let result = uploader.upload(category, files, &panel).await;

    // Closing the panel lets the renderer drain and exit
    drop(panel);
    if let Some(renderer) = renderer {
        let _ = renderer.await;
    }

    let report = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} of {} file(s) uploaded",
            report.succeeded(),
            report.files.len()
        );
    }
    Ok(report.all_succeeded())
}

fn run_interactive(runtime: &Runtime, config: Config) -> Result<()> {
    let preview: Box<dyn PreviewSurface> = if config.capture.preview {
        Box::new(FfplayPreview::new(config.capture.ffplay_path.clone()))
    } else {
        Box::new(LogPreview::default())
    };
    let panel = Arc::new(ControlPanel::new(preview));
    let (cmd_tx, cmd_rx) = create_engine_channels();

    // Set up Ctrl+C handler that sends shutdown command
    let ctrl_c_tx = cmd_tx.clone();
    let ctrl_c_handle = runtime.handle().clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        let tx = ctrl_c_tx.clone();
        ctrl_c_handle.spawn(async move {
            let _ = tx.send(EngineCommand::Shutdown).await;
        });
    })?;

    runtime.block_on(async move {
        let renderer = console::spawn_renderer(&panel);

        let http = HttpTransport::new(&config);
        info!("Recordings and batches are sent to {}", http.endpoint());
        let transport: Arc<dyn UploadTransport> = Arc::new(http);
        let session = CaptureSession::new(
            Arc::new(FfmpegDisplaySource::new(config.capture.clone())),
            Arc::new(FfmpegRecorderFactory::new(config.capture.clone())),
            transport.clone(),
            panel.clone(),
        );
        let uploader = BatchUploader::new(transport, config.upload.max_files_per_batch);
        let mut engine = Engine::new(session, uploader, panel.clone(), cmd_rx);

        let console_task = tokio::spawn(console::run_console(panel.clone(), cmd_tx));

        if let Err(e) = engine.run().await {
            error!("Engine error: {}", e);
        }

        console_task.abort();
        match console_task.await {
            Ok(Err(e)) => error!("Console error: {}", e),
            Ok(Ok(())) | Err(_) => {}
        }

        drop(engine);
        drop(panel);
        let _ = renderer.await;
    });

    Ok(())
}
