//! Live preview of the shared stream

use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

use crate::capture::{CaptureError, MediaStream, TrackKind, TrackSource};

/// Somewhere a shared stream can be shown while sharing
pub trait PreviewSurface: Send {
    fn bind(&mut self, stream: &MediaStream) -> Result<(), CaptureError>;
    fn clear(&mut self);
}

/// Shows nothing
pub struct NullPreview;

impl PreviewSurface for NullPreview {
    fn bind(&mut self, _stream: &MediaStream) -> Result<(), CaptureError> {
        Ok(())
    }

    fn clear(&mut self) {}
}

/// Reports the bound stream in the log, for headless sessions
#[derive(Default)]
pub struct LogPreview {
    bound: Option<String>,
}

impl PreviewSurface for LogPreview {
    fn bind(&mut self, stream: &MediaStream) -> Result<(), CaptureError> {
        let labels: Vec<&str> = stream.live_tracks().map(|track| track.label()).collect();
        info!("Previewing stream {} [{}]", stream.id(), labels.join(", "));
        self.bound = Some(stream.id().to_string());
        Ok(())
    }

    fn clear(&mut self) {
        if let Some(id) = self.bound.take() {
            info!("Preview of stream {} cleared", id);
        }
    }
}

/// Opens an ffplay window on the video track's input
pub struct FfplayPreview {
    program: String,
    child: Option<Child>,
}

impl FfplayPreview {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            child: None,
        }
    }
}

fn ffplay_args(source: &TrackSource) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-window_title".into(),
        "Screen preview".into(),
        "-f".into(),
        source.format.clone(),
        "-i".into(),
        source.device.clone(),
    ]
}

impl PreviewSurface for FfplayPreview {
    fn bind(&mut self, stream: &MediaStream) -> Result<(), CaptureError> {
        self.clear();

        let track = stream
            .live_tracks()
            .find(|track| track.kind() == TrackKind::Video)
            .ok_or(CaptureError::NoLiveTracks)?;

        let child = Command::new(&self.program)
            .args(ffplay_args(track.source()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CaptureError::Unavailable(format!("failed to run {}: {}", self.program, e)))?;

        debug!("ffplay preview started (pid {})", child.id());
        self.child = Some(child);
        Ok(())
    }

    fn clear(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                warn!("Failed to close preview window: {}", e);
            }
            let _ = child.wait();
        }
    }
}

impl Drop for FfplayPreview {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MediaTrack;

    #[test]
    fn test_ffplay_reads_video_source() {
        let args = ffplay_args(&TrackSource::new("x11grab", ":0.0+0,0"));
        assert_eq!(&args[args.len() - 4..], ["-f", "x11grab", "-i", ":0.0+0,0"]);
    }

    #[test]
    fn test_ffplay_needs_video_track() {
        let mut preview = FfplayPreview::new("ffplay");
        let stream = MediaStream::new(vec![MediaTrack::new(
            TrackKind::Audio,
            "system",
            TrackSource::new("pulse", "default"),
        )]);

        assert!(matches!(preview.bind(&stream), Err(CaptureError::NoLiveTracks)));
    }

    #[test]
    fn test_missing_ffplay_is_reported() {
        let mut preview = FfplayPreview::new("/nonexistent/ffplay");
        let stream = MediaStream::new(vec![MediaTrack::new(
            TrackKind::Video,
            "screen",
            TrackSource::new("x11grab", ":0.0"),
        )]);

        assert!(matches!(preview.bind(&stream), Err(CaptureError::Unavailable(_))));
        preview.clear();
    }
}
