//! Display-capture streams and the trait that acquires them

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::CaptureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Backend input a track reads from (an ffmpeg `-f <format> -i <device>` pair)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSource {
    pub format: String,
    pub device: String,
}

impl TrackSource {
    pub fn new(format: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            device: device.into(),
        }
    }
}

/// One live audio or video track.
///
/// Clones share the same liveness flag, so stopping any clone stops the
/// track for every holder.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    kind: TrackKind,
    label: String,
    source: TrackSource,
    live: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>, source: TrackSource) -> Self {
        Self {
            kind,
            label: label.into(),
            source,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &TrackSource {
        &self.source
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            debug!("Stopped {:?} track '{}'", self.kind, self.label);
        }
    }
}

/// A live display-capture feed
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn live_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|track| track.is_live())
    }

    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.live_tracks().any(|track| track.kind() == kind)
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.live_tracks().next().is_some()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Which tracks to request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConstraints {
    pub video: bool,
    pub audio: bool,
}

impl StreamConstraints {
    pub const VIDEO_AND_AUDIO: Self = Self {
        video: true,
        audio: true,
    };
}

/// Acquires a live stream from screen sharing
#[async_trait]
pub trait DisplaySource: Send + Sync {
    async fn acquire(&self, constraints: StreamConstraints) -> Result<MediaStream, CaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> MediaStream {
        MediaStream::new(vec![
            MediaTrack::new(TrackKind::Video, "screen", TrackSource::new("x11grab", ":0.0")),
            MediaTrack::new(TrackKind::Audio, "system", TrackSource::new("pulse", "default")),
        ])
    }

    #[test]
    fn test_stop_all_ends_stream() {
        let stream = stream();
        assert!(stream.is_active());
        assert!(stream.has_track(TrackKind::Audio));

        stream.stop_all();
        assert!(!stream.is_active());
        assert_eq!(stream.live_tracks().count(), 0);
    }

    #[test]
    fn test_clones_share_liveness() {
        let stream = stream();
        let copy = stream.clone();
        copy.tracks()[1].stop();

        assert!(!stream.has_track(TrackKind::Audio));
        assert!(stream.has_track(TrackKind::Video));
        assert_eq!(stream.id(), copy.id());
    }
}
