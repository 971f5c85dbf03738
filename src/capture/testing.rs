//! In-memory capture backends for tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::recorder::{
    MediaRecorder, RecorderEvent, RecorderFactory, RecorderState, RECORDING_MIME_TYPE,
};
use super::source::{
    DisplaySource, MediaStream, MediaTrack, StreamConstraints, TrackKind, TrackSource,
};
use super::CaptureError;

/// Hands out a video+audio stream, or refuses like a denied permission prompt
pub struct FakeSource {
    pub deny: bool,
}

#[async_trait]
impl DisplaySource for FakeSource {
    async fn acquire(&self, constraints: StreamConstraints) -> Result<MediaStream, CaptureError> {
        if self.deny {
            return Err(CaptureError::Denied("Permission denied".to_string()));
        }
        assert_eq!(constraints, StreamConstraints::VIDEO_AND_AUDIO);
        Ok(MediaStream::new(vec![
            MediaTrack::new(TrackKind::Video, "screen", TrackSource::new("fake", "screen")),
            MediaTrack::new(TrackKind::Audio, "system", TrackSource::new("fake", "audio")),
        ]))
    }
}

/// What the fake recorders observed
#[derive(Default)]
pub struct RecorderLog {
    pub created: AtomicUsize,
    pub stops: AtomicUsize,
    pub tracks_live_at_stop: Mutex<Vec<bool>>,
}

/// Recorder `n` emits `rn-a|` on start and `rn-b` on stop, unless silent.
/// With `ends_itself` it reports `Stopped` right after starting, like an
/// encoder that exits early.
#[derive(Default)]
pub struct FakeRecorders {
    pub log: Arc<RecorderLog>,
    pub silent: bool,
    pub ends_itself: bool,
}

struct FakeRecorder {
    number: usize,
    silent: bool,
    ends_itself: bool,
    tracks: Vec<MediaTrack>,
    log: Arc<RecorderLog>,
    events: Option<mpsc::UnboundedSender<RecorderEvent>>,
    state: RecorderState,
}

impl RecorderFactory for FakeRecorders {
    fn create(
        &self,
        stream: &MediaStream,
        mime_type: &str,
    ) -> Result<Box<dyn MediaRecorder>, CaptureError> {
        assert_eq!(mime_type, RECORDING_MIME_TYPE);
        let number = self.log.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(FakeRecorder {
            number,
            silent: self.silent,
            ends_itself: self.ends_itself,
            tracks: stream.tracks().to_vec(),
            log: self.log.clone(),
            events: None,
            state: RecorderState::Inactive,
        }))
    }
}

#[async_trait]
impl MediaRecorder for FakeRecorder {
    fn state(&self) -> RecorderState {
        self.state
    }

    async fn start(&mut self, events: mpsc::UnboundedSender<RecorderEvent>) -> Result<(), CaptureError> {
        if !self.silent {
            events
                .send(RecorderEvent::Data(format!("r{}-a|", self.number).into_bytes()))
                .unwrap();
        }
        events.send(RecorderEvent::Data(Vec::new())).unwrap();
        if self.ends_itself {
            events.send(RecorderEvent::Stopped).unwrap();
            return Ok(());
        }
        self.events = Some(events);
        self.state = RecorderState::Recording;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.log.stops.fetch_add(1, Ordering::SeqCst);
        self.log
            .tracks_live_at_stop
            .lock()
            .unwrap()
            .push(self.tracks.iter().all(MediaTrack::is_live));

        let events = self.events.take().unwrap();
        if !self.silent {
            events
                .send(RecorderEvent::Data(format!("r{}-b", self.number).into_bytes()))
                .unwrap();
        }
        events.send(RecorderEvent::Stopped).unwrap();
        self.state = RecorderState::Inactive;
        Ok(())
    }
}
