//! Control panel, preview surfaces and the interactive console
//!
//! The panel holds the state of every upload control, status display and
//! capture button. Each change is also broadcast as a [`UiEvent`] so the
//! console (or tests) can render it.

pub mod console;
mod preview;

pub use preview::{FfplayPreview, LogPreview, NullPreview, PreviewSurface};

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::capture::MediaStream;
use crate::upload::{Category, StatusUpdate};

const EVENT_CAPACITY: usize = 1024;

/// Visibility of the four capture buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureControls {
    pub start_sharing: bool,
    pub stop_sharing: bool,
    pub start_recording: bool,
    pub stop_recording: bool,
}

impl CaptureControls {
    pub const IDLE: Self = Self {
        start_sharing: true,
        stop_sharing: false,
        start_recording: false,
        stop_recording: false,
    };

    pub const SHARING: Self = Self {
        start_sharing: false,
        stop_sharing: true,
        start_recording: true,
        stop_recording: false,
    };

    pub const RECORDING: Self = Self {
        start_sharing: false,
        stop_sharing: true,
        start_recording: false,
        stop_recording: true,
    };
}

impl Default for CaptureControls {
    fn default() -> Self {
        Self::IDLE
    }
}

/// A change on the panel
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Status(StatusUpdate),
    UploadEnabled { category: Category, enabled: bool },
    CaptureControls(CaptureControls),
    /// Blocking message the user has to acknowledge
    Alert(String),
    PreviewBound { stream_id: String },
    PreviewCleared,
}

#[derive(Debug, Default)]
struct PanelState {
    statuses: HashMap<Category, StatusUpdate>,
    disabled_uploads: Vec<Category>,
    capture: CaptureControls,
    preview_stream: Option<String>,
}

/// Point-in-time copy of the panel for the `status` command
#[derive(Debug, Clone)]
pub struct PanelSnapshot {
    pub statuses: Vec<StatusUpdate>,
    pub disabled_uploads: Vec<Category>,
    pub capture: CaptureControls,
    pub preview_stream: Option<String>,
}

pub struct ControlPanel {
    state: RwLock<PanelState>,
    preview: Mutex<Box<dyn PreviewSurface>>,
    events: broadcast::Sender<UiEvent>,
}

impl ControlPanel {
    pub fn new(preview: Box<dyn PreviewSurface>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(PanelState::default()),
            preview: Mutex::new(preview),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: UiEvent) {
        // No subscribers is fine: the panel state is still updated
        let _ = self.events.send(event);
    }

    fn update_state<F>(&self, f: F)
    where
        F: FnOnce(&mut PanelState),
    {
        match self.state.write() {
            Ok(mut state) => f(&mut state),
            Err(_) => error!("Control panel state lock poisoned"),
        }
    }

    pub fn set_status(&self, update: StatusUpdate) {
        self.update_state(|state| {
            state.statuses.insert(update.category, update.clone());
        });
        self.emit(UiEvent::Status(update));
    }

    #[cfg(test)]
    pub fn status(&self, category: Category) -> Option<StatusUpdate> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.statuses.get(&category).cloned())
    }

    pub fn set_upload_enabled(&self, category: Category, enabled: bool) {
        self.update_state(|state| {
            state.disabled_uploads.retain(|c| *c != category);
            if !enabled {
                state.disabled_uploads.push(category);
            }
        });
        self.emit(UiEvent::UploadEnabled { category, enabled });
    }

    pub fn is_upload_enabled(&self, category: Category) -> bool {
        self.state
            .read()
            .map(|state| !state.disabled_uploads.contains(&category))
            .unwrap_or(true)
    }

    pub fn set_capture_controls(&self, controls: CaptureControls) {
        self.update_state(|state| state.capture = controls);
        self.emit(UiEvent::CaptureControls(controls));
    }

    #[cfg(test)]
    pub fn capture_controls(&self) -> CaptureControls {
        self.state
            .read()
            .map(|state| state.capture)
            .unwrap_or_default()
    }

    pub fn alert(&self, message: &str) {
        warn!("Alert: {}", message);
        self.emit(UiEvent::Alert(message.to_string()));
    }

    /// Show `stream` on the preview surface. A preview failure is logged
    /// and never blocks sharing.
    pub fn bind_preview(&self, stream: &MediaStream) {
        match self.preview.lock() {
            Ok(mut preview) => {
                if let Err(e) = preview.bind(stream) {
                    warn!("Preview unavailable: {}", e);
                }
            }
            Err(_) => error!("Preview lock poisoned"),
        }
        self.update_state(|state| state.preview_stream = Some(stream.id().to_string()));
        self.emit(UiEvent::PreviewBound {
            stream_id: stream.id().to_string(),
        });
    }

    pub fn clear_preview(&self) {
        match self.preview.lock() {
            Ok(mut preview) => preview.clear(),
            Err(_) => error!("Preview lock poisoned"),
        }
        self.update_state(|state| state.preview_stream = None);
        self.emit(UiEvent::PreviewCleared);
    }

    #[cfg(test)]
    pub fn preview_stream(&self) -> Option<String> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.preview_stream.clone())
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let statuses = Category::ALL
            .iter()
            .filter_map(|category| state.statuses.get(category).cloned())
            .collect();

        PanelSnapshot {
            statuses,
            disabled_uploads: state.disabled_uploads.clone(),
            capture: state.capture,
            preview_stream: state.preview_stream.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{MediaTrack, TrackKind, TrackSource};

    #[test]
    fn test_upload_controls_start_enabled() {
        let panel = ControlPanel::new(Box::new(NullPreview));
        for category in Category::ALL {
            assert!(panel.is_upload_enabled(category));
        }

        panel.set_upload_enabled(Category::Video, false);
        assert!(!panel.is_upload_enabled(Category::Video));
        assert!(panel.is_upload_enabled(Category::Audio));

        panel.set_upload_enabled(Category::Video, true);
        assert!(panel.is_upload_enabled(Category::Video));
        assert!(panel.snapshot().disabled_uploads.is_empty());
    }

    #[test]
    fn test_status_is_last_write_wins() {
        let panel = ControlPanel::new(Box::new(NullPreview));
        panel.set_status(StatusUpdate::pending(Category::Audio, "first"));
        panel.set_status(StatusUpdate::success(Category::Audio, "second"));
        panel.set_status(StatusUpdate::error(Category::Video, "other"));

        assert_eq!(panel.status(Category::Audio).unwrap().text, "second");
        assert_eq!(panel.snapshot().statuses.len(), 2);
    }

    #[test]
    fn test_preview_binding_is_broadcast() {
        let panel = ControlPanel::new(Box::new(NullPreview));
        let mut rx = panel.subscribe();
        let stream = MediaStream::new(vec![MediaTrack::new(
            TrackKind::Video,
            "screen",
            TrackSource::new("x11grab", ":0.0"),
        )]);

        panel.bind_preview(&stream);
        assert_eq!(panel.preview_stream().as_deref(), Some(stream.id()));
        panel.clear_preview();
        assert_eq!(panel.preview_stream(), None);

        assert_eq!(
            rx.try_recv().unwrap(),
            UiEvent::PreviewBound {
                stream_id: stream.id().to_string()
            }
        );
        assert_eq!(rx.try_recv().unwrap(), UiEvent::PreviewCleared);
    }
}
