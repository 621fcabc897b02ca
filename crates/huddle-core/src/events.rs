use std::sync::{Arc, RwLock};

use crate::bridge::VideoTile;
use crate::engine::TileId;
use crate::errors::SessionError;
use crate::permissions::Capability;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Provisioning,
    Starting,
    Active,
    Stopping,
    Failed,
}

impl SessionState {
    /// A join or teardown is in flight.
    pub fn is_loading(self) -> bool {
        matches!(self, Self::Provisioning | Self::Starting | Self::Stopping)
    }

    /// The engine holds (or is acquiring) a live session.
    pub fn is_in_meeting(self) -> bool {
        matches!(self, Self::Starting | Self::Active)
    }
}

/// Events emitted by the controller to UI listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    ErrorChanged(Option<SessionError>),
    AttendeesJoined(Vec<String>),
    AttendeesLeft(Vec<String>),
    MuteChanged { attendee_ids: Vec<String>, muted: bool },
    LocalMuteChanged(bool),
    LocalVideoChanged(bool),
    TileAdded(VideoTile),
    TileRemoved(TileId),
    /// A permission is permanently denied; the UI should point to the system settings.
    OpenSettingsRequired(Capability),
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks) and must not block.
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
