//! Ordered delivery of engine events to the session controller.

use tokio::sync::mpsc;

use crate::engine::{AttendeeUpdate, EngineEvent, PauseState, TileId};
use crate::errors::HuddleError;

/// An attendee as reported by a join event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendeeRef {
    pub attendee_id: String,
    pub external_user_id: String,
}

/// A video tile as the controller tracks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTile {
    pub tile_id: TileId,
    pub attendee_id: String,
    pub is_local: bool,
    pub is_screen_share: bool,
    pub pause_state: PauseState,
    pub content_width: u32,
    pub content_height: u32,
}

/// Engine events after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeMessage {
    SessionStarted { timestamp: u64 },
    SessionEnded { status_code: i32 },
    AttendeesJoined(Vec<AttendeeRef>),
    /// Explicit leave and connection drop alike.
    AttendeesLeft(Vec<String>),
    AttendeesMuted(Vec<String>),
    AttendeesUnmuted(Vec<String>),
    TileAdded(VideoTile),
    TileRemoved(TileId),
    Error(String),
}

impl From<EngineEvent> for BridgeMessage {
    fn from(event: EngineEvent) -> Self {
        match event {
            EngineEvent::SessionStarted(e) => Self::SessionStarted { timestamp: e.timestamp },
            EngineEvent::SessionEnded(e) => Self::SessionEnded { status_code: e.status_code },
            EngineEvent::AttendeesJoined(update) => Self::AttendeesJoined(pair_ids(update)),
            EngineEvent::AttendeesLeft(update) | EngineEvent::AttendeesDropped(update) => {
                Self::AttendeesLeft(update.attendee_ids)
            }
            EngineEvent::AttendeesMuted(e) => Self::AttendeesMuted(e.attendee_ids),
            EngineEvent::AttendeesUnmuted(e) => Self::AttendeesUnmuted(e.attendee_ids),
            EngineEvent::TileAdded(t) => Self::TileAdded(VideoTile {
                tile_id: t.tile_id,
                attendee_id: t.attendee_id,
                is_local: t.is_local,
                is_screen_share: t.is_screen_share,
                pause_state: t.pause_state,
                content_width: t.content_width,
                content_height: t.content_height,
            }),
            EngineEvent::TileRemoved(t) => Self::TileRemoved(t.tile_id),
            EngineEvent::Error(e) => Self::Error(e.message),
        }
    }
}

/// Zip the parallel id lists; a missing external id becomes empty.
fn pair_ids(update: AttendeeUpdate) -> Vec<AttendeeRef> {
    let mut external = update.external_user_ids.into_iter();
    update
        .attendee_ids
        .into_iter()
        .map(|attendee_id| AttendeeRef {
            attendee_id,
            external_user_id: external.next().unwrap_or_default(),
        })
        .collect()
}

/// Producer half handed to the engine binding.
///
/// Cloneable; all clones feed the same ordered queue.
#[derive(Clone, Debug)]
pub struct EngineEventSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl EngineEventSink {
    /// Queue an event, waiting for room if the controller is behind.
    pub async fn emit(&self, event: EngineEvent) -> Result<(), HuddleError> {
        tracing::debug!("engine event queued: {}", event.name());
        self.tx
            .send(event)
            .await
            .map_err(|_| HuddleError::State("session controller is gone".into()))
    }

    /// Blocking variant for foreign threads outside the async runtime.
    pub fn blocking_emit(&self, event: EngineEvent) -> Result<(), HuddleError> {
        tracing::debug!("engine event queued: {}", event.name());
        self.tx
            .blocking_send(event)
            .map_err(|_| HuddleError::State("session controller is gone".into()))
    }

    /// Decode a named JSON event and queue it.
    pub async fn emit_raw(&self, name: &str, payload: &str) -> Result<(), HuddleError> {
        self.emit(EngineEvent::decode(name, payload)?).await
    }
}

/// Consumer half owned by the session controller.
#[derive(Debug)]
pub struct EventBridge {
    rx: mpsc::Receiver<EngineEvent>,
}

impl EventBridge {
    /// Create the single subscription to an engine's event stream.
    pub fn channel(capacity: usize) -> (EngineEventSink, EventBridge) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (EngineEventSink { tx }, EventBridge { rx })
    }

    /// Next event in emission order, or `None` once every sink is dropped.
    pub async fn recv(&mut self) -> Option<BridgeMessage> {
        self.rx.recv().await.map(BridgeMessage::from)
    }
}
