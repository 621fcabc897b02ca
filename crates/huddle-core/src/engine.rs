//! Boundary to the native media engine.
//!
//! The engine owns audio/video transport and rendering. The core only drives
//! it through [`MediaEngine`] and listens to the [`EngineEvent`]s it pushes
//! into an [`EngineEventSink`](crate::bridge::EngineEventSink).

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::HuddleError;
use crate::provisioning::{AttendeeCredentials, MeetingCredentials};

/// Numeric video tile identifier assigned by the engine.
pub type TileId = u32;

/// Opaque handle of a platform render surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// Control surface of the native media engine.
///
/// Every call may fail independently. Implementations must tolerate `stop()`
/// being called after a failed `start()`.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn start(
        &self,
        meeting: &MeetingCredentials,
        attendee: &AttendeeCredentials,
    ) -> Result<(), HuddleError>;
    async fn stop(&self) -> Result<(), HuddleError>;
    async fn mute(&self) -> Result<(), HuddleError>;
    async fn unmute(&self) -> Result<(), HuddleError>;
    async fn start_local_video(&self) -> Result<(), HuddleError>;
    async fn stop_local_video(&self) -> Result<(), HuddleError>;
    async fn bind_video_view(&self, tile_id: TileId, surface: SurfaceId)
    -> Result<(), HuddleError>;
    async fn unbind_video_view(&self, tile_id: TileId) -> Result<(), HuddleError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStarted {
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnded {
    pub status_code: i32,
    pub timestamp: u64,
}

/// Attendees entering or leaving, as parallel id lists.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeUpdate {
    pub attendee_ids: Vec<String>,
    #[serde(default)]
    pub external_user_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeIds {
    pub attendee_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "u32")]
pub enum PauseState {
    #[default]
    Unpaused,
    PausedByUserRequest,
    PausedForPoorConnection,
    Other(u32),
}

impl From<u32> for PauseState {
    fn from(raw: u32) -> Self {
        match raw {
            0 => Self::Unpaused,
            1 => Self::PausedByUserRequest,
            2 => Self::PausedForPoorConnection,
            n => Self::Other(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileAdded {
    pub tile_id: TileId,
    pub attendee_id: String,
    pub is_local: bool,
    pub is_screen_share: bool,
    #[serde(default)]
    pub pause_state: PauseState,
    #[serde(default)]
    pub content_width: u32,
    #[serde(default)]
    pub content_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileRemoved {
    pub tile_id: TileId,
    pub attendee_id: String,
    pub is_local: bool,
    pub is_screen_share: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineFailure {
    pub message: String,
}

/// Raw events as emitted by the engine, one variant per event name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "name", content = "payload", rename_all = "camelCase")]
pub enum EngineEvent {
    SessionStarted(SessionStarted),
    SessionEnded(SessionEnded),
    AttendeesJoined(AttendeeUpdate),
    AttendeesLeft(AttendeeUpdate),
    /// Connection drop; carries the same payload as an explicit leave.
    AttendeesDropped(AttendeeUpdate),
    AttendeesMuted(AttendeeIds),
    AttendeesUnmuted(AttendeeIds),
    TileAdded(TileAdded),
    TileRemoved(TileRemoved),
    Error(EngineFailure),
}

impl EngineEvent {
    /// Decode an event from its name and JSON payload, the shape native
    /// engine bindings emit.
    pub fn decode(name: &str, payload: &str) -> Result<Self, HuddleError> {
        let payload: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| HuddleError::Engine(format!("malformed '{name}' payload: {e}")))?;
        serde_json::from_value(serde_json::json!({ "name": name, "payload": payload }))
            .map_err(|e| HuddleError::Engine(format!("unrecognised engine event '{name}': {e}")))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStarted(_) => "sessionStarted",
            Self::SessionEnded(_) => "sessionEnded",
            Self::AttendeesJoined(_) => "attendeesJoined",
            Self::AttendeesLeft(_) => "attendeesLeft",
            Self::AttendeesDropped(_) => "attendeesDropped",
            Self::AttendeesMuted(_) => "attendeesMuted",
            Self::AttendeesUnmuted(_) => "attendeesUnmuted",
            Self::TileAdded(_) => "tileAdded",
            Self::TileRemoved(_) => "tileRemoved",
            Self::Error(_) => "error",
        }
    }
}
