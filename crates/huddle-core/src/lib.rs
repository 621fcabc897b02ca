//! Huddle core session logic.
//!
//! Pure Rust crate with no platform dependencies. The native media engine,
//! OS permission prompts and the provisioning service sit behind traits;
//! native UI shells consume it via UniFFI bindings.

pub mod attendance;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod permissions;
pub mod provisioning;
pub mod session;
pub mod settings;
pub mod tiles;

pub use attendance::{AttendanceRegistry, Attendee};
pub use bridge::{AttendeeRef, BridgeMessage, EngineEventSink, EventBridge, VideoTile};
pub use config::{ControllerOptions, ProvisioningConfig};
pub use engine::{EngineEvent, MediaEngine, PauseState, SurfaceId, TileId};
pub use errors::{ErrorKind, HuddleError, SessionError};
pub use events::{SessionEvent, SessionEventListener, SessionState};
pub use permissions::{
    Capability, PermissionBackend, PermissionGate, PermissionOutcome, PermissionStatus, Platform,
};
pub use provisioning::{
    AttendeeCredentials, JoinCredentials, MeetingCredentials, Provisioner, ProvisioningClient,
};
pub use session::{SessionController, SessionDeps, SessionSnapshot};
pub use settings::{Settings, SettingsStore};
pub use tiles::VideoTileRegistry;
