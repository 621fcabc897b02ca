//! UniFFI bindings for huddle-core.
//!
//! Provides a HuddleClient object that wraps the session controller, the
//! provisioning client and the settings store into a single FFI-safe
//! interface. The native media engine and OS permission prompts are supplied
//! by the host as callback interfaces.

use std::sync::Arc;

use async_trait::async_trait;
use huddle_core::{
    AttendeeCredentials, ControllerOptions, EngineEvent, EngineEventSink, JoinCredentials,
    MeetingCredentials, PauseState, PermissionGate, ProvisioningClient, ProvisioningConfig,
    SessionController, SessionDeps, SettingsStore, SurfaceId, TileId,
    errors::{
        ErrorKind as CoreErrorKind, HuddleError as CoreError, SessionError as CoreSessionError,
    },
    events::{SessionEvent as CoreSessionEvent, SessionState as CoreSessionState},
    permissions::{Capability as CoreCapability, PermissionStatus as CorePermissionStatus},
    session::SessionSnapshot as CoreSessionSnapshot,
};
use secrecy::ExposeSecret;

uniffi::include_scaffolding!("huddle");

// ── Namespace functions ──────────────────────────────────────────────

/// Initialize tracing/logging. Call once from the host before creating a HuddleClient.
/// On Android, stderr goes to logcat for debuggable builds.
fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("huddle_core=debug,huddle_ffi=debug")
        });
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .try_init();
    });
}

// ── FFI-safe type conversions ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Provisioning,
    Starting,
    Active,
    Stopping,
    Failed,
}

impl From<CoreSessionState> for SessionState {
    fn from(s: CoreSessionState) -> Self {
        match s {
            CoreSessionState::Idle => Self::Idle,
            CoreSessionState::Provisioning => Self::Provisioning,
            CoreSessionState::Starting => Self::Starting,
            CoreSessionState::Active => Self::Active,
            CoreSessionState::Stopping => Self::Stopping,
            CoreSessionState::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Permission,
    Provisioning,
    Engine,
    Timeout,
    State,
    Config,
}

impl From<CoreErrorKind> for ErrorKind {
    fn from(k: CoreErrorKind) -> Self {
        match k {
            CoreErrorKind::Permission => Self::Permission,
            CoreErrorKind::Provisioning => Self::Provisioning,
            CoreErrorKind::Engine => Self::Engine,
            CoreErrorKind::Timeout => Self::Timeout,
            CoreErrorKind::State => Self::State,
            CoreErrorKind::Config => Self::Config,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Microphone,
    Camera,
}

impl From<CoreCapability> for Capability {
    fn from(c: CoreCapability) -> Self {
        match c {
            CoreCapability::Microphone => Self::Microphone,
            CoreCapability::Camera => Self::Camera,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Blocked,
    Unavailable,
}

impl From<PermissionStatus> for CorePermissionStatus {
    fn from(s: PermissionStatus) -> Self {
        match s {
            PermissionStatus::Granted => Self::Granted,
            PermissionStatus::Denied => Self::Denied,
            PermissionStatus::Blocked => Self::Blocked,
            PermissionStatus::Unavailable => Self::Unavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<CoreSessionError> for SessionError {
    fn from(e: CoreSessionError) -> Self {
        Self {
            kind: e.kind.into(),
            message: e.message,
            retryable: e.retryable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendeeInfo {
    pub id: String,
    pub external_user_id: String,
    pub muted: bool,
}

impl From<huddle_core::Attendee> for AttendeeInfo {
    fn from(a: huddle_core::Attendee) -> Self {
        Self {
            id: a.id,
            external_user_id: a.external_user_id,
            muted: a.muted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTileInfo {
    pub tile_id: u32,
    pub attendee_id: String,
    pub is_local: bool,
    pub is_screen_share: bool,
    pub paused: bool,
    pub content_width: u32,
    pub content_height: u32,
}

impl From<huddle_core::VideoTile> for VideoTileInfo {
    fn from(t: huddle_core::VideoTile) -> Self {
        Self {
            tile_id: t.tile_id,
            attendee_id: t.attendee_id,
            is_local: t.is_local,
            is_screen_share: t.is_screen_share,
            paused: t.pause_state != PauseState::Unpaused,
            content_width: t.content_width,
            content_height: t.content_height,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub error: Option<SessionError>,
    pub attendees: Vec<AttendeeInfo>,
    pub tiles: Vec<VideoTileInfo>,
    pub local_muted: bool,
    pub video_enabled: bool,
    pub is_loading: bool,
    pub is_in_meeting: bool,
    pub meeting_id: Option<String>,
    pub local_attendee_id: Option<String>,
}

impl From<CoreSessionSnapshot> for SessionSnapshot {
    fn from(s: CoreSessionSnapshot) -> Self {
        Self {
            is_loading: s.is_loading(),
            is_in_meeting: s.is_in_meeting(),
            state: s.state.into(),
            error: s.error.map(SessionError::from),
            attendees: s.attendees.into_iter().map(AttendeeInfo::from).collect(),
            tiles: s.tiles.into_iter().map(VideoTileInfo::from).collect(),
            local_muted: s.local_muted,
            video_enabled: s.video_enabled,
            meeting_id: s.meeting_id,
            local_attendee_id: s.local_attendee_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub display_name: Option<String>,
    pub region: Option<String>,
    pub video_enabled_on_join: bool,
}

impl From<huddle_core::Settings> for Settings {
    fn from(s: huddle_core::Settings) -> Self {
        Self {
            display_name: s.display_name,
            region: s.region,
            video_enabled_on_join: s.video_enabled_on_join,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingInfo {
    pub meeting_id: String,
    pub external_meeting_id: String,
    pub media_region: String,
    pub audio_host_url: String,
    pub audio_fallback_url: String,
    pub signaling_url: String,
    pub turn_control_url: String,
}

impl From<&MeetingCredentials> for MeetingInfo {
    fn from(m: &MeetingCredentials) -> Self {
        Self {
            meeting_id: m.meeting_id.clone(),
            external_meeting_id: m.external_meeting_id.clone(),
            media_region: m.media_region.clone(),
            audio_host_url: m.media_placement.audio_host_url.clone(),
            audio_fallback_url: m.media_placement.audio_fallback_url.clone(),
            signaling_url: m.media_placement.signaling_url.clone(),
            turn_control_url: m.media_placement.turn_control_url.clone(),
        }
    }
}

/// Attendee credentials as handed to the native engine, token included.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinAttendee {
    pub attendee_id: String,
    pub external_user_id: String,
    pub join_token: String,
}

impl From<&AttendeeCredentials> for JoinAttendee {
    fn from(a: &AttendeeCredentials) -> Self {
        Self {
            attendee_id: a.attendee_id.clone(),
            external_user_id: a.external_user_id.clone(),
            join_token: a.join_token.expose_secret().to_string(),
        }
    }
}

impl std::fmt::Debug for JoinAttendee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinAttendee")
            .field("attendee_id", &self.attendee_id)
            .field("external_user_id", &self.external_user_id)
            .field("join_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged { state: SessionState },
    ErrorChanged { error: Option<SessionError> },
    AttendeesJoined { attendee_ids: Vec<String> },
    AttendeesLeft { attendee_ids: Vec<String> },
    MuteChanged { attendee_ids: Vec<String>, muted: bool },
    LocalMuteChanged { muted: bool },
    LocalVideoChanged { enabled: bool },
    TileAdded { tile: VideoTileInfo },
    TileRemoved { tile_id: u32 },
    OpenSettingsRequired { capability: Capability },
}

impl From<CoreSessionEvent> for SessionEvent {
    fn from(e: CoreSessionEvent) -> Self {
        match e {
            CoreSessionEvent::StateChanged(state) => Self::StateChanged { state: state.into() },
            CoreSessionEvent::ErrorChanged(error) => {
                Self::ErrorChanged { error: error.map(SessionError::from) }
            }
            CoreSessionEvent::AttendeesJoined(attendee_ids) => {
                Self::AttendeesJoined { attendee_ids }
            }
            CoreSessionEvent::AttendeesLeft(attendee_ids) => Self::AttendeesLeft { attendee_ids },
            CoreSessionEvent::MuteChanged { attendee_ids, muted } => {
                Self::MuteChanged { attendee_ids, muted }
            }
            CoreSessionEvent::LocalMuteChanged(muted) => Self::LocalMuteChanged { muted },
            CoreSessionEvent::LocalVideoChanged(enabled) => Self::LocalVideoChanged { enabled },
            CoreSessionEvent::TileAdded(tile) => Self::TileAdded { tile: tile.into() },
            CoreSessionEvent::TileRemoved(tile_id) => Self::TileRemoved { tile_id },
            CoreSessionEvent::OpenSettingsRequired(capability) => {
                Self::OpenSettingsRequired { capability: capability.into() }
            }
        }
    }
}

// ── Error conversion ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum HuddleError {
    #[error("Permission error: {msg}")]
    Permission { msg: String, open_settings: bool },
    #[error("Provisioning error: {msg}")]
    Provisioning { msg: String, status: Option<u16> },
    #[error("Engine error: {msg}")]
    Engine { msg: String },
    #[error("Timeout: {msg}")]
    Timeout { msg: String },
    #[error("State error: {msg}")]
    State { msg: String },
    #[error("Config error: {msg}")]
    Config { msg: String },
    #[error("Cancelled: {msg}")]
    Cancelled { msg: String },
    #[error("Callback error: {msg}")]
    Callback { msg: String },
}

impl From<CoreError> for HuddleError {
    fn from(e: CoreError) -> Self {
        tracing::error!("HuddleError: {e}");
        match e {
            CoreError::Permission { message, open_settings } => {
                Self::Permission { msg: message, open_settings }
            }
            CoreError::Provisioning { message, status, .. } => {
                Self::Provisioning { msg: message, status }
            }
            CoreError::Engine(msg) => Self::Engine { msg },
            CoreError::Timeout(msg) => Self::Timeout { msg },
            CoreError::State(msg) => Self::State { msg },
            CoreError::Config(msg) => Self::Config { msg },
            CoreError::Cancelled => Self::Cancelled { msg: "join cancelled by leave".into() },
        }
    }
}

/// Errors raised by host callbacks, mapped back into the core taxonomy.
impl From<HuddleError> for CoreError {
    fn from(e: HuddleError) -> Self {
        match e {
            HuddleError::Permission { msg, open_settings } => {
                CoreError::Permission { message: msg, open_settings }
            }
            HuddleError::Timeout { msg } => CoreError::Timeout(msg),
            other => CoreError::Engine(other.to_string()),
        }
    }
}

impl From<uniffi::UnexpectedUniFFICallbackError> for HuddleError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::Callback { msg: e.reason }
    }
}

// ── Callback interfaces ───────────────────────────────────────────────

pub trait SessionListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Host-side media engine. Calls may block; they run off the async runtime.
pub trait NativeMediaEngine: Send + Sync {
    fn start(&self, meeting: MeetingInfo, attendee: JoinAttendee) -> Result<(), HuddleError>;
    fn stop(&self) -> Result<(), HuddleError>;
    fn mute(&self) -> Result<(), HuddleError>;
    fn unmute(&self) -> Result<(), HuddleError>;
    fn start_local_video(&self) -> Result<(), HuddleError>;
    fn stop_local_video(&self) -> Result<(), HuddleError>;
    fn bind_video_view(&self, tile_id: u32, surface_id: u64) -> Result<(), HuddleError>;
    fn unbind_video_view(&self, tile_id: u32) -> Result<(), HuddleError>;
}

pub trait NativePermissions: Send + Sync {
    fn check(&self, permission: String) -> Result<PermissionStatus, HuddleError>;
    fn request(&self, permission: String) -> Result<PermissionStatus, HuddleError>;
}

// ── Bridges: FFI callbacks → core traits ──────────────────────────────

struct BridgeListener {
    ffi_listener: Arc<dyn SessionListener>,
}

impl huddle_core::SessionEventListener for BridgeListener {
    fn on_event(&self, event: CoreSessionEvent) {
        self.ffi_listener.on_event(event.into());
    }
}

struct BridgeEngine {
    native: Arc<dyn NativeMediaEngine>,
}

impl BridgeEngine {
    async fn call(
        &self,
        op: &'static str,
        f: impl FnOnce(&dyn NativeMediaEngine) -> Result<(), HuddleError> + Send + 'static,
    ) -> Result<(), CoreError> {
        let native = Arc::clone(&self.native);
        tokio::task::spawn_blocking(move || f(native.as_ref()))
            .await
            .map_err(|e| CoreError::Engine(format!("native {op} did not complete: {e}")))?
            .map_err(CoreError::from)
    }
}

#[async_trait]
impl huddle_core::MediaEngine for BridgeEngine {
    async fn start(
        &self,
        meeting: &MeetingCredentials,
        attendee: &AttendeeCredentials,
    ) -> Result<(), CoreError> {
        let meeting = MeetingInfo::from(meeting);
        let attendee = JoinAttendee::from(attendee);
        self.call("start", move |n| n.start(meeting, attendee)).await
    }

    async fn stop(&self) -> Result<(), CoreError> {
        self.call("stop", |n| n.stop()).await
    }

    async fn mute(&self) -> Result<(), CoreError> {
        self.call("mute", |n| n.mute()).await
    }

    async fn unmute(&self) -> Result<(), CoreError> {
        self.call("unmute", |n| n.unmute()).await
    }

    async fn start_local_video(&self) -> Result<(), CoreError> {
        self.call("start_local_video", |n| n.start_local_video()).await
    }

    async fn stop_local_video(&self) -> Result<(), CoreError> {
        self.call("stop_local_video", |n| n.stop_local_video()).await
    }

    async fn bind_video_view(&self, tile_id: TileId, surface: SurfaceId) -> Result<(), CoreError> {
        self.call("bind_video_view", move |n| n.bind_video_view(tile_id, surface.0))
            .await
    }

    async fn unbind_video_view(&self, tile_id: TileId) -> Result<(), CoreError> {
        self.call("unbind_video_view", move |n| n.unbind_video_view(tile_id))
            .await
    }
}

struct BridgePermissions {
    native: Arc<dyn NativePermissions>,
}

impl BridgePermissions {
    async fn call(
        &self,
        permission: &str,
        f: fn(&dyn NativePermissions, String) -> Result<PermissionStatus, HuddleError>,
    ) -> Result<CorePermissionStatus, CoreError> {
        let native = Arc::clone(&self.native);
        let permission = permission.to_string();
        tokio::task::spawn_blocking(move || f(native.as_ref(), permission))
            .await
            .map_err(|e| CoreError::Permission {
                message: format!("permission callback did not complete: {e}"),
                open_settings: false,
            })?
            .map(CorePermissionStatus::from)
            .map_err(CoreError::from)
    }
}

#[async_trait]
impl huddle_core::PermissionBackend for BridgePermissions {
    async fn check(&self, permission: &str) -> Result<CorePermissionStatus, CoreError> {
        self.call(permission, |n, p| n.check(p)).await
    }

    async fn request(&self, permission: &str) -> Result<CorePermissionStatus, CoreError> {
        self.call(permission, |n, p| n.request(p)).await
    }
}

/// Provisioner that applies the persisted display name and region on every join.
struct SettingsProvisioner {
    base: ProvisioningConfig,
    settings: Arc<SettingsStore>,
}

#[async_trait]
impl huddle_core::Provisioner for SettingsProvisioner {
    async fn join_meeting(&self, title: &str) -> Result<JoinCredentials, CoreError> {
        let config = self.base.clone().with_settings(&self.settings.get());
        ProvisioningClient::new(config)?.join_meeting(title).await
    }
}

// ── HuddleClient: main FFI object ─────────────────────────────────────

pub struct HuddleClient {
    controller: SessionController,
    sink: EngineEventSink,
    settings: Arc<SettingsStore>,
    rt: tokio::runtime::Runtime,
}

impl HuddleClient {
    /// `api_url` may be empty, in which case `HUDDLE_API_URL` is read from the environment.
    pub fn new(
        data_dir: String,
        api_url: String,
        engine: Box<dyn NativeMediaEngine>,
        permissions: Box<dyn NativePermissions>,
    ) -> Result<Self, HuddleError> {
        tracing::info!("HuddleClient::new(data_dir={data_dir})");
        let rt = tokio::runtime::Runtime::new().map_err(|e| HuddleError::Config {
            msg: format!("failed to create tokio runtime: {e}"),
        })?;

        let base = if api_url.trim().is_empty() {
            ProvisioningConfig::from_env()?
        } else {
            ProvisioningConfig::new(api_url.trim())?
        };
        let settings = Arc::new(SettingsStore::new(&data_dir));
        let options = ControllerOptions::default().with_settings(&settings.get());

        let deps = SessionDeps::new(
            Arc::new(BridgeEngine { native: Arc::from(engine) }),
            Arc::new(SettingsProvisioner { base, settings: settings.clone() }),
            PermissionGate::new(Arc::new(BridgePermissions { native: Arc::from(permissions) })),
        );
        let (controller, sink) = {
            let _guard = rt.enter();
            SessionController::new(deps, options)
        };

        Ok(Self {
            controller,
            sink,
            settings,
            rt,
        })
    }

    pub fn join(&self, title: String) -> Result<(), HuddleError> {
        tracing::info!("HuddleClient::join({title})");
        self.rt.block_on(self.controller.join(&title)).map_err(HuddleError::from)
    }

    pub fn leave(&self) -> Result<(), HuddleError> {
        self.rt.block_on(self.controller.leave()).map_err(HuddleError::from)
    }

    pub fn toggle_mute(&self) -> Result<(), HuddleError> {
        self.rt.block_on(self.controller.toggle_mute()).map_err(HuddleError::from)
    }

    pub fn toggle_video(&self) -> Result<(), HuddleError> {
        self.rt.block_on(self.controller.toggle_video()).map_err(HuddleError::from)
    }

    pub fn bind_video_surface(&self, tile_id: u32, surface_id: u64) -> Result<(), HuddleError> {
        self.rt
            .block_on(self.controller.bind_video_surface(tile_id, SurfaceId(surface_id)))
            .map_err(HuddleError::from)
    }

    pub fn unbind_video_surface(&self, tile_id: u32) -> Result<(), HuddleError> {
        self.rt
            .block_on(self.controller.unbind_video_surface(tile_id))
            .map_err(HuddleError::from)
    }

    /// Deliver one engine event. Called by the host engine binding from its own thread.
    pub fn push_engine_event(&self, name: String, payload_json: String) -> Result<(), HuddleError> {
        let event = EngineEvent::decode(&name, &payload_json)?;
        self.sink.blocking_emit(event).map_err(HuddleError::from)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.controller.snapshot().into()
    }

    pub fn state(&self) -> SessionState {
        self.controller.state().into()
    }

    pub fn add_listener(&self, listener: Box<dyn SessionListener>) {
        let bridge = Arc::new(BridgeListener {
            ffi_listener: Arc::from(listener),
        });
        self.controller.add_listener(bridge);
    }

    pub fn get_settings(&self) -> Settings {
        self.settings.get().into()
    }

    pub fn set_display_name(&self, name: Option<String>) {
        self.settings.set_display_name(name);
    }

    pub fn set_region(&self, region: Option<String>) {
        self.settings.set_region(region);
    }

    /// Takes effect for the next HuddleClient.
    pub fn set_video_enabled_on_join(&self, enabled: bool) {
        self.settings.set_video_enabled_on_join(enabled);
    }
}

impl Drop for HuddleClient {
    fn drop(&mut self) {
        if let Err(e) = self.rt.block_on(self.controller.shutdown()) {
            tracing::debug!("controller already stopped: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEngine {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl NativeMediaEngine for RecordingEngine {
        fn start(&self, meeting: MeetingInfo, _attendee: JoinAttendee) -> Result<(), HuddleError> {
            self.calls.lock().unwrap().push(format!("start:{}", meeting.meeting_id));
            Ok(())
        }
        fn stop(&self) -> Result<(), HuddleError> {
            self.calls.lock().unwrap().push("stop".into());
            Ok(())
        }
        fn mute(&self) -> Result<(), HuddleError> {
            self.calls.lock().unwrap().push("mute".into());
            Ok(())
        }
        fn unmute(&self) -> Result<(), HuddleError> {
            self.calls.lock().unwrap().push("unmute".into());
            Ok(())
        }
        fn start_local_video(&self) -> Result<(), HuddleError> {
            Ok(())
        }
        fn stop_local_video(&self) -> Result<(), HuddleError> {
            Ok(())
        }
        fn bind_video_view(&self, _tile_id: u32, _surface_id: u64) -> Result<(), HuddleError> {
            Ok(())
        }
        fn unbind_video_view(&self, _tile_id: u32) -> Result<(), HuddleError> {
            Ok(())
        }
    }

    struct GrantAll;

    impl NativePermissions for GrantAll {
        fn check(&self, _permission: String) -> Result<PermissionStatus, HuddleError> {
            Ok(PermissionStatus::Granted)
        }
        fn request(&self, _permission: String) -> Result<PermissionStatus, HuddleError> {
            Ok(PermissionStatus::Granted)
        }
    }

    fn client(
        dir: &std::path::Path,
        api_url: &str,
    ) -> (Arc<HuddleClient>, Arc<Mutex<Vec<String>>>) {
        let engine = RecordingEngine::default();
        let calls = engine.calls.clone();
        let client = HuddleClient::new(
            dir.to_str().unwrap().to_string(),
            api_url.to_string(),
            Box::new(engine),
            Box::new(GrantAll),
        )
        .unwrap();
        (Arc::new(client), calls)
    }

    #[test]
    fn new_client_starts_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (client, calls) = client(dir.path(), "http://127.0.0.1:9");
        let snapshot = client.snapshot();
        assert_eq!(snapshot.state, SessionState::Idle);
        assert!(!snapshot.is_loading);
        assert!(snapshot.attendees.is_empty());
        client.toggle_mute().unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn rejects_invalid_api_url() {
        let dir = tempfile::tempdir().unwrap();
        let result = HuddleClient::new(
            dir.path().to_str().unwrap().to_string(),
            "not a url".to_string(),
            Box::new(RecordingEngine::default()),
            Box::new(GrantAll),
        );
        assert!(matches!(result, Err(HuddleError::Config { .. })));
    }

    #[test]
    fn unreachable_service_fails_join_without_engine_calls() {
        let dir = tempfile::tempdir().unwrap();
        let (client, calls) = client(dir.path(), "http://127.0.0.1:9");

        let err = client.join("Standup".to_string()).unwrap_err();
        assert!(matches!(err, HuddleError::Provisioning { .. }));

        let snapshot = client.snapshot();
        assert_eq!(snapshot.state, SessionState::Idle);
        assert_eq!(snapshot.error.map(|e| e.kind), Some(ErrorKind::Provisioning));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn push_engine_event_validates_names() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _calls) = client(dir.path(), "http://127.0.0.1:9");
        assert!(matches!(
            client.push_engine_event("volumeChanged".into(), "{}".into()),
            Err(HuddleError::Engine { .. })
        ));
        client
            .push_engine_event("attendeesJoined".into(), r#"{"attendeeIds":["a1"]}"#.into())
            .unwrap();
    }

    #[test]
    fn binding_without_session_is_a_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _calls) = client(dir.path(), "http://127.0.0.1:9");
        assert!(matches!(
            client.bind_video_surface(1, 42),
            Err(HuddleError::State { .. })
        ));
    }

    #[test]
    fn settings_persist_across_clients() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (client, _calls) = client(dir.path(), "http://127.0.0.1:9");
            client.set_display_name(Some("Alice".into()));
            client.set_region(Some("eu-west-1".into()));
            client.set_video_enabled_on_join(true);
        }
        let (client, _calls) = client(dir.path(), "http://127.0.0.1:9");
        let settings = client.get_settings();
        assert_eq!(settings.display_name.as_deref(), Some("Alice"));
        assert_eq!(settings.region.as_deref(), Some("eu-west-1"));
        assert!(settings.video_enabled_on_join);
    }

    #[test]
    fn error_conversion_keeps_settings_hint() {
        let err = HuddleError::from(CoreError::Permission {
            message: "camera access is blocked".into(),
            open_settings: true,
        });
        assert!(matches!(err, HuddleError::Permission { open_settings: true, .. }));
        assert!(matches!(HuddleError::from(CoreError::Cancelled), HuddleError::Cancelled { .. }));

        let back = CoreError::from(HuddleError::Callback { msg: "boom".into() });
        assert!(matches!(back, CoreError::Engine(_)));
    }

    #[test]
    fn join_token_is_redacted_in_debug() {
        let attendee = JoinAttendee {
            attendee_id: "a1".into(),
            external_user_id: "Attendee".into(),
            join_token: "tok-123".into(),
        };
        assert!(!format!("{attendee:?}").contains("tok-123"));
    }
}
