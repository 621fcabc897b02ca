//! Session lifecycle controller.
//!
//! One actor task owns every piece of session state. Public calls, engine
//! events and the results of slow engine or network work are all serialized
//! through it, so transitions never interleave and the engine is stopped at
//! most once per session however leave requests and `sessionEnded` race.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use std::time::Duration;

use tokio::time::{Instant, timeout, timeout_at};
use uuid::Uuid;

use crate::attendance::{AttendanceRegistry, Attendee};
use crate::bridge::{BridgeMessage, EngineEventSink, EventBridge, VideoTile};
use crate::config::ControllerOptions;
use crate::engine::{MediaEngine, SurfaceId, TileId};
use crate::errors::{ErrorKind, HuddleError, SessionError};
use crate::events::{EventEmitter, SessionEvent, SessionEventListener, SessionState};
use crate::permissions::{Capability, PermissionGate, PermissionOutcome};
use crate::provisioning::{JoinCredentials, Provisioner};
use crate::tiles::VideoTileRegistry;

/// Everything a UI needs to render the session, published after each change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub error: Option<SessionError>,
    pub attendees: Vec<Attendee>,
    pub tiles: Vec<VideoTile>,
    pub local_muted: bool,
    pub video_enabled: bool,
    pub meeting_id: Option<String>,
    pub local_attendee_id: Option<String>,
}

impl SessionSnapshot {
    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    pub fn is_in_meeting(&self) -> bool {
        self.state.is_in_meeting()
    }
}

/// External collaborators of a controller.
pub struct SessionDeps {
    pub engine: Arc<dyn MediaEngine>,
    pub provisioner: Arc<dyn Provisioner>,
    pub permissions: Arc<PermissionGate>,
}

impl SessionDeps {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        provisioner: Arc<dyn Provisioner>,
        permissions: PermissionGate,
    ) -> Self {
        Self {
            engine,
            provisioner,
            permissions: Arc::new(permissions),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, HuddleError>>;

enum Command {
    Join { title: String, respond_to: Reply<()> },
    Leave { respond_to: oneshot::Sender<()> },
    ToggleMute { respond_to: Reply<()> },
    ToggleVideo { respond_to: Reply<()> },
    BindSurface { tile_id: TileId, surface: SurfaceId, respond_to: Reply<()> },
    UnbindSurface { tile_id: TileId, respond_to: Reply<()> },
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Result of work the actor spawned off its own task.
///
/// Join steps carry the attempt they belong to; anything from an earlier
/// attempt is dropped.
enum Completion {
    Permissions { attempt: Uuid, title: String, outcome: PermissionOutcome },
    Provisioned { attempt: Uuid, result: Result<JoinCredentials, HuddleError> },
    EngineStarted { attempt: Uuid, result: Result<(), HuddleError> },
    EngineStopped { attempt: Uuid, result: Result<(), HuddleError> },
    Mute { attempt: Uuid, result: Result<(), HuddleError>, respond_to: Reply<()> },
    Video {
        attempt: Uuid,
        enabled: bool,
        result: Result<(), HuddleError>,
        respond_to: Option<Reply<()>>,
    },
    Bound {
        tile_id: TileId,
        surface: SurfaceId,
        result: Result<(), HuddleError>,
        respond_to: Reply<()>,
    },
    Unbound {
        tile_id: TileId,
        result: Result<(), HuddleError>,
        respond_to: Option<Reply<()>>,
    },
}

impl Completion {
    /// The join attempt a join-step completion belongs to.
    fn join_step_attempt(&self) -> Option<Uuid> {
        match self {
            Self::Permissions { attempt, .. }
            | Self::Provisioned { attempt, .. }
            | Self::EngineStarted { attempt, .. }
            | Self::EngineStopped { attempt, .. } => Some(*attempt),
            _ => None,
        }
    }
}

fn controller_gone() -> HuddleError {
    HuddleError::State("session controller is gone".into())
}

/// Handle to a running session controller. Cheap to clone.
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    emitter: EventEmitter,
}

impl SessionController {
    /// Spawn a controller together with the sink its engine should push events into.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(deps: SessionDeps, options: ControllerOptions) -> (Self, EngineEventSink) {
        let (sink, bridge) = EventBridge::channel(options.event_capacity);
        (Self::spawn(deps, bridge, options), sink)
    }

    pub fn spawn(deps: SessionDeps, bridge: EventBridge, options: ControllerOptions) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(options.command_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let emitter = EventEmitter::new();

        let actor = SessionActor {
            engine: deps.engine,
            provisioner: deps.provisioner,
            permissions: deps.permissions,
            options,
            emitter: emitter.clone(),
            snapshot_tx,
            commands: commands_rx,
            bridge,
            bridge_open: true,
            completions_tx,
            completions_rx,
            attempt: Uuid::nil(),
            state: SessionState::Idle,
            error: None,
            attendance: AttendanceRegistry::new(),
            tiles: VideoTileRegistry::new(),
            credentials: None,
            local_muted: false,
            video_enabled: false,
            engine_started: false,
            start_in_flight: false,
            stop_deadline: None,
            teardown_requested: None,
            join_waiter: None,
            join_outcome: None,
            leave_waiters: Vec::new(),
        };
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
            emitter,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.emitter.add_listener(listener);
    }

    /// Join the meeting named `title`.
    ///
    /// Resolves once the engine has accepted the credentials, or with the
    /// failure after cleanup has finished. A join overtaken by `leave()`
    /// resolves with [`HuddleError::Cancelled`].
    pub async fn join(&self, title: &str) -> Result<(), HuddleError> {
        let title = title.to_string();
        self.request(|respond_to| Command::Join { title, respond_to })
            .await?
    }

    /// Leave the current session. Resolves once the controller is idle again.
    pub async fn leave(&self) -> Result<(), HuddleError> {
        self.request(|respond_to| Command::Leave { respond_to }).await
    }

    pub async fn toggle_mute(&self) -> Result<(), HuddleError> {
        self.request(|respond_to| Command::ToggleMute { respond_to })
            .await?
    }

    pub async fn toggle_video(&self) -> Result<(), HuddleError> {
        self.request(|respond_to| Command::ToggleVideo { respond_to })
            .await?
    }

    pub async fn bind_video_surface(
        &self,
        tile_id: TileId,
        surface: SurfaceId,
    ) -> Result<(), HuddleError> {
        self.request(|respond_to| Command::BindSurface { tile_id, surface, respond_to })
            .await?
    }

    pub async fn unbind_video_surface(&self, tile_id: TileId) -> Result<(), HuddleError> {
        self.request(|respond_to| Command::UnbindSurface { tile_id, respond_to })
            .await?
    }

    /// Tear down any live session and stop the controller task.
    pub async fn shutdown(&self) -> Result<(), HuddleError> {
        self.request(|respond_to| Command::Shutdown { respond_to }).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HuddleError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| controller_gone())?;
        rx.await.map_err(|_| controller_gone())
    }
}

struct SessionActor {
    engine: Arc<dyn MediaEngine>,
    provisioner: Arc<dyn Provisioner>,
    permissions: Arc<PermissionGate>,
    options: ControllerOptions,
    emitter: EventEmitter,
    snapshot_tx: watch::Sender<SessionSnapshot>,

    commands: mpsc::Receiver<Command>,
    bridge: EventBridge,
    bridge_open: bool,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,

    /// Correlates log lines and late completions with one join attempt.
    attempt: Uuid,
    state: SessionState,
    error: Option<SessionError>,
    attendance: AttendanceRegistry,
    tiles: VideoTileRegistry,
    credentials: Option<Arc<JoinCredentials>>,
    local_muted: bool,
    video_enabled: bool,

    /// `start()` was invoked for this attempt, so cleanup must call `stop()`.
    engine_started: bool,
    start_in_flight: bool,
    /// When the outstanding `stop()` is abandoned.
    stop_deadline: Option<Instant>,
    /// Cleanup deferred until the in-flight join step reports back.
    teardown_requested: Option<HuddleError>,
    join_waiter: Option<Reply<()>>,
    join_outcome: Option<Result<(), HuddleError>>,
    leave_waiters: Vec<oneshot::Sender<()>>,
}

impl SessionActor {
    async fn run(mut self) {
        tracing::debug!("session controller running");
        loop {
            tokio::select! {
                biased;

                Some(done) = self.completions_rx.recv() => self.on_completion(done),

                msg = self.bridge.recv(), if self.bridge_open => match msg {
                    Some(msg) => self.on_engine_message(msg),
                    None => {
                        tracing::warn!("engine event stream closed");
                        self.bridge_open = false;
                    }
                },

                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown { respond_to }) => {
                        self.shutdown().await;
                        self.publish();
                        let _ = respond_to.send(());
                        break;
                    }
                    Some(cmd) => self.on_command(cmd),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
            }
            self.publish();
        }
        tracing::debug!("session controller stopped");
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Join { title, respond_to } => self.begin_join(title, respond_to),
            Command::Leave { respond_to } => self.leave(respond_to),
            Command::ToggleMute { respond_to } => self.toggle_mute(respond_to),
            Command::ToggleVideo { respond_to } => {
                if self.state != SessionState::Active {
                    tracing::debug!("toggle_video ignored while {:?}", self.state);
                    let _ = respond_to.send(Ok(()));
                    return;
                }
                self.begin_video_toggle(Some(respond_to));
            }
            Command::BindSurface { tile_id, surface, respond_to } => {
                self.bind_surface(tile_id, surface, respond_to)
            }
            Command::UnbindSurface { tile_id, respond_to } => {
                if self.tiles.unbind(tile_id).is_none() {
                    let _ = respond_to.send(Ok(()));
                    return;
                }
                let engine = self.engine.clone();
                self.spawn_work(async move {
                    let result = engine.unbind_video_view(tile_id).await;
                    Completion::Unbound { tile_id, result, respond_to: Some(respond_to) }
                });
            }
            Command::Shutdown { .. } => unreachable!("handled by the run loop"),
        }
    }

    fn begin_join(&mut self, title: String, respond_to: Reply<()>) {
        if !matches!(self.state, SessionState::Idle | SessionState::Failed) {
            tracing::warn!("join('{title}') rejected while {:?}", self.state);
            let _ = respond_to.send(Err(HuddleError::State(
                "a session is already in progress".into(),
            )));
            return;
        }

        self.attempt = Uuid::new_v4();
        tracing::info!("session {}: joining '{title}'", self.attempt);
        self.teardown_requested = None;
        self.join_outcome = None;
        self.join_waiter = Some(respond_to);
        self.set_error(None);
        self.set_state(SessionState::Provisioning);

        let gate = self.permissions.clone();
        let attempt = self.attempt;
        self.spawn_work(async move {
            let outcome = gate.ensure(&Capability::SESSION).await;
            Completion::Permissions { attempt, title, outcome }
        });
    }

    fn leave(&mut self, respond_to: oneshot::Sender<()>) {
        if matches!(self.state, SessionState::Idle | SessionState::Failed) {
            let _ = respond_to.send(());
            return;
        }
        self.leave_waiters.push(respond_to);
        self.end_session(HuddleError::Cancelled);
    }

    /// Start cleanup now, or once the in-flight join step reports back.
    ///
    /// `stop()` is never issued while `start()` is still outstanding.
    fn end_session(&mut self, reason: HuddleError) {
        match self.state {
            SessionState::Idle | SessionState::Failed => {}
            SessionState::Provisioning => self.request_teardown(reason),
            SessionState::Starting | SessionState::Active if self.start_in_flight => {
                self.request_teardown(reason)
            }
            SessionState::Starting | SessionState::Active => self.cleanup(),
            SessionState::Stopping => tracing::debug!("cleanup already running"),
        }
    }

    fn toggle_mute(&mut self, respond_to: Reply<()>) {
        if self.state != SessionState::Active {
            tracing::debug!("toggle_mute ignored while {:?}", self.state);
            let _ = respond_to.send(Ok(()));
            return;
        }
        // The flag itself only moves when the engine reports the change.
        let mute = !self.local_muted;
        let engine = self.engine.clone();
        let attempt = self.attempt;
        self.spawn_work(async move {
            let result = if mute { engine.mute().await } else { engine.unmute().await };
            Completion::Mute { attempt, result, respond_to }
        });
    }

    fn begin_video_toggle(&mut self, respond_to: Option<Reply<()>>) {
        let enable = !self.video_enabled;
        self.set_video_enabled(enable);

        let engine = self.engine.clone();
        let gate = self.permissions.clone();
        let attempt = self.attempt;
        self.spawn_work(async move {
            let result = if enable {
                match gate.ensure(&[Capability::Camera]).await.into_result() {
                    Ok(()) => engine.start_local_video().await,
                    Err(e) => Err(e),
                }
            } else {
                engine.stop_local_video().await
            };
            Completion::Video { attempt, enabled: enable, result, respond_to }
        });
    }

    fn bind_surface(&mut self, tile_id: TileId, surface: SurfaceId, respond_to: Reply<()>) {
        if !self.state.is_in_meeting() {
            let _ = respond_to.send(Err(HuddleError::State("no active session".into())));
            return;
        }
        if self.tiles.tile(tile_id).is_none() {
            let _ = respond_to.send(Err(HuddleError::State(format!(
                "unknown video tile {tile_id}"
            ))));
            return;
        }
        if self.tiles.bind(tile_id, surface) == Some(surface) {
            let _ = respond_to.send(Ok(()));
            return;
        }
        let engine = self.engine.clone();
        self.spawn_work(async move {
            let result = engine.bind_video_view(tile_id, surface).await;
            Completion::Bound { tile_id, surface, result, respond_to }
        });
    }

    fn on_completion(&mut self, done: Completion) {
        if let Some(stale) = done.join_step_attempt().filter(|a| *a != self.attempt) {
            tracing::debug!("dropping late result of join attempt {stale}");
            return;
        }
        match done {
            Completion::Permissions { title, outcome, .. } => {
                if self.teardown_requested.is_some() {
                    self.abort_join();
                    return;
                }
                if let PermissionOutcome::Blocked(cap) = outcome {
                    self.emitter.emit(SessionEvent::OpenSettingsRequired(cap));
                }
                if let Err(e) = outcome.into_result() {
                    self.fail(e);
                    return;
                }
                let provisioner = self.provisioner.clone();
                let attempt = self.attempt;
                self.spawn_work(async move {
                    let result = provisioner.join_meeting(&title).await;
                    Completion::Provisioned { attempt, result }
                });
            }
            Completion::Provisioned { result, .. } => {
                if self.teardown_requested.is_some() {
                    self.abort_join();
                    return;
                }
                let creds = match result {
                    Ok(creds) => Arc::new(creds),
                    Err(e) => {
                        self.fail(e);
                        return;
                    }
                };
                self.credentials = Some(creds.clone());
                self.set_state(SessionState::Starting);
                self.engine_started = true;
                self.start_in_flight = true;

                let engine = self.engine.clone();
                let attempt = self.attempt;
                self.spawn_work(async move {
                    let result = engine.start(&creds.meeting, &creds.attendee).await;
                    Completion::EngineStarted { attempt, result }
                });
            }
            Completion::EngineStarted { result, .. } => {
                self.start_in_flight = false;
                if self.teardown_requested.is_some() {
                    self.abort_join();
                    return;
                }
                match result {
                    Ok(()) => {
                        tracing::info!("session {}: engine accepted credentials", self.attempt);
                        self.resolve_join(Ok(()));
                    }
                    Err(e) => self.fail(e),
                }
            }
            Completion::EngineStopped { result, .. } => {
                match result {
                    Ok(()) => tracing::info!("session {}: engine stopped", self.attempt),
                    Err(e @ HuddleError::Timeout(_)) => {
                        tracing::warn!("session {}: {e}, abandoning it", self.attempt)
                    }
                    Err(e) => tracing::warn!("session {}: engine stop failed: {e}", self.attempt),
                }
                self.finish_cleanup();
            }
            Completion::Mute { attempt, result, respond_to } => {
                if let Err(e) = &result {
                    tracing::warn!("mute toggle failed: {e}");
                    if attempt == self.attempt && self.state.is_in_meeting() {
                        self.set_error(Some(SessionError::from(e)));
                    }
                }
                let _ = respond_to.send(result);
            }
            Completion::Video { attempt, enabled, result, respond_to } => {
                if let Err(e) = &result {
                    tracing::warn!("local video toggle to {enabled} failed: {e}");
                    if attempt == self.attempt && self.state.is_in_meeting() {
                        if self.video_enabled == enabled {
                            self.set_video_enabled(!enabled);
                        }
                        if matches!(e, HuddleError::Permission { open_settings: true, .. }) {
                            self.emitter
                                .emit(SessionEvent::OpenSettingsRequired(Capability::Camera));
                        }
                        self.set_error(Some(SessionError::from(e)));
                    }
                }
                if let Some(tx) = respond_to {
                    let _ = tx.send(result);
                }
            }
            Completion::Bound { tile_id, surface, result, respond_to } => {
                if let Err(e) = &result {
                    tracing::warn!("binding tile {tile_id} to {surface:?} failed: {e}");
                    if self.tiles.binding(tile_id) == Some(surface) {
                        self.tiles.unbind(tile_id);
                    }
                }
                let _ = respond_to.send(result);
            }
            Completion::Unbound { tile_id, result, respond_to } => {
                if let Err(e) = &result {
                    tracing::warn!("unbinding tile {tile_id} failed: {e}");
                }
                if let Some(tx) = respond_to {
                    let _ = tx.send(result);
                }
            }
        }
    }

    fn on_engine_message(&mut self, msg: BridgeMessage) {
        match msg {
            BridgeMessage::SessionStarted { timestamp } => {
                if self.state != SessionState::Starting {
                    tracing::debug!("sessionStarted ignored while {:?}", self.state);
                    return;
                }
                tracing::info!("session {}: started at {timestamp}", self.attempt);
                self.set_error(None);
                self.set_state(SessionState::Active);
                if self.options.video_enabled_on_join && !self.video_enabled {
                    self.begin_video_toggle(None);
                }
            }
            BridgeMessage::SessionEnded { status_code } => {
                tracing::info!(
                    "session {}: engine ended the session (status {status_code})",
                    self.attempt
                );
                match self.state {
                    SessionState::Starting | SessionState::Active => {
                        self.end_session(HuddleError::Engine(format!(
                            "session ended while the engine was starting (status {status_code})"
                        )))
                    }
                    state => tracing::debug!("sessionEnded ignored while {state:?}"),
                }
            }
            BridgeMessage::Error(message) => {
                if self.state == SessionState::Idle {
                    tracing::debug!("engine error while idle: {message}");
                    return;
                }
                tracing::warn!("session {}: engine error: {message}", self.attempt);
                self.set_error(Some(SessionError {
                    kind: ErrorKind::Engine,
                    message,
                    retryable: true,
                }));
            }
            msg if !self.state.is_in_meeting() => {
                tracing::debug!("engine event {msg:?} ignored while {:?}", self.state);
            }
            BridgeMessage::AttendeesJoined(joined) => {
                let added = self.attendance.add_attendees(&joined);
                if added > 0 {
                    let present = self.attendance.attendees();
                    let ids = present[present.len() - added..]
                        .iter()
                        .map(|a| a.id.clone())
                        .collect();
                    self.emitter.emit(SessionEvent::AttendeesJoined(ids));
                }
            }
            BridgeMessage::AttendeesLeft(ids) => {
                if self.attendance.remove_attendees(&ids) > 0 {
                    self.emitter.emit(SessionEvent::AttendeesLeft(ids));
                }
            }
            BridgeMessage::AttendeesMuted(ids) => self.apply_mute(ids, true),
            BridgeMessage::AttendeesUnmuted(ids) => self.apply_mute(ids, false),
            BridgeMessage::TileAdded(tile) => {
                self.tiles.add_tile(tile.clone());
                self.emitter.emit(SessionEvent::TileAdded(tile));
            }
            BridgeMessage::TileRemoved(tile_id) => {
                if self.tiles.unbind(tile_id).is_some() {
                    let engine = self.engine.clone();
                    self.spawn_work(async move {
                        let result = engine.unbind_video_view(tile_id).await;
                        Completion::Unbound { tile_id, result, respond_to: None }
                    });
                }
                if self.tiles.remove_tile(tile_id).is_some() {
                    self.emitter.emit(SessionEvent::TileRemoved(tile_id));
                }
            }
        }
    }

    fn apply_mute(&mut self, ids: Vec<String>, muted: bool) {
        let is_local = self
            .credentials
            .as_ref()
            .is_some_and(|c| ids.contains(&c.attendee.attendee_id));
        if self.attendance.set_muted(&ids, muted) > 0 {
            self.emitter.emit(SessionEvent::MuteChanged { attendee_ids: ids, muted });
        }
        if is_local {
            self.set_local_muted(muted);
        }
    }

    fn request_teardown(&mut self, reason: HuddleError) {
        tracing::info!(
            "session {}: teardown deferred until the current step finishes",
            self.attempt
        );
        self.teardown_requested.get_or_insert(reason);
    }

    fn abort_join(&mut self) {
        let reason = self.teardown_requested.take().unwrap_or(HuddleError::Cancelled);
        tracing::info!("session {}: join abandoned: {reason}", self.attempt);
        self.join_outcome = Some(Err(reason));
        self.cleanup();
    }

    fn fail(&mut self, err: HuddleError) {
        tracing::error!("session {}: {err}", self.attempt);
        self.set_error(Some(SessionError::from(&err)));
        self.set_state(SessionState::Failed);
        self.join_outcome = Some(Err(err));
        self.cleanup();
    }

    fn cleanup(&mut self) {
        if self.state == SessionState::Stopping {
            tracing::debug!("cleanup already running");
            return;
        }
        if !self.engine_started {
            self.finish_cleanup();
            return;
        }
        self.set_state(SessionState::Stopping);

        let engine = self.engine.clone();
        let bound = self.tiles.bound_tiles();
        let limit = self.options.stop_timeout;
        let attempt = self.attempt;
        self.stop_deadline = Some(Instant::now() + limit);
        self.spawn_work(async move {
            let result = teardown(engine, bound, limit).await;
            Completion::EngineStopped { attempt, result }
        });
    }

    fn finish_cleanup(&mut self) {
        self.credentials = None;
        self.engine_started = false;
        self.start_in_flight = false;
        self.stop_deadline = None;
        self.teardown_requested = None;

        if !self.attendance.is_empty() {
            let ids = self.attendance.attendees().iter().map(|a| a.id.clone()).collect();
            self.attendance.clear();
            self.emitter.emit(SessionEvent::AttendeesLeft(ids));
        }
        let tile_ids: Vec<TileId> = self.tiles.tiles().map(|t| t.tile_id).collect();
        self.tiles.clear();
        for tile_id in tile_ids {
            self.emitter.emit(SessionEvent::TileRemoved(tile_id));
        }
        self.set_local_muted(false);
        self.set_video_enabled(false);
        self.set_state(SessionState::Idle);

        let outcome = self.join_outcome.take().unwrap_or(Err(HuddleError::Cancelled));
        self.resolve_join(outcome);
        for waiter in self.leave_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    /// Drive the live session to `Idle` before the actor exits.
    ///
    /// Cleanup goes through the normal path, so a `stop()` already
    /// outstanding is awaited rather than issued again.
    async fn shutdown(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        tracing::info!(
            "session {}: controller shutting down while {:?}",
            self.attempt,
            self.state
        );
        self.end_session(HuddleError::Cancelled);

        let step_deadline = Instant::now() + self.options.stop_timeout;
        while self.state != SessionState::Idle {
            let deadline = self.stop_deadline.unwrap_or(step_deadline);
            match timeout_at(deadline, self.completions_rx.recv()).await {
                Ok(Some(done)) => self.on_completion(done),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "session {}: gave up waiting for the engine during shutdown",
                        self.attempt
                    );
                    break;
                }
            }
        }
        if self.state == SessionState::Idle {
            return;
        }

        if self.engine_started && self.state != SessionState::Stopping {
            let bound = self.tiles.bound_tiles();
            let limit = self.options.stop_timeout;
            if let Err(e) = teardown(self.engine.clone(), bound, limit).await {
                tracing::warn!("engine did not stop cleanly during shutdown: {e}");
            }
        }
        self.join_outcome.get_or_insert(Err(HuddleError::Cancelled));
        self.finish_cleanup();
    }

    fn resolve_join(&mut self, result: Result<(), HuddleError>) {
        if let Some(waiter) = self.join_waiter.take() {
            let _ = waiter.send(result);
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        tracing::info!("session {}: {:?} -> {next:?}", self.attempt, self.state);
        self.state = next;
        self.emitter.emit(SessionEvent::StateChanged(next));
    }

    fn set_error(&mut self, error: Option<SessionError>) {
        if self.error == error {
            return;
        }
        self.error = error.clone();
        self.emitter.emit(SessionEvent::ErrorChanged(error));
    }

    fn set_local_muted(&mut self, muted: bool) {
        if self.local_muted != muted {
            self.local_muted = muted;
            self.emitter.emit(SessionEvent::LocalMuteChanged(muted));
        }
    }

    fn set_video_enabled(&mut self, enabled: bool) {
        if self.video_enabled != enabled {
            self.video_enabled = enabled;
            self.emitter.emit(SessionEvent::LocalVideoChanged(enabled));
        }
    }

    fn spawn_work<F>(&self, work: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(work.await);
        });
    }

    fn publish(&self) {
        let next = SessionSnapshot {
            state: self.state,
            error: self.error.clone(),
            attendees: self.attendance.attendees().to_vec(),
            tiles: self.tiles.tiles().cloned().collect(),
            local_muted: self.local_muted,
            video_enabled: self.video_enabled,
            meeting_id: self.credentials.as_ref().map(|c| c.meeting.meeting_id.clone()),
            local_attendee_id: self
                .credentials
                .as_ref()
                .map(|c| c.attendee.attendee_id.clone()),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Unbind every bound surface, then stop the engine, giving up after `limit`.
async fn teardown(
    engine: Arc<dyn MediaEngine>,
    bound: Vec<TileId>,
    limit: Duration,
) -> Result<(), HuddleError> {
    let work = async move {
        let unbinds = bound.iter().map(|&tile_id| {
            let engine = Arc::clone(&engine);
            async move { (tile_id, engine.unbind_video_view(tile_id).await) }
        });
        for (tile_id, result) in join_all(unbinds).await {
            if let Err(e) = result {
                tracing::warn!("unbinding tile {tile_id} during cleanup failed: {e}");
            }
        }
        engine.stop().await
    };
    timeout(limit, work)
        .await
        .map_err(|_| HuddleError::Timeout(format!("engine did not stop within {limit:?}")))?
}
