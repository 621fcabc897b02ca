//! Shared test doubles for session controller tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use huddle_core::provisioning::MediaPlacement;
use huddle_core::{
    AttendeeCredentials, ControllerOptions, EngineEventSink, HuddleError, JoinCredentials,
    MediaEngine, MeetingCredentials, PermissionBackend, PermissionGate, PermissionStatus, Platform,
    Provisioner, SessionController, SessionDeps, SessionEvent, SessionEventListener,
    SessionSnapshot, SurfaceId, TileId,
};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::Notify;

pub const MEETING_ID: &str = "m1";
pub const LOCAL_ATTENDEE: &str = "a1";

pub fn credentials(meeting_id: &str, attendee_id: &str) -> JoinCredentials {
    JoinCredentials {
        meeting: MeetingCredentials {
            meeting_id: meeting_id.to_string(),
            external_meeting_id: "Standup".to_string(),
            media_region: "us-east-1".to_string(),
            media_placement: MediaPlacement {
                audio_fallback_url: "wss://audio-fallback.test".to_string(),
                audio_host_url: "audio.test:3478".to_string(),
                signaling_url: "wss://signal.test/control".to_string(),
                turn_control_url: "https://turn.test/v2".to_string(),
            },
        },
        attendee: AttendeeCredentials {
            attendee_id: attendee_id.to_string(),
            external_user_id: "Attendee".to_string(),
            join_token: SecretString::from("join-token".to_string()),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    Immediate,
    /// Block until [`MockEngine::release_stop`].
    Gated,
    /// Never return.
    Hang,
}

/// Engine double that records every call in order.
pub struct MockEngine {
    calls: Mutex<Vec<String>>,
    stop_mode: Mutex<StopMode>,
    stop_gate: Notify,
    start_gate: Mutex<Option<Arc<Notify>>>,
    pub fail_start: AtomicBool,
    pub fail_local_video: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            stop_mode: Mutex::new(StopMode::Immediate),
            stop_gate: Notify::new(),
            start_gate: Mutex::new(None),
            fail_start: AtomicBool::new(false),
            fail_local_video: AtomicBool::new(false),
        })
    }

    pub fn set_stop_mode(&self, mode: StopMode) {
        *self.stop_mode.lock().unwrap() = mode;
    }

    pub fn release_stop(&self) {
        self.stop_gate.notify_one();
    }

    /// Hold `start()` until the returned notify is signalled.
    pub fn gate_start(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.start_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.as_str() == name || c.starts_with(&format!("{name}:")))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn start(
        &self,
        meeting: &MeetingCredentials,
        attendee: &AttendeeCredentials,
    ) -> Result<(), HuddleError> {
        self.record(format!("start:{}:{}", meeting.meeting_id, attendee.attendee_id));
        let gate = self.start_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(HuddleError::Engine("audio device unavailable".into()));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), HuddleError> {
        self.record("stop".into());
        let mode = *self.stop_mode.lock().unwrap();
        match mode {
            StopMode::Immediate => {}
            StopMode::Gated => self.stop_gate.notified().await,
            StopMode::Hang => std::future::pending::<()>().await,
        }
        Ok(())
    }

    async fn mute(&self) -> Result<(), HuddleError> {
        self.record("mute".into());
        Ok(())
    }

    async fn unmute(&self) -> Result<(), HuddleError> {
        self.record("unmute".into());
        Ok(())
    }

    async fn start_local_video(&self) -> Result<(), HuddleError> {
        self.record("start_local_video".into());
        if self.fail_local_video.load(Ordering::SeqCst) {
            return Err(HuddleError::Engine("camera busy".into()));
        }
        Ok(())
    }

    async fn stop_local_video(&self) -> Result<(), HuddleError> {
        self.record("stop_local_video".into());
        Ok(())
    }

    async fn bind_video_view(
        &self,
        tile_id: TileId,
        surface: SurfaceId,
    ) -> Result<(), HuddleError> {
        self.record(format!("bind:{tile_id}:{}", surface.0));
        Ok(())
    }

    async fn unbind_video_view(&self, tile_id: TileId) -> Result<(), HuddleError> {
        self.record(format!("unbind:{tile_id}"));
        Ok(())
    }
}

/// Provisioner double handing out fixed credentials.
pub struct MockProvisioner {
    titles: Mutex<Vec<String>>,
    fail_status: Option<u16>,
    gate: Option<Arc<Notify>>,
}

impl MockProvisioner {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self { titles: Mutex::new(Vec::new()), fail_status: None, gate: None })
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self { titles: Mutex::new(Vec::new()), fail_status: Some(status), gate: None })
    }

    /// Succeeds only after the returned notify is signalled.
    pub fn gated() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let provisioner = Arc::new(Self {
            titles: Mutex::new(Vec::new()),
            fail_status: None,
            gate: Some(gate.clone()),
        });
        (provisioner, gate)
    }

    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.titles.lock().unwrap().len()
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn join_meeting(&self, title: &str) -> Result<JoinCredentials, HuddleError> {
        self.titles.lock().unwrap().push(title.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(status) = self.fail_status {
            return Err(HuddleError::Provisioning {
                message: format!("service returned status {status}"),
                status: Some(status),
                body: Some("meeting not found".into()),
            });
        }
        Ok(credentials(MEETING_ID, LOCAL_ATTENDEE))
    }
}

/// Every check and request answers with the same status.
pub struct StaticPermissions {
    status: PermissionStatus,
    pub requests: AtomicUsize,
}

impl StaticPermissions {
    pub fn new(status: PermissionStatus) -> Arc<Self> {
        Arc::new(Self { status, requests: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl PermissionBackend for StaticPermissions {
    async fn check(&self, _permission: &str) -> Result<PermissionStatus, HuddleError> {
        Ok(self.status)
    }

    async fn request(&self, _permission: &str) -> Result<PermissionStatus, HuddleError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.status)
    }
}

#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<SessionEvent>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl SessionEventListener for EventLog {
    fn on_event(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub sink: EngineEventSink,
    pub engine: Arc<MockEngine>,
    pub events: Arc<EventLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_provisioner(MockProvisioner::succeeding())
    }

    pub fn with_provisioner(provisioner: Arc<dyn Provisioner>) -> Self {
        Self::build(
            provisioner,
            PermissionStatus::Granted,
            ControllerOptions::default(),
        )
    }

    pub fn build(
        provisioner: Arc<dyn Provisioner>,
        permission: PermissionStatus,
        options: ControllerOptions,
    ) -> Self {
        let engine = MockEngine::new();
        let backend = StaticPermissions::new(permission);
        let gate = PermissionGate::for_platform(backend, Platform::Android);
        let deps = SessionDeps::new(engine.clone(), provisioner, gate);
        let (controller, sink) = SessionController::new(deps, options);
        let events = Arc::new(EventLog::default());
        controller.add_listener(events.clone());
        Self { controller, sink, engine, events }
    }

    pub async fn emit(&self, name: &str, payload: Value) {
        self.sink
            .emit_raw(name, &payload.to_string())
            .await
            .expect("controller accepts engine events");
    }

    pub async fn wait_for(
        &self,
        mut pred: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut rx = self.controller.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| pred(s)))
            .await
            .expect("timed out waiting for snapshot")
            .expect("controller stopped");
        snapshot.clone()
    }

    /// Join and deliver `sessionStarted`, returning once the session is active.
    pub async fn join_active(&self, title: &str) -> SessionSnapshot {
        self.controller.join(title).await.expect("join succeeds");
        self.emit("sessionStarted", json!({ "timestamp": 1 })).await;
        self.wait_for(|s| s.state == huddle_core::SessionState::Active).await
    }

    pub async fn add_attendees(&self, ids: &[&str]) {
        self.emit("attendeesJoined", json!({ "attendeeIds": ids })).await;
    }

    pub async fn add_tile(&self, tile_id: TileId, attendee_id: &str, is_local: bool) {
        self.emit(
            "tileAdded",
            json!({
                "tileId": tile_id,
                "attendeeId": attendee_id,
                "isLocal": is_local,
                "isScreenShare": false,
                "pauseState": 0,
                "contentWidth": 640,
                "contentHeight": 480
            }),
        )
        .await;
    }
}

/// Poll `cond` on real time until it holds.
pub async fn until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition never became true");
}
