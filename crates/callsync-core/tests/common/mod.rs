//! Fake collaborators shared by the integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

use callsync_core::push::{
    CALL_SID_KEY, CANCEL_MESSAGE_TYPE, FROM_KEY, INVITE_MESSAGE_TYPE, MESSAGE_TYPE_KEY, PARAMS_KEY,
    TO_KEY,
};
use callsync_core::*;

/// Seconds since the epoch the test clock starts at
pub const NOW: i64 = 1_700_000_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An unsigned JWT-shaped token
pub fn token(exp: i64, identity: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = serde_json::json!({
        "exp": exp,
        "grants": { "identity": identity, "voice": { "incoming": { "allow": true } } }
    });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

pub fn valid_token() -> String {
    token(NOW + 3600, "alice")
}

pub fn invite_payload(sid: &str) -> PushPayload {
    HashMap::from([
        (MESSAGE_TYPE_KEY.to_string(), INVITE_MESSAGE_TYPE.to_string()),
        (CALL_SID_KEY.to_string(), sid.to_string()),
        (FROM_KEY.to_string(), "client:bob".to_string()),
        (TO_KEY.to_string(), "client:alice".to_string()),
        (PARAMS_KEY.to_string(), "callerName=Bob%20Jones".to_string()),
    ])
}

pub fn cancel_payload(sid: &str) -> PushPayload {
    HashMap::from([
        (MESSAGE_TYPE_KEY.to_string(), CANCEL_MESSAGE_TYPE.to_string()),
        (CALL_SID_KEY.to_string(), sid.to_string()),
    ])
}

/// Everything queued on the receiver right now
pub fn drain(rx: &mut broadcast::Receiver<CallEvent>) -> Vec<CallEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn names(events: &[CallEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

// ===== Call authority =====

#[derive(Default)]
pub struct FakeAuthority {
    pub deny_start: Mutex<Option<String>>,
    pub deny_answer: Mutex<Option<String>>,
    pub deny_end: Mutex<Option<String>>,
    pub fail_report_incoming: Mutex<bool>,
    pub start_requests: Mutex<Vec<StartCallRequest>>,
    pub answer_requests: Mutex<Vec<CallId>>,
    pub end_requests: Mutex<Vec<CallId>>,
    pub hold_requests: Mutex<Vec<(CallId, bool)>>,
    pub mute_requests: Mutex<Vec<(CallId, bool)>>,
    pub incoming: Mutex<Vec<CallId>>,
    pub outcomes: Mutex<Vec<(CallId, CallOutcome)>>,
    /// Replay approved requests as the authority's own actions before
    /// returning the decision, the way the system call UI does
    pub echo_start: Mutex<bool>,
    pub echo_answer: Mutex<bool>,
    orchestrator: Mutex<Option<Weak<CallOrchestrator>>>,
}

impl FakeAuthority {
    pub fn attach(&self, orchestrator: &Arc<CallOrchestrator>) {
        *self.orchestrator.lock() = Some(Arc::downgrade(orchestrator));
    }

    async fn echo(&self, enabled: &Mutex<bool>, action: AuthorityAction) {
        if !*enabled.lock() {
            return;
        }
        let orchestrator = self.orchestrator.lock().as_ref().and_then(Weak::upgrade);
        if let Some(orchestrator) = orchestrator {
            orchestrator.handle_authority_action(action).await;
        }
    }

    pub fn outcomes_for(&self, call_id: &CallId) -> Vec<CallOutcome> {
        self.outcomes
            .lock()
            .iter()
            .filter(|(id, _)| id == call_id)
            .map(|(_, outcome)| outcome.clone())
            .collect()
    }
}

fn decide(denial: &Mutex<Option<String>>) -> AuthorityDecision {
    match denial.lock().clone() {
        Some(reason) => AuthorityDecision::Denied(reason),
        None => AuthorityDecision::Approved,
    }
}

#[async_trait]
impl TelephonyAuthority for FakeAuthority {
    async fn request_start(&self, request: StartCallRequest) -> AuthorityDecision {
        self.start_requests.lock().push(request.clone());
        let decision = decide(&self.deny_start);
        if decision == AuthorityDecision::Approved {
            let action = AuthorityAction::StartCall {
                call_id: request.call_id,
                handle: request.handle,
                display_name: request.display_name,
            };
            self.echo(&self.echo_start, action).await;
        }
        decision
    }

    async fn request_answer(&self, call_id: &CallId) -> AuthorityDecision {
        self.answer_requests.lock().push(call_id.clone());
        let decision = decide(&self.deny_answer);
        if decision == AuthorityDecision::Approved {
            let action = AuthorityAction::Answer {
                call_id: call_id.clone(),
            };
            self.echo(&self.echo_answer, action).await;
        }
        decision
    }

    async fn request_end(&self, call_id: &CallId) -> AuthorityDecision {
        self.end_requests.lock().push(call_id.clone());
        decide(&self.deny_end)
    }

    async fn request_hold(&self, call_id: &CallId, on_hold: bool) {
        self.hold_requests.lock().push((call_id.clone(), on_hold));
    }

    async fn request_mute(&self, call_id: &CallId, muted: bool) {
        self.mute_requests.lock().push((call_id.clone(), muted));
    }

    async fn report_incoming(
        &self,
        call_id: &CallId,
        _handle: &str,
        _display_name: Option<&str>,
    ) -> Result<(), AuthorityError> {
        if *self.fail_report_incoming.lock() {
            return Err(AuthorityError::new("maximum call groups reached"));
        }
        self.incoming.lock().push(call_id.clone());
        Ok(())
    }

    async fn report_outcome(&self, call_id: &CallId, outcome: CallOutcome) {
        self.outcomes.lock().push((call_id.clone(), outcome));
    }
}

// ===== Voice transport =====

#[derive(Default)]
pub struct FakeTransport {
    pub fail_connect: Mutex<Option<String>>,
    pub fail_accept: Mutex<Option<String>>,
    pub connects: Mutex<Vec<ConnectRequest>>,
    pub accepted: Mutex<Vec<CallId>>,
    pub rejected: Mutex<Vec<CallId>>,
    pub disconnected: Mutex<Vec<CallId>>,
    pub muted: Mutex<Vec<(CallId, bool)>>,
    pub held: Mutex<Vec<(CallId, bool)>>,
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<(), TransportError> {
        if let Some(reason) = self.fail_connect.lock().clone() {
            return Err(TransportError::ConnectFailed { reason });
        }
        self.connects.lock().push(request);
        Ok(())
    }

    async fn accept(
        &self,
        invite: &InviteHandle,
        _access_token: Option<&str>,
    ) -> Result<(), TransportError> {
        if let Some(reason) = self.fail_accept.lock().clone() {
            return Err(TransportError::operation_failed("accept", reason));
        }
        self.accepted.lock().push(invite.call_id.clone());
        Ok(())
    }

    async fn reject(&self, invite: &InviteHandle) -> Result<(), TransportError> {
        self.rejected.lock().push(invite.call_id.clone());
        Ok(())
    }

    async fn disconnect(&self, call_id: &CallId) -> Result<(), TransportError> {
        self.disconnected.lock().push(call_id.clone());
        Ok(())
    }

    async fn set_muted(&self, call_id: &CallId, muted: bool) -> Result<(), TransportError> {
        self.muted.lock().push((call_id.clone(), muted));
        Ok(())
    }

    async fn set_on_hold(&self, call_id: &CallId, on_hold: bool) -> Result<(), TransportError> {
        self.held.lock().push((call_id.clone(), on_hold));
        Ok(())
    }
}

// ===== Voice backend =====

#[derive(Default)]
pub struct FakeBackend {
    pub fail: Mutex<Option<BackendError>>,
    pub registrations: Mutex<Vec<(String, String)>>,
    pub unregistrations: Mutex<Vec<(String, String)>>,
}

impl FakeBackend {
    pub fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }
}

#[async_trait]
impl VoiceBackend for FakeBackend {
    async fn register(&self, access_token: &str, device_address: &str) -> Result<(), BackendError> {
        if let Some(e) = self.fail.lock().clone() {
            return Err(e);
        }
        self.registrations
            .lock()
            .push((access_token.to_string(), device_address.to_string()));
        Ok(())
    }

    async fn unregister(
        &self,
        access_token: &str,
        device_address: &str,
    ) -> Result<(), BackendError> {
        self.unregistrations
            .lock()
            .push((access_token.to_string(), device_address.to_string()));
        Ok(())
    }
}

// ===== Audio and permissions =====

#[derive(Default)]
pub struct FakeAudioSession {
    pub ops: Mutex<Vec<String>>,
}

impl AudioSession for FakeAudioSession {
    fn configure_baseline(&self) -> Result<(), AudioError> {
        self.ops.lock().push("baseline".into());
        Ok(())
    }

    fn set_active(&self, active: bool) -> Result<(), AudioError> {
        self.ops.lock().push(format!("active:{active}"));
        Ok(())
    }

    fn set_capture_enabled(&self, enabled: bool) -> Result<(), AudioError> {
        self.ops.lock().push(format!("capture:{enabled}"));
        Ok(())
    }

    fn set_speaker(&self, enabled: bool) -> Result<(), AudioError> {
        self.ops.lock().push(format!("speaker:{enabled}"));
        Ok(())
    }
}

pub struct FakeMicrophone {
    pub status: Mutex<PermissionStatus>,
    pub grant_on_request: Mutex<bool>,
}

impl Default for FakeMicrophone {
    fn default() -> Self {
        Self {
            status: Mutex::new(PermissionStatus::Granted),
            grant_on_request: Mutex::new(true),
        }
    }
}

#[async_trait]
impl MicrophonePermission for FakeMicrophone {
    fn status(&self) -> PermissionStatus {
        *self.status.lock()
    }

    async fn request(&self) -> PermissionStatus {
        let mut status = self.status.lock();
        if *status == PermissionStatus::Undetermined {
            *status = if *self.grant_on_request.lock() {
                PermissionStatus::Granted
            } else {
                PermissionStatus::Denied
            };
        }
        *status
    }
}

// ===== Harness =====

pub struct Harness {
    pub orchestrator: Arc<CallOrchestrator>,
    pub authority: Arc<FakeAuthority>,
    pub transport: Arc<FakeTransport>,
    pub backend: Arc<FakeBackend>,
    pub audio: Arc<FakeAudioSession>,
    pub microphone: Arc<FakeMicrophone>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub events: broadcast::Receiver<CallEvent>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(MemoryStore::new()).await
    }

    pub async fn with_store(store: MemoryStore) -> Self {
        init_tracing();

        let authority = Arc::new(FakeAuthority::default());
        let transport = Arc::new(FakeTransport::default());
        let backend = Arc::new(FakeBackend::default());
        let audio = Arc::new(FakeAudioSession::default());
        let microphone = Arc::new(FakeMicrophone::default());
        let store = Arc::new(store);
        let clock = Arc::new(ManualClock::at_timestamp(NOW));

        let orchestrator = OrchestratorBuilder::new()
            .authority(authority.clone())
            .transport(transport.clone())
            .backend(backend.clone())
            .audio_session(audio.clone())
            .microphone(microphone.clone())
            .store(store.clone())
            .clock(clock.clone())
            .build()
            .await
            .expect("orchestrator builds");
        let events = orchestrator.subscribe_events();
        authority.attach(&orchestrator);

        Self {
            orchestrator,
            authority,
            transport,
            backend,
            audio,
            microphone,
            store,
            clock,
            events,
        }
    }

    /// Log in with a valid token and discard the resulting events
    pub async fn logged_in() -> Self {
        let mut harness = Self::new().await;
        harness
            .orchestrator
            .login(&valid_token())
            .await
            .expect("login succeeds");
        harness.take_events();
        harness
    }

    pub fn take_events(&mut self) -> Vec<CallEvent> {
        drain(&mut self.events)
    }

    /// Place a call and drive it to connected
    pub async fn connected_outgoing(&mut self, to: &str) -> CallId {
        let call_id = self.orchestrator.make_call(to).await.expect("call placed");
        self.orchestrator
            .handle_transport_event(TransportEvent::Connected {
                call_id: call_id.clone(),
            })
            .await;
        self.take_events();
        call_id
    }

    /// Deliver an invite and discard the resulting events
    pub async fn pending_invite(&mut self, sid: &str) -> CallId {
        assert!(self.orchestrator.handle_push(&invite_payload(sid)).await);
        self.take_events();
        CallId::from(sid)
    }
}
