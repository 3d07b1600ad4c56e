//! System call authority integration
//!
//! The platform's call-management authority owns the native call UI. Every
//! state-changing action the app takes goes through it first, and it can also
//! originate actions of its own (answer from the lock screen, hang up from a
//! headset, redial from recents). Those arrive as [`AuthorityAction`]s.
//!
//! [`TelephonyAdapter`] is the only path to the authority. It keeps the set of
//! call ids the authority currently knows about so outcomes are reported once.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::call::CallId;

/// The authority's answer to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityDecision {
    Approved,
    Denied(String),
}

impl AuthorityDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, AuthorityDecision::Approved)
    }
}

/// How a call ended, as told to the authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Connected,
    DeclinedLocally,
    RemoteEnded,
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("call authority error: {reason}")]
pub struct AuthorityError {
    pub reason: String,
}

impl AuthorityError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Request to start an outgoing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCallRequest {
    pub call_id: CallId,
    pub handle: String,
    pub is_system_initiated: bool,
    pub display_name: Option<String>,
}

/// Actions the authority originates on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityAction {
    /// Start a call; the authority already approved it
    StartCall {
        call_id: CallId,
        handle: String,
        display_name: Option<String>,
    },
    Answer {
        call_id: CallId,
    },
    End {
        call_id: CallId,
    },
    SetHeld {
        call_id: CallId,
        on_hold: bool,
    },
    SetMuted {
        call_id: CallId,
        muted: bool,
    },
    AudioSessionActivated,
    AudioSessionDeactivated,
    /// The authority dropped all of its calls
    Reset,
}

/// The platform call authority
#[async_trait]
pub trait TelephonyAuthority: Send + Sync {
    async fn request_start(&self, request: StartCallRequest) -> AuthorityDecision;

    async fn request_answer(&self, call_id: &CallId) -> AuthorityDecision;

    async fn request_end(&self, call_id: &CallId) -> AuthorityDecision;

    async fn request_hold(&self, call_id: &CallId, on_hold: bool);

    async fn request_mute(&self, call_id: &CallId, muted: bool);

    /// Show the incoming call UI
    async fn report_incoming(
        &self,
        call_id: &CallId,
        handle: &str,
        display_name: Option<&str>,
    ) -> Result<(), AuthorityError>;

    async fn report_outcome(&self, call_id: &CallId, outcome: CallOutcome);
}

/// Single path between the orchestrator and the call authority
pub struct TelephonyAdapter {
    authority: Arc<dyn TelephonyAuthority>,
    known: Mutex<HashSet<CallId>>,
}

impl TelephonyAdapter {
    pub fn new(authority: Arc<dyn TelephonyAuthority>) -> Self {
        Self {
            authority,
            known: Mutex::new(HashSet::new()),
        }
    }

    /// Record that the authority already knows `call_id`
    pub fn track(&self, call_id: &CallId) {
        self.known.lock().insert(call_id.clone());
    }

    pub fn is_tracked(&self, call_id: &CallId) -> bool {
        self.known.lock().contains(call_id)
    }

    pub async fn request_start(
        &self,
        call_id: &CallId,
        handle: &str,
        is_system_initiated: bool,
        display_name: Option<String>,
    ) -> AuthorityDecision {
        let request = StartCallRequest {
            call_id: call_id.clone(),
            handle: handle.to_string(),
            is_system_initiated,
            display_name,
        };
        let decision = self.authority.request_start(request).await;
        match &decision {
            AuthorityDecision::Approved => {
                debug!(call_id = %call_id, "Call authority approved start");
                self.track(call_id);
            }
            AuthorityDecision::Denied(reason) => {
                warn!(call_id = %call_id, reason = %reason, "Call authority denied start");
            }
        }
        decision
    }

    pub async fn request_answer(&self, call_id: &CallId) -> AuthorityDecision {
        let decision = self.authority.request_answer(call_id).await;
        if let AuthorityDecision::Denied(reason) = &decision {
            warn!(call_id = %call_id, reason = %reason, "Call authority denied answer");
        }
        decision
    }

    pub async fn request_end(&self, call_id: &CallId) -> AuthorityDecision {
        let decision = self.authority.request_end(call_id).await;
        if let AuthorityDecision::Denied(reason) = &decision {
            warn!(call_id = %call_id, reason = %reason, "Call authority denied end");
        }
        decision
    }

    pub async fn request_hold(&self, call_id: &CallId, on_hold: bool) {
        self.authority.request_hold(call_id, on_hold).await;
    }

    pub async fn request_mute(&self, call_id: &CallId, muted: bool) {
        self.authority.request_mute(call_id, muted).await;
    }

    /// Show the incoming call UI. Returns false if the authority refused; the
    /// call then continues in-app only.
    pub async fn report_incoming(
        &self,
        call_id: &CallId,
        handle: &str,
        display_name: Option<&str>,
    ) -> bool {
        match self.authority.report_incoming(call_id, handle, display_name).await {
            Ok(()) => {
                self.track(call_id);
                info!(call_id = %call_id, "Reported incoming call to call authority");
                true
            }
            Err(e) => {
                warn!(call_id = %call_id, error = %e, "Call authority rejected incoming call report");
                false
            }
        }
    }

    /// Report how a call ended (or that it connected)
    pub async fn report_outcome(&self, call_id: &CallId, outcome: CallOutcome) {
        if outcome != CallOutcome::Connected {
            self.known.lock().remove(call_id);
        }
        debug!(call_id = %call_id, ?outcome, "Reporting call outcome");
        self.authority.report_outcome(call_id, outcome).await;
    }

    /// Forget every call, after the authority reset itself
    pub fn forget_all(&self) {
        self.known.lock().clear();
    }
}

impl std::fmt::Debug for TelephonyAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelephonyAdapter")
            .field("known_calls", &self.known.lock().len())
            .finish()
    }
}
