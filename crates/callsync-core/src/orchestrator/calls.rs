//! Call control operations
//!
//! UI-originated actions ask the call authority first. The `*_approved`
//! functions hold the shared tail that authority-originated actions use too.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{CallOrchestrator, CallStatus, PendingInviteInfo};
use crate::call::{CallDirection, CallId, CallRecord, CallSignal, CallState, DisconnectReason};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::{failure_reason, CallEvent, CancelReason};
use crate::registry::{CallSource, PendingOutgoingIntent, TransitionOutcome};
use crate::telephony::{AuthorityDecision, CallOutcome};
use crate::token::TokenValidity;
use crate::transport::ConnectRequest;

impl CallOrchestrator {
    /// Place an outgoing call. Returns the new call id once the transport is
    /// dialing; progress arrives as events.
    pub async fn make_call(&self, to: &str) -> OrchestratorResult<CallId> {
        let access_token = self.require_token()?;
        self.ensure_microphone("make_call")?;

        let intent = PendingOutgoingIntent::new(CallId::new(), to, None, CallSource::App);
        self.place_outgoing(intent, access_token).await
    }

    /// Answer a pending invite
    pub async fn accept_call(&self, call_id: &CallId) -> OrchestratorResult<()> {
        if !self.registry.has_invite(call_id) {
            return Err(OrchestratorError::call_not_found(call_id));
        }
        self.ensure_microphone("accept_call")?;

        if self.telephony.is_tracked(call_id) {
            if let AuthorityDecision::Denied(reason) = self.telephony.request_answer(call_id).await {
                return Err(OrchestratorError::authority_denied("accept_call", reason));
            }
            // The authority may have answered through its own action while
            // approving
            if !self.registry.has_invite(call_id) && self.registry.contains(call_id) {
                debug!(call_id = %call_id, "Invite already answered by call authority");
                return Ok(());
            }
        }
        self.answer_approved(call_id).await
    }

    /// Decline a pending invite
    pub async fn reject_call(&self, call_id: &CallId) -> OrchestratorResult<()> {
        if !self.registry.has_invite(call_id) {
            return Err(OrchestratorError::call_not_found(call_id));
        }

        if self.telephony.is_tracked(call_id) {
            if let AuthorityDecision::Denied(reason) = self.telephony.request_end(call_id).await {
                return Err(OrchestratorError::authority_denied("reject_call", reason));
            }
        }
        self.decline_approved(call_id).await;
        Ok(())
    }

    /// Hang up a call, or the focused call when `call_id` is `None`.
    ///
    /// Ending a call that already ended is a no-op. A pending invite is
    /// rejected instead.
    pub async fn end_call(&self, call_id: Option<CallId>) -> OrchestratorResult<()> {
        let call_id = match call_id {
            Some(call_id) => call_id,
            None => match self.registry.active_call() {
                Some(record) => record.id,
                None if self.registry.live_count() == 0 => {
                    debug!("end_call with no calls in progress");
                    return Ok(());
                }
                None => return Err(OrchestratorError::NoActiveCall),
            },
        };

        if self.registry.has_invite(&call_id) {
            return self.reject_call(&call_id).await;
        }
        match self.registry.get(&call_id) {
            None => {
                debug!(call_id = %call_id, "Call already ended");
                return Ok(());
            }
            Some(record) if record.ending_locally => {
                debug!(call_id = %call_id, "Hangup already in progress");
                return Ok(());
            }
            Some(_) => {}
        }

        if self.telephony.is_tracked(&call_id) {
            if let AuthorityDecision::Denied(reason) = self.telephony.request_end(&call_id).await {
                return Err(OrchestratorError::authority_denied("end_call", reason));
            }
        }
        self.hangup_approved(&call_id).await;
        Ok(())
    }

    /// Mute or unmute a connected call
    pub async fn mute_call(&self, muted: bool, call_id: Option<CallId>) -> OrchestratorResult<()> {
        let record = self.resolve_call(call_id)?;
        Self::require_connected(&record)?;

        self.telephony.request_mute(&record.id, muted).await;
        self.apply_mute(&record.id, muted).await
    }

    /// Put a connected call on hold or resume it
    pub async fn hold_call(&self, on_hold: bool, call_id: Option<CallId>) -> OrchestratorResult<()> {
        let record = self.resolve_call(call_id)?;
        Self::require_connected(&record)?;

        self.telephony.request_hold(&record.id, on_hold).await;
        self.apply_hold(&record.id, on_hold).await
    }

    pub fn set_speaker(&self, enabled: bool) -> OrchestratorResult<()> {
        self.audio.set_route(enabled)?;
        Ok(())
    }

    pub fn get_call_status(&self) -> CallStatus {
        let active = self.registry.active_call();
        let connected = active
            .as_ref()
            .map(|r| r.state == CallState::Connected)
            .unwrap_or(false);

        CallStatus {
            has_active_call: active.is_some(),
            is_on_hold: connected && active.as_ref().is_some_and(|r| r.on_hold),
            is_muted: connected && active.as_ref().is_some_and(|r| r.muted),
            call_id: active.as_ref().map(|r| r.id.clone()),
            call_state: active.as_ref().map(|r| r.state),
            pending_invites: self
                .registry
                .pending_invites()
                .iter()
                .map(PendingInviteInfo::from)
                .collect(),
            active_calls_count: self.registry.live_count(),
        }
    }

    // ===== Shared transition paths =====

    fn require_token(&self) -> OrchestratorResult<String> {
        let token = self.tokens.current().ok_or(OrchestratorError::NotLoggedIn)?;
        match self.tokens.validate(&token) {
            TokenValidity::ValidUntil(_) => Ok(token),
            TokenValidity::Invalid(reason) => {
                Err(OrchestratorError::credential_invalid(reason.to_string()))
            }
        }
    }

    fn resolve_call(&self, call_id: Option<CallId>) -> OrchestratorResult<CallRecord> {
        match call_id {
            Some(call_id) => self
                .registry
                .get(&call_id)
                .ok_or_else(|| OrchestratorError::call_not_found(&call_id)),
            None => self.registry.active_call().ok_or(OrchestratorError::NoActiveCall),
        }
    }

    fn require_connected(record: &CallRecord) -> OrchestratorResult<()> {
        if record.state != CallState::Connected {
            return Err(OrchestratorError::InvalidCallState {
                call_id: record.id.clone(),
                current_state: record.state,
            });
        }
        Ok(())
    }

    /// Approve (if app-initiated), create the live record, then dial
    pub(crate) async fn place_outgoing(
        &self,
        intent: PendingOutgoingIntent,
        access_token: String,
    ) -> OrchestratorResult<CallId> {
        let call_id = intent.call_id.clone();
        self.registry.insert_intent(intent.clone());

        match intent.source {
            CallSource::App => {
                let decision = self
                    .telephony
                    .request_start(&call_id, &intent.to, false, intent.display_name.clone())
                    .await;
                if let AuthorityDecision::Denied(reason) = decision {
                    self.registry.take_intent(&call_id);
                    self.events.emit(CallEvent::OutgoingCallFailed {
                        call_id: call_id.clone(),
                        to: intent.to.clone(),
                        reason: failure_reason::SYSTEM_REQUEST_DENIED.to_string(),
                        display_name: intent.display_name.clone(),
                    });
                    return Err(OrchestratorError::authority_denied("make_call", reason));
                }
            }
            CallSource::System => self.telephony.track(&call_id),
        }

        // The record must exist before the transport can report on it
        let record = CallRecord::outgoing(call_id.clone(), &intent.to, intent.display_name.clone());
        if let Err(e) = self.registry.start_outgoing(record) {
            if !self.registry.contains(&call_id) {
                self.registry.take_intent(&call_id);
            }
            return Err(e.into());
        }
        info!(call_id = %call_id, to = %intent.to, source = ?intent.source, "Outgoing call started");

        self.events.emit(CallEvent::OutgoingCallInitiated {
            call_id: call_id.clone(),
            to: intent.to.clone(),
            source: intent.source,
            display_name: intent.display_name.clone(),
        });
        self.audio.force_earpiece();

        let request = ConnectRequest {
            call_id: call_id.clone(),
            to: intent.to.clone(),
            access_token,
            params: HashMap::from([("To".to_string(), intent.to.clone())]),
        };
        if let Err(e) = self.transport.connect(request).await {
            warn!(call_id = %call_id, error = %e, "Transport connect failed");
            self.finish_call(&call_id, DisconnectReason::Failure(e.to_string()))
                .await;
            return Err(OrchestratorError::transport_failed(e.to_string()));
        }
        Ok(call_id)
    }

    pub(crate) async fn answer_approved(&self, call_id: &CallId) -> OrchestratorResult<()> {
        let Some((record, handle)) = self.registry.promote_invite(call_id) else {
            return Err(OrchestratorError::call_not_found(call_id));
        };
        info!(call_id = %call_id, from = %record.remote_handle, "Answering call");
        self.audio.force_earpiece();

        let access_token = self.tokens.current_valid();
        if let Err(e) = self.transport.accept(&handle, access_token.as_deref()).await {
            warn!(call_id = %call_id, error = %e, "Transport accept failed");
            self.finish_call(call_id, DisconnectReason::Failure(e.to_string()))
                .await;
            return Err(OrchestratorError::transport_failed(e.to_string()));
        }
        Ok(())
    }

    /// Remove an invite declined on this device. Returns false if it was
    /// already gone.
    pub(crate) async fn decline_approved(&self, call_id: &CallId) -> bool {
        let Some((_, handle)) = self
            .registry
            .decline_invite(call_id, DisconnectReason::LocalHangup)
        else {
            debug!(call_id = %call_id, "Invite already gone");
            return false;
        };

        if let Err(e) = self.transport.reject(&handle).await {
            warn!(call_id = %call_id, error = %e, "Transport reject failed");
        }
        self.telephony
            .report_outcome(call_id, CallOutcome::DeclinedLocally)
            .await;
        info!(call_id = %call_id, "Incoming call rejected");
        self.events.emit(CallEvent::CallInviteCancelled {
            call_id: call_id.clone(),
            reason: CancelReason::UserDeclined,
        });
        true
    }

    /// Hang up a live call. Only the first caller does anything.
    pub(crate) async fn hangup_approved(&self, call_id: &CallId) {
        if !self.registry.mark_ending(call_id) {
            debug!(call_id = %call_id, "Hangup already handled");
            return;
        }
        info!(call_id = %call_id, "Hanging up");
        if let Err(e) = self.transport.disconnect(call_id).await {
            warn!(call_id = %call_id, error = %e, "Transport disconnect failed");
        }
        self.finish_call(call_id, DisconnectReason::LocalHangup).await;
    }

    pub(crate) async fn apply_mute(&self, call_id: &CallId, muted: bool) -> OrchestratorResult<()> {
        self.transport
            .set_muted(call_id, muted)
            .await
            .map_err(|e| OrchestratorError::transport_failed(e.to_string()))?;
        self.registry
            .set_muted(call_id, muted)
            .ok_or_else(|| OrchestratorError::call_not_found(call_id))?;
        info!(call_id = %call_id, muted, "Mute changed");
        Ok(())
    }

    pub(crate) async fn apply_hold(&self, call_id: &CallId, on_hold: bool) -> OrchestratorResult<()> {
        self.transport
            .set_on_hold(call_id, on_hold)
            .await
            .map_err(|e| OrchestratorError::transport_failed(e.to_string()))?;
        self.registry
            .set_on_hold(call_id, on_hold)
            .ok_or_else(|| OrchestratorError::call_not_found(call_id))?;
        info!(call_id = %call_id, on_hold, "Hold changed");
        Ok(())
    }

    /// Move a live call to `Disconnected` and tell everyone. Returns false when
    /// the call had already ended, so racing enders emit nothing twice.
    pub(crate) async fn finish_call(&self, call_id: &CallId, reason: DisconnectReason) -> bool {
        let (previous, record) = match self
            .registry
            .transition(call_id, CallSignal::Disconnect(reason))
        {
            TransitionOutcome::Applied { previous, record } => (previous, record),
            TransitionOutcome::NotFound => {
                debug!(call_id = %call_id, "Disconnect for a call that is not live");
                return false;
            }
            TransitionOutcome::Rejected(e) => {
                debug!(call_id = %call_id, error = %e, "Disconnect rejected");
                return false;
            }
        };

        self.registry.take_intent(call_id);
        let reason = record
            .disconnect_reason
            .clone()
            .unwrap_or(DisconnectReason::RemoteEnded);
        info!(call_id = %call_id, reason = ?reason, "Call ended");

        self.telephony.report_outcome(call_id, reason.outcome()).await;

        if record.direction == CallDirection::Outgoing
            && previous.is_establishing()
            && matches!(reason, DisconnectReason::Failure(_))
        {
            self.events.emit(CallEvent::OutgoingCallFailed {
                call_id: call_id.clone(),
                to: record.remote_handle.clone(),
                reason: failure_reason::CONNECTION_FAILED.to_string(),
                display_name: record.display_name.clone(),
            });
        }
        self.events.emit(CallEvent::CallDisconnected {
            call_id: call_id.clone(),
            error: reason.error().map(str::to_string),
        });

        if self.registry.live_count() == 0 {
            self.audio.deactivate();
        }
        true
    }
}
