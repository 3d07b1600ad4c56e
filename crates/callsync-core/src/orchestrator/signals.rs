//! Entry points for push, call authority, transport and audio signals

use tracing::{debug, info, warn};

use super::CallOrchestrator;
use crate::audio::AudioSignal;
use crate::call::{CallId, CallSignal, DisconnectReason};
use crate::error::OrchestratorResult;
use crate::events::{failure_reason, CallEvent, CancelReason};
use crate::push::{DecodedPushEvent, PushPayload};
use crate::registry::{CallSource, PendingOutgoingIntent, TransitionOutcome};
use crate::telephony::{AuthorityAction, CallOutcome};
use crate::transport::TransportEvent;

impl CallOrchestrator {
    /// Handle a delivered push payload. Returns false if it was not a call push.
    pub async fn handle_push(&self, payload: &PushPayload) -> bool {
        match self.push.handle(payload) {
            DecodedPushEvent::NewInvite(invite) => {
                let record = invite.record.clone();
                let call_id = record.id.clone();
                if !self.registry.insert_invite(invite) {
                    debug!(call_id = %call_id, "Duplicate invite ignored");
                    return true;
                }
                info!(call_id = %call_id, from = %record.remote_handle, "Incoming call invite");

                self.telephony
                    .report_incoming(&call_id, &record.remote_handle, record.display_name.as_deref())
                    .await;
                self.events.emit(CallEvent::CallInviteReceived {
                    call_id,
                    from: record.caller_label().to_string(),
                    to: record.local_handle.clone().unwrap_or_default(),
                    custom_params: record.custom_params.clone(),
                });
                self.spawn_binding_refresh();
                true
            }
            DecodedPushEvent::CancelledInvite { call_id, reason } => {
                self.cancel_invite(&call_id, reason).await;
                true
            }
            DecodedPushEvent::Unrecognized => false,
        }
    }

    /// Handle an action the call authority originated
    pub async fn handle_authority_action(&self, action: AuthorityAction) {
        debug!(?action, "Call authority action");
        match action {
            AuthorityAction::StartCall {
                call_id,
                handle,
                display_name,
            } => self.start_system_call(call_id, handle, display_name).await,

            AuthorityAction::Answer { call_id } => {
                if !self.registry.has_invite(&call_id) {
                    debug!(call_id = %call_id, "Answer for unknown invite");
                    return;
                }
                if self.ensure_microphone("answer").is_err() {
                    self.fail_invite(&call_id, failure_reason::MICROPHONE_PERMISSION_DENIED)
                        .await;
                    return;
                }
                if let Err(e) = self.answer_approved(&call_id).await {
                    warn!(call_id = %call_id, error = %e, "Answer from call authority failed");
                }
            }

            AuthorityAction::End { call_id } => {
                if self.registry.has_invite(&call_id) {
                    self.decline_approved(&call_id).await;
                } else {
                    self.hangup_approved(&call_id).await;
                }
            }

            AuthorityAction::SetHeld { call_id, on_hold } => {
                if let Err(e) = self.apply_hold(&call_id, on_hold).await {
                    warn!(call_id = %call_id, error = %e, "Hold from call authority failed");
                }
            }

            AuthorityAction::SetMuted { call_id, muted } => {
                if let Err(e) = self.apply_mute(&call_id, muted).await {
                    warn!(call_id = %call_id, error = %e, "Mute from call authority failed");
                }
            }

            AuthorityAction::AudioSessionActivated => {
                if let Err(e) = self.audio.activate() {
                    warn!(error = %e, "Audio activation failed");
                }
            }

            AuthorityAction::AudioSessionDeactivated => self.audio.deactivate(),

            AuthorityAction::Reset => {
                warn!("Call authority reset, failing all calls");
                self.end_all_calls(
                    DisconnectReason::Failure(failure_reason::AUTHORITY_RESET.to_string()),
                    CancelReason::UserDeclined,
                )
                .await;
                self.telephony.forget_all();
                self.audio.deactivate();
            }
        }
    }

    /// Handle a lifecycle report from the voice engine
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Ringing { call_id } => {
                match self.registry.transition(&call_id, CallSignal::Ringing) {
                    TransitionOutcome::Applied { .. } => {
                        self.audio.force_earpiece();
                        self.events.emit(CallEvent::CallRinging { call_id });
                    }
                    outcome => Self::log_ignored(&call_id, "ringing", &outcome),
                }
            }

            TransportEvent::Connected { call_id } => {
                match self.registry.transition(&call_id, CallSignal::Connected) {
                    TransitionOutcome::Applied { .. } => {
                        self.registry.take_intent(&call_id);
                        info!(call_id = %call_id, "Call connected");
                        self.telephony
                            .report_outcome(&call_id, CallOutcome::Connected)
                            .await;
                        if let Err(e) = self.audio.activate() {
                            warn!(call_id = %call_id, error = %e, "Audio activation failed");
                        }
                        self.events.emit(CallEvent::CallConnected { call_id });
                    }
                    outcome => Self::log_ignored(&call_id, "connected", &outcome),
                }
            }

            TransportEvent::ConnectFailure { call_id, error } => {
                warn!(call_id = %call_id, error = %error, "Call failed to connect");
                self.finish_call(&call_id, DisconnectReason::Failure(error))
                    .await;
            }

            TransportEvent::Reconnecting { call_id, error } => {
                match self.registry.transition(&call_id, CallSignal::Reconnecting) {
                    TransitionOutcome::Applied { .. } => {
                        warn!(call_id = %call_id, error = ?error, "Call reconnecting");
                        self.events
                            .emit(CallEvent::CallReconnecting { call_id, error });
                    }
                    outcome => Self::log_ignored(&call_id, "reconnecting", &outcome),
                }
            }

            TransportEvent::Reconnected { call_id } => {
                match self.registry.transition(&call_id, CallSignal::Reconnected) {
                    TransitionOutcome::Applied { .. } => {
                        info!(call_id = %call_id, "Call reconnected");
                        self.events.emit(CallEvent::CallReconnected { call_id });
                    }
                    outcome => Self::log_ignored(&call_id, "reconnected", &outcome),
                }
            }

            TransportEvent::Disconnected { call_id, error } => {
                if self.registry.has_invite(&call_id) {
                    self.cancel_invite(&call_id, CancelReason::RemoteCancelled)
                        .await;
                    return;
                }
                let reason = match error {
                    Some(error) => DisconnectReason::Failure(error),
                    None => DisconnectReason::RemoteEnded,
                };
                self.finish_call(&call_id, reason).await;
            }

            TransportEvent::QualityWarningsChanged {
                call_id,
                current,
                previous,
            } => {
                if !self.registry.contains(&call_id) {
                    debug!(call_id = %call_id, "Quality warnings for unknown call");
                    return;
                }
                self.events.emit(CallEvent::CallQualityWarningsChanged {
                    call_id,
                    current_warnings: current,
                    previous_warnings: previous,
                });
            }
        }
    }

    /// Handle an audio session notification from the platform
    pub fn handle_audio_signal(&self, signal: AudioSignal) -> OrchestratorResult<()> {
        self.audio.handle_signal(signal)?;
        Ok(())
    }

    async fn start_system_call(
        &self,
        call_id: CallId,
        to: String,
        display_name: Option<String>,
    ) {
        // Echo of a start this device asked for, placed by `make_call`
        let requested_here = self
            .registry
            .intent(&call_id)
            .is_some_and(|intent| intent.source == CallSource::App);
        if requested_here || self.registry.contains(&call_id) {
            debug!(call_id = %call_id, "Call authority start for a call already placed");
            return;
        }

        let access_token = match self.tokens.current_valid() {
            Some(token) => token,
            None => {
                self.refuse_system_start(&call_id, &to, display_name, failure_reason::MISSING_ACCESS_TOKEN)
                    .await;
                return;
            }
        };
        if self.ensure_microphone("start_call").is_err() {
            self.refuse_system_start(
                &call_id,
                &to,
                display_name,
                failure_reason::MICROPHONE_PERMISSION_DENIED,
            )
            .await;
            return;
        }

        let intent = PendingOutgoingIntent::new(call_id.clone(), to, display_name, CallSource::System);
        if let Err(e) = self.place_outgoing(intent, access_token).await {
            warn!(call_id = %call_id, error = %e, "Call started by call authority failed");
        }
    }

    async fn refuse_system_start(
        &self,
        call_id: &CallId,
        to: &str,
        display_name: Option<String>,
        reason: &str,
    ) {
        warn!(call_id = %call_id, reason, "Refusing call started by call authority");
        self.telephony
            .report_outcome(call_id, CallOutcome::Failed(reason.to_string()))
            .await;
        self.events.emit(CallEvent::OutgoingCallFailed {
            call_id: call_id.clone(),
            to: to.to_string(),
            reason: reason.to_string(),
            display_name,
        });
    }

    /// Drop an invite the remote side withdrew. Unknown ids are ignored.
    async fn cancel_invite(&self, call_id: &CallId, reason: CancelReason) {
        if self
            .registry
            .decline_invite(call_id, DisconnectReason::RemoteEnded)
            .is_none()
        {
            debug!(call_id = %call_id, "Cancellation for unknown invite dropped");
            return;
        }
        info!(call_id = %call_id, "Incoming call cancelled by caller");
        self.telephony
            .report_outcome(call_id, CallOutcome::RemoteEnded)
            .await;
        self.events
            .emit(CallEvent::CallInviteCancelled { call_id: call_id.clone(), reason });
    }

    /// Fail an invite that cannot be answered
    async fn fail_invite(&self, call_id: &CallId, error: &str) {
        let Some((_, handle)) = self
            .registry
            .decline_invite(call_id, DisconnectReason::Failure(error.to_string()))
        else {
            return;
        };
        if let Err(e) = self.transport.reject(&handle).await {
            warn!(call_id = %call_id, error = %e, "Transport reject failed");
        }
        self.telephony
            .report_outcome(call_id, CallOutcome::Failed(error.to_string()))
            .await;
        self.events.emit(CallEvent::CallDisconnected {
            call_id: call_id.clone(),
            error: Some(error.to_string()),
        });
    }

    fn spawn_binding_refresh(&self) {
        if !self.registration.binding_due() {
            return;
        }
        let registration = self.registration.clone();
        tokio::spawn(async move {
            if let Err(e) = registration.refresh_if_due().await {
                debug!(error = %e, "Binding refresh after push failed");
            }
        });
    }

    fn log_ignored(call_id: &CallId, signal: &str, outcome: &TransitionOutcome) {
        match outcome {
            TransitionOutcome::NotFound => {
                debug!(call_id = %call_id, signal, "Transport event for unknown call")
            }
            TransitionOutcome::Rejected(e) => {
                debug!(call_id = %call_id, signal, error = %e, "Transport event ignored")
            }
            TransitionOutcome::Applied { .. } => {}
        }
    }
}
