//! Login, logout, device address and permission operations

use tracing::{debug, info, warn};

use super::{CallOrchestrator, LoginStatus};
use crate::call::{CallSignal, DisconnectReason};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::{CallEvent, CancelReason};
use crate::permission::PermissionStatus;
use crate::telephony::CallOutcome;
use crate::token::TokenValidity;

impl CallOrchestrator {
    /// Validate and store an access token, then bind it to the device address
    /// if one is known.
    ///
    /// Registration problems do not fail the login; they surface as
    /// `registrationFailure` events.
    pub async fn login(&self, access_token: &str) -> OrchestratorResult<()> {
        if let TokenValidity::Invalid(reason) = self.tokens.validate(access_token) {
            warn!(reason = %reason, "Login refused");
            return Err(OrchestratorError::credential_invalid(reason.to_string()));
        }

        self.tokens.store(access_token).await?;
        info!(identity = ?self.tokens.identity(access_token), "Logged in");

        match self.registration.device_address() {
            Some(address) => {
                if let Err(e) = self.registration.register(access_token, &address).await {
                    warn!(error = %e, "Registration after login failed");
                }
            }
            None => debug!("No device address yet, registration deferred"),
        }
        Ok(())
    }

    /// End every call, unregister best-effort and clear persisted credentials
    pub async fn logout(&self) -> OrchestratorResult<()> {
        info!("Logging out");

        if let (Some(token), Some(address)) =
            (self.tokens.current(), self.registration.device_address())
        {
            self.registration.unregister(&token, &address).await;
        }

        self.end_all_calls(DisconnectReason::LocalHangup, CancelReason::UserDeclined)
            .await;
        self.audio.deactivate();

        self.tokens.forget();
        self.registration.invalidate();
        self.store.clear().await?;
        info!("Logged out");
        Ok(())
    }

    /// A stored token that has expired counts as logged out; the token is
    /// kept so a restart can still see it.
    pub fn is_logged_in(&self) -> LoginStatus {
        match self.tokens.current_valid() {
            Some(token) => LoginStatus {
                is_logged_in: true,
                has_valid_token: true,
                identity: self.tokens.identity(&token),
            },
            None => LoginStatus {
                is_logged_in: false,
                has_valid_token: false,
                identity: None,
            },
        }
    }

    /// Record a new push address from the platform. Re-registers when the
    /// address changed or the binding is due; returns whether it did.
    pub async fn update_device_address(&self, device_address: &str) -> OrchestratorResult<bool> {
        if device_address.is_empty() {
            return Err(OrchestratorError::internal_error("empty device address"));
        }
        Ok(self.registration.update_device_address(device_address).await?)
    }

    pub fn check_microphone_permission(&self) -> bool {
        self.microphone.status().is_granted()
    }

    pub async fn request_microphone_permission(&self) -> bool {
        let status = self.microphone.request().await;
        info!(?status, "Microphone permission requested");
        status.is_granted()
    }

    pub(crate) fn ensure_microphone(&self, operation: &str) -> OrchestratorResult<()> {
        match self.microphone.status() {
            PermissionStatus::Granted => Ok(()),
            status => {
                warn!(operation, ?status, "Microphone permission missing");
                Err(OrchestratorError::permission_denied(operation))
            }
        }
    }

    /// Tear down every call the registry knows about
    pub(crate) async fn end_all_calls(
        &self,
        live_reason: DisconnectReason,
        invite_reason: CancelReason,
    ) {
        let drained = self.registry.drain();

        for mut record in drained.live {
            if let Err(e) = self.transport.disconnect(&record.id).await {
                debug!(call_id = %record.id, error = %e, "Transport disconnect failed during teardown");
            }
            if record.apply(CallSignal::Disconnect(live_reason.clone())).is_err() {
                continue;
            }
            self.telephony
                .report_outcome(&record.id, live_reason.outcome())
                .await;
            self.events.emit(CallEvent::CallDisconnected {
                call_id: record.id.clone(),
                error: live_reason.error().map(str::to_string),
            });
        }

        for invite in drained.invites {
            if let Err(e) = self.transport.reject(&invite.handle).await {
                debug!(call_id = %invite.record.id, error = %e, "Transport reject failed during teardown");
            }
            let outcome = match invite_reason {
                CancelReason::UserDeclined => CallOutcome::DeclinedLocally,
                CancelReason::RemoteCancelled => CallOutcome::RemoteEnded,
            };
            self.telephony.report_outcome(&invite.record.id, outcome).await;
            self.events.emit(CallEvent::CallInviteCancelled {
                call_id: invite.record.id.clone(),
                reason: invite_reason,
            });
        }

        for intent in drained.intents {
            debug!(call_id = %intent.call_id, "Dropped outgoing intent");
        }
    }
}
