//! Call records and the per-call state machine
//!
//! A [`CallRecord`] is the single source of truth for one call. Its state only
//! moves forward, with the exception of the `Connected`/`Reconnecting` pair:
//!
//! ```text
//! outgoing: Idle -> Connecting -> (Ringing) -> Connected <-> Reconnecting -> Disconnected
//! incoming: Invited -> Answering -> Connected <-> Reconnecting -> Disconnected
//!           Invited -> Disconnected   (rejected or cancelled)
//! ```
//!
//! Any live state may drop straight to `Disconnected`. Once there the record is
//! frozen and every further signal is rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::telephony::CallOutcome;

/// Unique identifier for a call
///
/// Outgoing calls get a locally generated UUID; incoming calls reuse the id
/// carried by the invite.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    /// Generate a fresh id for an outgoing call
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Direction of a call (from the device's perspective)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// Placed from this device
    Outgoing,
    /// Delivered to this device by a push invite
    Incoming,
}

/// Current state of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// Outgoing call created, not yet approved
    Idle,
    /// Transport told to dial
    Connecting,
    /// Remote side is alerting
    Ringing,
    /// Incoming invite waiting for a decision
    Invited,
    /// Answer approved, transport accepting
    Answering,
    /// Media is flowing
    Connected,
    /// Media path lost, transport trying to recover
    Reconnecting,
    /// Call has ended
    Disconnected,
}

impl CallState {
    /// Check if the call has left the pending-invite set and not yet ended
    pub fn is_live(&self) -> bool {
        !matches!(self, CallState::Invited | CallState::Disconnected)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, CallState::Disconnected)
    }

    /// Check if the call is still being set up
    pub fn is_establishing(&self) -> bool {
        matches!(
            self,
            CallState::Idle | CallState::Connecting | CallState::Ringing | CallState::Answering
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Connecting => "connecting",
            CallState::Ringing => "ringing",
            CallState::Invited => "invited",
            CallState::Answering => "answering",
            CallState::Connected => "connected",
            CallState::Reconnecting => "reconnecting",
            CallState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Ended or declined from this device
    LocalHangup,
    /// Ended or cancelled by the remote party
    RemoteEnded,
    /// The transport reported an error
    Failure(String),
}

impl DisconnectReason {
    /// Outcome to report back to the call authority
    pub fn outcome(&self) -> CallOutcome {
        match self {
            DisconnectReason::LocalHangup => CallOutcome::DeclinedLocally,
            DisconnectReason::RemoteEnded => CallOutcome::RemoteEnded,
            DisconnectReason::Failure(error) => CallOutcome::Failed(error.clone()),
        }
    }

    /// Error string carried on `callDisconnected`, if any
    pub fn error(&self) -> Option<&str> {
        match self {
            DisconnectReason::Failure(error) => Some(error),
            _ => None,
        }
    }
}

/// Inputs that drive a call through its states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallSignal {
    StartApproved,
    Ringing,
    AnswerApproved,
    Connected,
    Reconnecting,
    Reconnected,
    Disconnect(DisconnectReason),
}

impl fmt::Display for CallSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallSignal::StartApproved => f.write_str("start-approved"),
            CallSignal::Ringing => f.write_str("ringing"),
            CallSignal::AnswerApproved => f.write_str("answer-approved"),
            CallSignal::Connected => f.write_str("connected"),
            CallSignal::Reconnecting => f.write_str("reconnecting"),
            CallSignal::Reconnected => f.write_str("reconnected"),
            CallSignal::Disconnect(_) => f.write_str("disconnect"),
        }
    }
}

/// Rejected state transition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("call {call_id} is already disconnected")]
    AlreadyDisconnected { call_id: CallId },

    #[error("call {call_id} cannot handle {signal} while {from}")]
    Invalid {
        call_id: CallId,
        from: CallState,
        signal: String,
    },
}

/// One call, inbound or outbound
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub id: CallId,
    pub direction: CallDirection,
    pub state: CallState,
    /// Caller or callee address, with any client prefix stripped
    pub remote_handle: String,
    /// Local address the invite was sent to (incoming only)
    pub local_handle: Option<String>,
    pub display_name: Option<String>,
    /// Only meaningful while connected
    pub muted: bool,
    /// Only meaningful while connected
    pub on_hold: bool,
    pub custom_params: HashMap<String, String>,
    pub history: Vec<CallState>,
    /// Set once a local hangup is underway
    pub ending_locally: bool,
    pub disconnect_reason: Option<DisconnectReason>,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallRecord {
    fn with_state(
        id: CallId,
        direction: CallDirection,
        state: CallState,
        remote_handle: String,
    ) -> Self {
        Self {
            id,
            direction,
            state,
            remote_handle,
            local_handle: None,
            display_name: None,
            muted: false,
            on_hold: false,
            custom_params: HashMap::new(),
            history: vec![state],
            ending_locally: false,
            disconnect_reason: None,
            created_at: Utc::now(),
            connected_at: None,
            ended_at: None,
        }
    }

    /// New outgoing call waiting for approval
    pub fn outgoing(id: CallId, to: impl Into<String>, display_name: Option<String>) -> Self {
        let mut record = Self::with_state(id, CallDirection::Outgoing, CallState::Idle, to.into());
        record.display_name = display_name;
        record
    }

    /// New incoming call from a push invite
    pub fn incoming(
        id: CallId,
        from: impl Into<String>,
        to: impl Into<String>,
        display_name: Option<String>,
        custom_params: HashMap<String, String>,
    ) -> Self {
        let mut record =
            Self::with_state(id, CallDirection::Incoming, CallState::Invited, from.into());
        record.local_handle = Some(to.into());
        record.display_name = display_name;
        record.custom_params = custom_params;
        record
    }

    /// Label to show for the remote party
    pub fn caller_label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.remote_handle)
    }

    /// Compute the state a signal would move this call to, without applying it
    pub fn next_state(&self, signal: &CallSignal) -> Result<CallState, TransitionError> {
        use CallDirection::*;
        use CallState::*;

        if self.state == Disconnected {
            return Err(TransitionError::AlreadyDisconnected {
                call_id: self.id.clone(),
            });
        }

        let next = match (self.direction, self.state, signal) {
            (Outgoing, Idle, CallSignal::StartApproved) => Some(Connecting),
            (Outgoing, Connecting, CallSignal::Ringing) => Some(Ringing),
            (Outgoing, Connecting | Ringing, CallSignal::Connected) => Some(Connected),
            (Incoming, Invited, CallSignal::AnswerApproved) => Some(Answering),
            (Incoming, Answering, CallSignal::Connected) => Some(Connected),
            (_, Connected, CallSignal::Reconnecting) => Some(Reconnecting),
            (_, Reconnecting, CallSignal::Reconnected) => Some(Connected),
            (_, _, CallSignal::Disconnect(_)) => Some(Disconnected),
            _ => None,
        };

        next.ok_or_else(|| TransitionError::Invalid {
            call_id: self.id.clone(),
            from: self.state,
            signal: signal.to_string(),
        })
    }

    /// Apply a signal, returning the previous state
    pub fn apply(&mut self, signal: CallSignal) -> Result<CallState, TransitionError> {
        let next = self.next_state(&signal)?;
        let previous = self.state;

        if let CallSignal::Disconnect(reason) = signal {
            // A hangup we started wins over the remote BYE that it provokes
            let reason = match reason {
                DisconnectReason::RemoteEnded if self.ending_locally => {
                    DisconnectReason::LocalHangup
                }
                other => other,
            };
            self.disconnect_reason = Some(reason);
            self.ended_at = Some(Utc::now());
        }
        if next == CallState::Connected && self.connected_at.is_none() {
            self.connected_at = Some(Utc::now());
        }

        self.state = next;
        self.history.push(next);
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing() -> CallRecord {
        CallRecord::outgoing(CallId::new(), "+15551234567", None)
    }

    fn incoming() -> CallRecord {
        CallRecord::incoming(
            CallId::from("CA1"),
            "alice",
            "bob",
            None,
            HashMap::new(),
        )
    }

    #[test]
    fn test_outgoing_path_visits_connecting() {
        let mut call = outgoing();
        call.apply(CallSignal::StartApproved).unwrap();
        call.apply(CallSignal::Ringing).unwrap();
        call.apply(CallSignal::Connected).unwrap();
        call.apply(CallSignal::Reconnecting).unwrap();
        call.apply(CallSignal::Reconnected).unwrap();
        call.apply(CallSignal::Disconnect(DisconnectReason::RemoteEnded))
            .unwrap();

        assert_eq!(
            call.history,
            vec![
                CallState::Idle,
                CallState::Connecting,
                CallState::Ringing,
                CallState::Connected,
                CallState::Reconnecting,
                CallState::Connected,
                CallState::Disconnected,
            ]
        );
        assert!(call.connected_at.is_some());
        assert_eq!(call.disconnect_reason, Some(DisconnectReason::RemoteEnded));
    }

    #[test]
    fn test_connecting_may_skip_ringing() {
        let mut call = outgoing();
        call.apply(CallSignal::StartApproved).unwrap();
        assert_eq!(call.apply(CallSignal::Connected).unwrap(), CallState::Connecting);
        assert_eq!(call.state, CallState::Connected);
    }

    #[test]
    fn test_incoming_path_never_connecting() {
        let mut call = incoming();
        call.apply(CallSignal::AnswerApproved).unwrap();
        call.apply(CallSignal::Connected).unwrap();
        call.apply(CallSignal::Disconnect(DisconnectReason::LocalHangup))
            .unwrap();

        assert!(!call.history.contains(&CallState::Connecting));
        assert_eq!(
            call.history,
            vec![
                CallState::Invited,
                CallState::Answering,
                CallState::Connected,
                CallState::Disconnected,
            ]
        );
    }

    #[test]
    fn test_backwards_transitions_rejected() {
        let mut call = outgoing();
        call.apply(CallSignal::StartApproved).unwrap();
        call.apply(CallSignal::Connected).unwrap();

        assert!(matches!(
            call.apply(CallSignal::Ringing),
            Err(TransitionError::Invalid { from: CallState::Connected, .. })
        ));
        assert!(incoming().next_state(&CallSignal::StartApproved).is_err());
        assert!(outgoing().next_state(&CallSignal::AnswerApproved).is_err());
    }

    #[test]
    fn test_disconnected_is_frozen() {
        let mut call = incoming();
        call.apply(CallSignal::Disconnect(DisconnectReason::RemoteEnded))
            .unwrap();
        let snapshot = call.clone();

        let err = call
            .apply(CallSignal::Disconnect(DisconnectReason::LocalHangup))
            .unwrap_err();
        assert!(matches!(err, TransitionError::AlreadyDisconnected { .. }));
        assert_eq!(call, snapshot);
    }

    #[test]
    fn test_local_hangup_wins_over_remote_end() {
        let mut call = outgoing();
        call.apply(CallSignal::StartApproved).unwrap();
        call.apply(CallSignal::Connected).unwrap();
        call.ending_locally = true;
        call.apply(CallSignal::Disconnect(DisconnectReason::RemoteEnded))
            .unwrap();
        assert_eq!(call.disconnect_reason, Some(DisconnectReason::LocalHangup));
    }

    #[test]
    fn test_disconnect_reason_outcomes() {
        assert_eq!(
            DisconnectReason::LocalHangup.outcome(),
            CallOutcome::DeclinedLocally
        );
        assert_eq!(
            DisconnectReason::Failure("31005".into()).outcome(),
            CallOutcome::Failed("31005".into())
        );
        assert_eq!(DisconnectReason::RemoteEnded.error(), None);
    }
}
