//! Error types for the call orchestrator
//!
//! Every public operation on [`CallOrchestrator`](crate::CallOrchestrator) returns an
//! [`OrchestratorResult`]. Failures are grouped by category so callers can decide
//! how to react:
//!
//! - **Credential errors** - the access token is missing, malformed or expired.
//!   Fetch a fresh token and call `login` again; never retried internally.
//! - **Authority errors** - the system call authority refused the action. The
//!   call is not placed and an `outgoingCallFailed` event accompanies the error.
//! - **Transport errors** - the voice engine failed to connect or act on a call.
//! - **State errors** - the call does not exist or is not in a state that allows
//!   the operation. Check `get_call_status` first.
//! - **Permission errors** - microphone access was not granted.
//!
//! ```rust,no_run
//! # use callsync_core::{CallOrchestrator, OrchestratorError};
//! # use std::sync::Arc;
//! # async fn example(orchestrator: Arc<CallOrchestrator>) {
//! match orchestrator.make_call("+15551234567").await {
//!     Ok(call_id) => println!("Dialing {}", call_id),
//!     Err(OrchestratorError::PermissionDenied { .. }) => {
//!         let _ = orchestrator.request_microphone_permission().await;
//!     }
//!     Err(e) if e.category() == "credential" => {
//!         // Refresh the access token and log in again
//!     }
//!     Err(e) => eprintln!("Call failed: {}", e),
//! }
//! # }
//! ```
//!
//! Registration failures are never returned from call operations. They are
//! reported through `registrationFailure` events and the `register` result.

use thiserror::Error;

use crate::audio::AudioError;
use crate::call::{CallId, CallState, TransitionError};
use crate::registration::RegistrationError;
use crate::store::StoreError;

/// Result type alias for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors surfaced by the orchestrator's operation surface
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    /// Credential errors
    #[error("Invalid access token: {reason}")]
    CredentialInvalid { reason: String },

    #[error("Not logged in")]
    NotLoggedIn,

    /// The system call authority refused the action
    #[error("Call authority denied {operation}: {reason}")]
    AuthorityDenied { operation: String, reason: String },

    #[error("Transport failed: {reason}")]
    TransportFailed { reason: String },

    #[error("Permission denied: {operation}")]
    PermissionDenied { operation: String },

    /// Call related errors
    #[error("Call not found: {call_id}")]
    CallNotFound { call_id: CallId },

    #[error("Invalid call state for call {call_id}: current state is {current_state:?}")]
    InvalidCallState {
        call_id: CallId,
        current_state: CallState,
    },

    #[error("No active call")]
    NoActiveCall,

    #[error("Audio route change failed: {reason}")]
    AudioRouteFailed { reason: String },

    #[error("Registration failed: {reason}")]
    RegistrationFailed { reason: String },

    #[error("Storage error: {reason}")]
    Storage { reason: String },

    /// Configuration errors
    #[error("Missing required configuration: {field}")]
    MissingConfiguration { field: String },

    /// Generic errors
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl OrchestratorError {
    /// Create an invalid credential error
    pub fn credential_invalid(reason: impl Into<String>) -> Self {
        Self::CredentialInvalid { reason: reason.into() }
    }

    /// Create an authority denial error
    pub fn authority_denied(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AuthorityDenied {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport failure error
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        Self::TransportFailed { reason: reason.into() }
    }

    /// Create a permission denied error
    pub fn permission_denied(operation: impl Into<String>) -> Self {
        Self::PermissionDenied { operation: operation.into() }
    }

    /// Create a call not found error
    pub fn call_not_found(call_id: &CallId) -> Self {
        Self::CallNotFound { call_id: call_id.clone() }
    }

    /// Create a missing configuration error
    pub fn missing_configuration(field: impl Into<String>) -> Self {
        Self::MissingConfiguration { field: field.into() }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Check if the same operation may succeed when tried again later
    pub fn is_recoverable(&self) -> bool {
        match self {
            OrchestratorError::TransportFailed { .. }
            | OrchestratorError::AudioRouteFailed { .. }
            | OrchestratorError::RegistrationFailed { .. }
            | OrchestratorError::Storage { .. } => true,

            // Needs user or caller action first
            OrchestratorError::CredentialInvalid { .. }
            | OrchestratorError::NotLoggedIn
            | OrchestratorError::AuthorityDenied { .. }
            | OrchestratorError::PermissionDenied { .. } => false,

            OrchestratorError::CallNotFound { .. }
            | OrchestratorError::InvalidCallState { .. }
            | OrchestratorError::NoActiveCall
            | OrchestratorError::MissingConfiguration { .. }
            | OrchestratorError::InternalError { .. } => false,
        }
    }

    /// Check if error is call-related
    pub fn is_call_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::CallNotFound { .. }
                | OrchestratorError::InvalidCallState { .. }
                | OrchestratorError::NoActiveCall
        )
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            OrchestratorError::CredentialInvalid { .. } | OrchestratorError::NotLoggedIn => {
                "credential"
            }

            OrchestratorError::AuthorityDenied { .. } => "authority",

            OrchestratorError::TransportFailed { .. } => "transport",

            OrchestratorError::CallNotFound { .. }
            | OrchestratorError::InvalidCallState { .. }
            | OrchestratorError::NoActiveCall => "call",

            OrchestratorError::AudioRouteFailed { .. } => "audio",

            OrchestratorError::RegistrationFailed { .. } => "registration",

            OrchestratorError::PermissionDenied { .. } => "permission",

            OrchestratorError::MissingConfiguration { .. } => "configuration",

            OrchestratorError::Storage { .. } | OrchestratorError::InternalError { .. } => {
                "system"
            }
        }
    }
}

impl From<TransitionError> for OrchestratorError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::AlreadyDisconnected { call_id } => Self::InvalidCallState {
                call_id,
                current_state: CallState::Disconnected,
            },
            TransitionError::Invalid { call_id, from, .. } => Self::InvalidCallState {
                call_id,
                current_state: from,
            },
        }
    }
}

impl From<AudioError> for OrchestratorError {
    fn from(err: AudioError) -> Self {
        Self::AudioRouteFailed { reason: err.to_string() }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        Self::Storage { reason: err.to_string() }
    }
}

impl From<RegistrationError> for OrchestratorError {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::Expired { reason } => Self::CredentialInvalid { reason },
            other => Self::RegistrationFailed { reason: other.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(OrchestratorError::NotLoggedIn.category(), "credential");
        assert_eq!(
            OrchestratorError::authority_denied("start", "busy").category(),
            "authority"
        );
        assert_eq!(OrchestratorError::NoActiveCall.category(), "call");
        assert!(OrchestratorError::NoActiveCall.is_call_error());
    }

    #[test]
    fn test_recoverability() {
        assert!(OrchestratorError::transport_failed("timeout").is_recoverable());
        assert!(!OrchestratorError::credential_invalid("expired").is_recoverable());
        assert!(!OrchestratorError::permission_denied("make_call").is_recoverable());
    }

    #[test]
    fn test_transition_error_maps_to_state_error() {
        let err: OrchestratorError = TransitionError::AlreadyDisconnected {
            call_id: CallId::from("CA1"),
        }
        .into();
        match err {
            OrchestratorError::InvalidCallState { current_state, .. } => {
                assert_eq!(current_state, CallState::Disconnected)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
