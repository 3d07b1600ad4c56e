//! Event system for the orchestrator
//!
//! Everything the UI bridge needs to know arrives as a [`CallEvent`] on a
//! broadcast channel. Events serialize to `{"event": "<name>", "data": {...}}`
//! with camelCase names, matching what the bridge forwards to the app.

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::call::CallId;
use crate::registry::CallSource;
use crate::transport::QualityWarning;

/// Reasons carried by `outgoingCallFailed` and `callDisconnected`
pub mod failure_reason {
    /// The call authority refused to start the call
    pub const SYSTEM_REQUEST_DENIED: &str = "system_request_denied";
    /// The transport could not establish the call
    pub const CONNECTION_FAILED: &str = "connection_failed";
    pub const MISSING_ACCESS_TOKEN: &str = "missing_access_token";
    pub const MICROPHONE_PERMISSION_DENIED: &str = "microphone_permission_denied";
    /// The call authority dropped all of its calls
    pub const AUTHORITY_RESET: &str = "authority_reset";
}

/// Why an invite went away before it was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserDeclined,
    RemoteCancelled,
}

/// Events emitted by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum CallEvent {
    // Registration events
    RegistrationSuccess {
        device_address: String,
    },

    RegistrationFailure {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
    },

    // Incoming call events
    CallInviteReceived {
        call_id: CallId,
        from: String,
        to: String,
        custom_params: HashMap<String, String>,
    },

    CallInviteCancelled {
        call_id: CallId,
        reason: CancelReason,
    },

    // Outgoing call events
    OutgoingCallInitiated {
        call_id: CallId,
        to: String,
        source: CallSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },

    OutgoingCallFailed {
        call_id: CallId,
        to: String,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },

    // Call lifecycle events
    CallRinging {
        call_id: CallId,
    },

    CallConnected {
        call_id: CallId,
    },

    CallReconnecting {
        call_id: CallId,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    CallReconnected {
        call_id: CallId,
    },

    CallDisconnected {
        call_id: CallId,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    CallQualityWarningsChanged {
        call_id: CallId,
        current_warnings: Vec<QualityWarning>,
        previous_warnings: Vec<QualityWarning>,
    },
}

impl CallEvent {
    /// Bridge-facing event name
    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::RegistrationSuccess { .. } => "registrationSuccess",
            CallEvent::RegistrationFailure { .. } => "registrationFailure",
            CallEvent::CallInviteReceived { .. } => "callInviteReceived",
            CallEvent::CallInviteCancelled { .. } => "callInviteCancelled",
            CallEvent::OutgoingCallInitiated { .. } => "outgoingCallInitiated",
            CallEvent::OutgoingCallFailed { .. } => "outgoingCallFailed",
            CallEvent::CallRinging { .. } => "callRinging",
            CallEvent::CallConnected { .. } => "callConnected",
            CallEvent::CallReconnecting { .. } => "callReconnecting",
            CallEvent::CallReconnected { .. } => "callReconnected",
            CallEvent::CallDisconnected { .. } => "callDisconnected",
            CallEvent::CallQualityWarningsChanged { .. } => "callQualityWarningsChanged",
        }
    }

    /// The call this event is about, if any
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            CallEvent::RegistrationSuccess { .. } | CallEvent::RegistrationFailure { .. } => None,
            CallEvent::CallInviteReceived { call_id, .. }
            | CallEvent::CallInviteCancelled { call_id, .. }
            | CallEvent::OutgoingCallInitiated { call_id, .. }
            | CallEvent::OutgoingCallFailed { call_id, .. }
            | CallEvent::CallRinging { call_id }
            | CallEvent::CallConnected { call_id }
            | CallEvent::CallReconnecting { call_id, .. }
            | CallEvent::CallReconnected { call_id }
            | CallEvent::CallDisconnected { call_id, .. }
            | CallEvent::CallQualityWarningsChanged { call_id, .. } => Some(call_id),
        }
    }
}

/// Event stream type
pub type EventStream = BroadcastStream<CallEvent>;

/// Event emitter for orchestrator events
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<CallEvent>,
}

impl EventEmitter {
    /// Create a new event emitter with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event
    pub fn emit(&self, event: CallEvent) {
        tracing::trace!(event = event.name(), "Emitting event");
        // Ignore send errors (no receivers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events as a raw receiver
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events as a stream
    pub fn subscribe_stream(&self) -> EventStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Get the number of active receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event = CallEvent::CallInviteCancelled {
            call_id: CallId::from("CA1"),
            reason: CancelReason::RemoteCancelled,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "callInviteCancelled",
                "data": { "callId": "CA1", "reason": "remote_cancelled" }
            })
        );
        assert_eq!(event.name(), "callInviteCancelled");
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let event = CallEvent::OutgoingCallInitiated {
            call_id: CallId::from("c1"),
            to: "+15551234567".into(),
            source: CallSource::System,
            display_name: None,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "outgoingCallInitiated",
                "data": { "callId": "c1", "to": "+15551234567", "source": "system" }
            })
        );
    }

    #[test]
    fn test_quality_warnings_serialize_kebab_case() {
        let event = CallEvent::CallQualityWarningsChanged {
            call_id: CallId::from("c1"),
            current_warnings: vec![QualityWarning::HighRtt],
            previous_warnings: vec![],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"]["currentWarnings"], json!(["high-rtt"]));
        assert_eq!(value["data"]["previousWarnings"], json!([]));
    }

    #[tokio::test]
    async fn test_emit_without_receivers_is_harmless() {
        let emitter = EventEmitter::default();
        emitter.emit(CallEvent::CallRinging {
            call_id: CallId::from("c1"),
        });

        let mut rx = emitter.subscribe();
        emitter.emit(CallEvent::CallConnected {
            call_id: CallId::from("c1"),
        });
        assert_eq!(rx.recv().await.unwrap().name(), "callConnected");
        assert_eq!(emitter.receiver_count(), 1);
    }
}
