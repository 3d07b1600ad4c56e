//! Voice transport seam
//!
//! The real-time voice engine is an opaque collaborator. The orchestrator asks
//! it to connect, accept, reject, disconnect, mute and hold calls through
//! [`VoiceTransport`], and the engine reports lifecycle changes back as
//! [`TransportEvent`]s fed into `CallOrchestrator::handle_transport_event`.

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::call::CallId;

/// Errors reported by the voice engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {reason}")]
    ConnectFailed { reason: String },

    #[error("unknown call: {call_id}")]
    UnknownCall { call_id: CallId },

    #[error("{operation} failed: {reason}")]
    OperationFailed { operation: String, reason: String },
}

impl TransportError {
    pub fn operation_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Raw invite retained so the engine can answer or reject it later
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteHandle {
    pub call_id: CallId,
    /// The decoded push payload, untouched
    pub payload: HashMap<String, String>,
}

impl InviteHandle {
    pub fn new(call_id: CallId, payload: HashMap<String, String>) -> Self {
        Self { call_id, payload }
    }
}

/// Everything the engine needs to dial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub call_id: CallId,
    pub to: String,
    pub access_token: String,
    pub params: HashMap<String, String>,
}

/// Voice engine operations
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Start dialing; lifecycle follows as events
    async fn connect(&self, request: ConnectRequest) -> Result<(), TransportError>;

    /// Accept a pending invite
    async fn accept(&self, invite: &InviteHandle, access_token: Option<&str>)
        -> Result<(), TransportError>;

    /// Reject a pending invite
    async fn reject(&self, invite: &InviteHandle) -> Result<(), TransportError>;

    async fn disconnect(&self, call_id: &CallId) -> Result<(), TransportError>;

    async fn set_muted(&self, call_id: &CallId, muted: bool) -> Result<(), TransportError>;

    async fn set_on_hold(&self, call_id: &CallId, on_hold: bool) -> Result<(), TransportError>;
}

/// Call quality warning raised by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QualityWarning {
    HighRtt,
    HighJitter,
    HighPacketLoss,
    LowMos,
    ConstantAudioInputLevel,
    /// A code this crate does not know, kept verbatim
    Unknown(String),
}

impl QualityWarning {
    /// Parse an engine warning code. Accepts `HIGH_RTT`, `high-rtt`,
    /// `highRtt` and similar spellings.
    pub fn from_code(code: &str) -> Self {
        let normalized: String = code
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "highrtt" => QualityWarning::HighRtt,
            "highjitter" => QualityWarning::HighJitter,
            "highpacketloss" | "highpacketslostfraction" => QualityWarning::HighPacketLoss,
            "lowmos" => QualityWarning::LowMos,
            "constantaudioinputlevel" => QualityWarning::ConstantAudioInputLevel,
            _ => QualityWarning::Unknown(code.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            QualityWarning::HighRtt => "high-rtt",
            QualityWarning::HighJitter => "high-jitter",
            QualityWarning::HighPacketLoss => "high-packet-loss",
            QualityWarning::LowMos => "low-mos",
            QualityWarning::ConstantAudioInputLevel => "constant-audio-input-level",
            QualityWarning::Unknown(code) => code,
        }
    }
}

impl fmt::Display for QualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for QualityWarning {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Lifecycle reports from the voice engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Ringing {
        call_id: CallId,
    },
    Connected {
        call_id: CallId,
    },
    /// The call never connected
    ConnectFailure {
        call_id: CallId,
        error: String,
    },
    Reconnecting {
        call_id: CallId,
        error: Option<String>,
    },
    Reconnected {
        call_id: CallId,
    },
    /// The call ended; `error` is set when it ended abnormally
    Disconnected {
        call_id: CallId,
        error: Option<String>,
    },
    QualityWarningsChanged {
        call_id: CallId,
        current: Vec<QualityWarning>,
        previous: Vec<QualityWarning>,
    },
}

impl TransportEvent {
    pub fn call_id(&self) -> &CallId {
        match self {
            TransportEvent::Ringing { call_id }
            | TransportEvent::Connected { call_id }
            | TransportEvent::ConnectFailure { call_id, .. }
            | TransportEvent::Reconnecting { call_id, .. }
            | TransportEvent::Reconnected { call_id }
            | TransportEvent::Disconnected { call_id, .. }
            | TransportEvent::QualityWarningsChanged { call_id, .. } => call_id,
        }
    }
}
