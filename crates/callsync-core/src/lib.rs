//! # callsync-core
//!
//! Device-side call session orchestration. A phone app receiving VoIP calls has
//! three event sources that know nothing about each other:
//!
//! - a **push channel** that wakes the app with "incoming call" and "caller hung
//!   up" notifications,
//! - the **system call authority** that owns the native call UI and can answer,
//!   end, hold, mute or start calls on its own,
//! - the **voice transport** that carries media and reports ringing, connected,
//!   reconnecting and disconnected.
//!
//! [`CallOrchestrator`] reconciles them into one registry of calls and one
//! event stream for the UI.
//!
//! ## Architecture
//!
//! ```text
//!   UI bridge      push payloads    authority actions    transport events
//!       |               |                  |                    |
//!       v               v                  v                    v
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         CallOrchestrator                             │
//! │  TokenManager  RegistrationManager  PushWakeHandler  TelephonyAdapter│
//! │                CallRegistry          AudioRouteController            │
//! └──────────────────────────────────────────────────────────────────────┘
//!       |                                                       |
//!       v                                                       v
//!   CallEvent broadcast                             VoiceTransport / VoiceBackend
//! ```
//!
//! Every platform collaborator is an injected trait object, so the whole
//! orchestrator runs against fakes in tests.

pub mod audio;
pub mod call;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod orchestrator;
pub mod permission;
pub mod push;
pub mod registration;
pub mod registry;
pub mod store;
pub mod telephony;
pub mod token;
pub mod transport;

// Public API exports
pub use audio::{AudioError, AudioRoute, AudioRouteController, AudioSession, AudioSignal, AudioState};
pub use call::{CallDirection, CallId, CallRecord, CallSignal, CallState, DisconnectReason};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, OrchestratorResult};
pub use events::{CallEvent, CancelReason, EventEmitter, EventStream};
pub use orchestrator::{CallOrchestrator, CallStatus, LoginStatus, OrchestratorBuilder, PendingInviteInfo};
pub use permission::{MicrophonePermission, PermissionStatus};
pub use push::{DecodedPushEvent, PushPayload, PushWakeHandler};
pub use registration::{
    BackendError, RegistrationError, RegistrationManager, RegistrationPolicy, RegistrationState,
    RegistrationStatus, VoiceBackend,
};
pub use registry::{CallRegistry, CallSource, PendingInvite, PendingOutgoingIntent};
pub use store::{CredentialStore, JsonFileStore, MemoryStore, PersistedState};
pub use telephony::{
    AuthorityAction, AuthorityDecision, AuthorityError, CallOutcome, StartCallRequest,
    TelephonyAdapter, TelephonyAuthority,
};
pub use token::{InvalidToken, TokenManager, TokenValidity};
pub use transport::{
    ConnectRequest, InviteHandle, QualityWarning, TransportError, TransportEvent, VoiceTransport,
};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
