//! The call orchestrator
//!
//! [`CallOrchestrator`] composes the token, registration, push, telephony,
//! transport and audio components into one consistent view of the device's
//! calls. It has four entry points that may run concurrently:
//!
//! - **UI requests** - `login`, `make_call`, `accept_call`, `end_call`, ...
//! - **Push delivery** - [`handle_push`](CallOrchestrator::handle_push)
//! - **Call authority callbacks** - [`handle_authority_action`](CallOrchestrator::handle_authority_action)
//! - **Transport callbacks** - [`handle_transport_event`](CallOrchestrator::handle_transport_event)
//!
//! State-changing UI actions always ask the call authority first, then drive the
//! transport, then update the registry, then emit an event. Actions that the
//! authority originates skip the approval step and share the rest of the path.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use callsync_core::*;
//! # use std::sync::Arc;
//! # async fn example(
//! #     authority: Arc<dyn TelephonyAuthority>,
//! #     transport: Arc<dyn VoiceTransport>,
//! #     backend: Arc<dyn VoiceBackend>,
//! #     audio: Arc<dyn AudioSession>,
//! #     microphone: Arc<dyn MicrophonePermission>,
//! # ) -> OrchestratorResult<()> {
//! let orchestrator = OrchestratorBuilder::new()
//!     .config(OrchestratorConfig::new().with_storage_path("/var/lib/app/calls.json"))
//!     .authority(authority)
//!     .transport(transport)
//!     .backend(backend)
//!     .audio_session(audio)
//!     .microphone(microphone)
//!     .build()
//!     .await?;
//!
//! let mut events = orchestrator.subscribe_events();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{}", serde_json::to_string(&event).unwrap_or_default());
//!     }
//! });
//!
//! orchestrator.login("eyJ...").await?;
//! let call_id = orchestrator.make_call("+15551234567").await?;
//! orchestrator.end_call(Some(call_id)).await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod calls;
pub mod session;
pub mod signals;
pub mod types;

pub use builder::OrchestratorBuilder;
pub use types::{CallStatus, LoginStatus, PendingInviteInfo};

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::audio::AudioRouteController;
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorResult;
use crate::events::{CallEvent, EventEmitter, EventStream};
use crate::permission::MicrophonePermission;
use crate::push::PushWakeHandler;
use crate::registration::RegistrationManager;
use crate::registry::CallRegistry;
use crate::store::StateStore;
use crate::telephony::TelephonyAdapter;
use crate::token::TokenManager;
use crate::transport::VoiceTransport;

/// Top-level call session orchestrator
pub struct CallOrchestrator {
    config: OrchestratorConfig,
    registry: CallRegistry,
    tokens: Arc<TokenManager>,
    registration: Arc<RegistrationManager>,
    push: PushWakeHandler,
    telephony: TelephonyAdapter,
    transport: Arc<dyn VoiceTransport>,
    audio: AudioRouteController,
    microphone: Arc<dyn MicrophonePermission>,
    store: StateStore,
    events: EventEmitter,
}

impl CallOrchestrator {
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The call registry, for diagnostics
    pub fn registry(&self) -> &CallRegistry {
        &self.registry
    }

    pub fn registration(&self) -> &Arc<RegistrationManager> {
        &self.registration
    }

    pub fn audio(&self) -> &AudioRouteController {
        &self.audio
    }

    /// Subscribe to orchestrator events
    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Subscribe to orchestrator events as a stream
    pub fn event_stream(&self) -> EventStream {
        self.events.subscribe_stream()
    }

    /// Load persisted credentials and refresh the binding if it is due
    pub(crate) async fn restore(&self) -> OrchestratorResult<()> {
        let persisted = self.store.load().await?;
        self.registration.restore(&persisted);

        let Some(token) = self.tokens.restore().await? else {
            return Ok(());
        };
        if !self.tokens.validate(&token).is_valid() {
            info!("Persisted access token has expired, waiting for a new login");
            return Ok(());
        }

        if let Some(address) = persisted.device_address {
            if self.registration.binding_due() {
                if let Err(e) = self.registration.register(&token, &address).await {
                    warn!(error = %e, "Binding refresh after restore failed");
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CallOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOrchestrator")
            .field("config", &self.config)
            .field("registry", &self.registry.stats())
            .field("registration", &self.registration)
            .finish_non_exhaustive()
    }
}
