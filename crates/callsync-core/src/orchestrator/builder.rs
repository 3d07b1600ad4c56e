//! Builder wiring configuration and collaborators into a [`CallOrchestrator`]

use std::sync::Arc;

use super::CallOrchestrator;
use crate::audio::{AudioRouteController, AudioSession};
use crate::clock::{Clock, SystemClock};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::EventEmitter;
use crate::permission::MicrophonePermission;
use crate::push::PushWakeHandler;
use crate::registration::{RegistrationManager, VoiceBackend};
use crate::registry::CallRegistry;
use crate::store::{CredentialStore, JsonFileStore, MemoryStore, StateStore};
use crate::telephony::{TelephonyAdapter, TelephonyAuthority};
use crate::token::TokenManager;
use crate::transport::VoiceTransport;

/// Builder for creating a call orchestrator
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    authority: Option<Arc<dyn TelephonyAuthority>>,
    transport: Option<Arc<dyn VoiceTransport>>,
    backend: Option<Arc<dyn VoiceBackend>>,
    audio_session: Option<Arc<dyn AudioSession>>,
    microphone: Option<Arc<dyn MicrophonePermission>>,
    store: Option<Arc<dyn CredentialStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn authority(mut self, authority: Arc<dyn TelephonyAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn VoiceTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn VoiceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn audio_session(mut self, session: Arc<dyn AudioSession>) -> Self {
        self.audio_session = Some(session);
        self
    }

    pub fn microphone(mut self, microphone: Arc<dyn MicrophonePermission>) -> Self {
        self.microphone = Some(microphone);
        self
    }

    /// Use a specific credential store instead of one derived from the config
    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the orchestrator and restore any persisted credentials
    pub async fn build(self) -> OrchestratorResult<Arc<CallOrchestrator>> {
        let authority = self
            .authority
            .ok_or_else(|| OrchestratorError::missing_configuration("authority"))?;
        let transport = self
            .transport
            .ok_or_else(|| OrchestratorError::missing_configuration("transport"))?;
        let backend = self
            .backend
            .ok_or_else(|| OrchestratorError::missing_configuration("backend"))?;
        let audio_session = self
            .audio_session
            .ok_or_else(|| OrchestratorError::missing_configuration("audio_session"))?;
        let microphone = self
            .microphone
            .ok_or_else(|| OrchestratorError::missing_configuration("microphone"))?;

        let config = self.config;
        let backing: Arc<dyn CredentialStore> = match (self.store, &config.storage_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(JsonFileStore::new(path.clone())),
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let store = StateStore::new(backing);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let events = EventEmitter::new(config.event_channel_capacity);

        let tokens = Arc::new(TokenManager::new(store.clone(), clock.clone()));
        let registration = Arc::new(RegistrationManager::new(
            backend,
            tokens.clone(),
            store.clone(),
            config.registration_policy(),
            clock,
            events.clone(),
        ));

        let orchestrator = Arc::new(CallOrchestrator {
            push: PushWakeHandler::new(
                config.caller_name_param.clone(),
                config.client_handle_prefix.clone(),
            ),
            config,
            registry: CallRegistry::new(),
            tokens,
            registration,
            telephony: TelephonyAdapter::new(authority),
            transport,
            audio: AudioRouteController::new(audio_session),
            microphone,
            store,
            events,
        });

        orchestrator.restore().await?;
        tracing::info!("Call orchestrator ready");
        Ok(orchestrator)
    }
}
