//! Orchestrator configuration
//!
//! ```rust
//! use callsync_core::OrchestratorConfig;
//! use std::time::Duration;
//!
//! let config = OrchestratorConfig::new()
//!     .with_caller_name_param("CapacitorTwilioCallerName")
//!     .with_binding_refresh_after(Duration::from_secs(7 * 24 * 3600))
//!     .with_storage_path("/tmp/callsync/state.json");
//!
//! assert_eq!(config.caller_name_param, "CapacitorTwilioCallerName");
//! assert_eq!(config.event_channel_capacity, 1000);
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::registration::{RegistrationPolicy, DEFAULT_REGISTRATION_TTL};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Lifetime of a backend binding
    pub registration_ttl: Duration,
    /// Age after which a binding is refreshed
    pub binding_refresh_after: Duration,
    /// Custom invite parameter holding the caller's display name
    pub caller_name_param: String,
    /// Prefix stripped from client handles before display
    pub client_handle_prefix: String,
    pub event_channel_capacity: usize,
    /// Where credentials are persisted; in-memory when unset
    pub storage_path: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            registration_ttl: DEFAULT_REGISTRATION_TTL,
            binding_refresh_after: DEFAULT_REGISTRATION_TTL / 2,
            caller_name_param: "callerName".to_string(),
            client_handle_prefix: "client:".to_string(),
            event_channel_capacity: 1000,
            storage_path: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the binding TTL; the refresh threshold follows at half of it
    pub fn with_registration_ttl(mut self, ttl: Duration) -> Self {
        self.registration_ttl = ttl;
        self.binding_refresh_after = ttl / 2;
        self
    }

    pub fn with_binding_refresh_after(mut self, refresh_after: Duration) -> Self {
        self.binding_refresh_after = refresh_after;
        self
    }

    pub fn with_caller_name_param(mut self, param: impl Into<String>) -> Self {
        self.caller_name_param = param.into();
        self
    }

    pub fn with_client_handle_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.client_handle_prefix = prefix.into();
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn registration_policy(&self) -> RegistrationPolicy {
        RegistrationPolicy::new(self.registration_ttl, self.binding_refresh_after)
    }
}
