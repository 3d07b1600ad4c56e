//! Registration with the voice backend
//!
//! A *binding* ties the current access token to this device's push address so
//! the backend can deliver incoming calls. Bindings live for a long time
//! (365 days by default) and are refreshed once they pass a configurable
//! threshold, half the TTL unless told otherwise. A binding past that
//! threshold is due for refresh, not expired.
//!
//! Registration outcomes are reported as `registrationSuccess` and
//! `registrationFailure` events. Failures are never retried automatically.
//!
//! ```rust
//! use callsync_core::registration::RegistrationPolicy;
//! use std::time::Duration;
//!
//! let policy = RegistrationPolicy::default()
//!     .with_ttl(Duration::from_secs(30 * 24 * 3600));
//! assert_eq!(policy.refresh_after, Duration::from_secs(15 * 24 * 3600));
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::events::{CallEvent, EventEmitter};
use crate::store::{PersistedState, StateStore};
use crate::token::{TokenManager, TokenValidity};

/// Default binding lifetime
pub const DEFAULT_REGISTRATION_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Error reported by the voice backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    pub code: Option<i32>,
}

impl BackendError {
    pub fn new(message: impl Into<String>, code: Option<i32>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The token was refused before reaching the backend
    #[error("Access token rejected: {reason}")]
    Expired { reason: String },

    #[error("No device push address available")]
    MissingDeviceAddress,

    #[error("Backend registration failed: {message}")]
    Backend { message: String, code: Option<i32> },
}

/// Voice backend binding operations
#[async_trait]
pub trait VoiceBackend: Send + Sync {
    async fn register(&self, access_token: &str, device_address: &str)
        -> Result<(), BackendError>;

    async fn unregister(&self, access_token: &str, device_address: &str)
        -> Result<(), BackendError>;
}

/// When bindings need refreshing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationPolicy {
    pub ttl: Duration,
    pub refresh_after: Duration,
}

impl RegistrationPolicy {
    pub fn new(ttl: Duration, refresh_after: Duration) -> Self {
        Self { ttl, refresh_after }
    }

    /// Set the TTL, refreshing at half of it
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self.refresh_after = ttl / 2;
        self
    }

    pub fn with_refresh_after(mut self, refresh_after: Duration) -> Self {
        self.refresh_after = refresh_after;
        self
    }

    /// True when there is no binding or it is older than the threshold
    pub fn is_due(&self, last_binding_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last) = last_binding_at else {
            return true;
        };
        let threshold =
            chrono::Duration::from_std(self.refresh_after).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(last) > threshold
    }
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRATION_TTL, DEFAULT_REGISTRATION_TTL / 2)
    }
}

/// Current registration status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    /// Never registered, or logged out
    Unregistered,
    /// Request in flight
    Registering,
    Registered,
    Failed,
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStatus::Unregistered => write!(f, "Unregistered"),
            RegistrationStatus::Registering => write!(f, "Registering"),
            RegistrationStatus::Registered => write!(f, "Registered"),
            RegistrationStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Process-wide registration state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationState {
    pub status: RegistrationStatus,
    pub device_address: Option<String>,
    pub last_binding_at: Option<DateTime<Utc>>,
    /// Expiry of the token used for the last attempt
    pub credential_valid_until: Option<DateTime<Utc>>,
}

impl Default for RegistrationState {
    fn default() -> Self {
        Self {
            status: RegistrationStatus::Unregistered,
            device_address: None,
            last_binding_at: None,
            credential_valid_until: None,
        }
    }
}

/// Binds the access token and device address to the voice backend
pub struct RegistrationManager {
    backend: Arc<dyn VoiceBackend>,
    tokens: Arc<TokenManager>,
    store: StateStore,
    policy: RegistrationPolicy,
    clock: Arc<dyn Clock>,
    events: EventEmitter,
    state: RwLock<RegistrationState>,
}

impl RegistrationManager {
    pub fn new(
        backend: Arc<dyn VoiceBackend>,
        tokens: Arc<TokenManager>,
        store: StateStore,
        policy: RegistrationPolicy,
        clock: Arc<dyn Clock>,
        events: EventEmitter,
    ) -> Self {
        Self {
            backend,
            tokens,
            store,
            policy,
            clock,
            events,
            state: RwLock::new(RegistrationState::default()),
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state.read().clone()
    }

    pub fn device_address(&self) -> Option<String> {
        self.state.read().device_address.clone()
    }

    pub fn policy(&self) -> RegistrationPolicy {
        self.policy
    }

    pub fn binding_due(&self) -> bool {
        let last = self.state.read().last_binding_at;
        self.policy.is_due(last, self.clock.now())
    }

    /// Bind `access_token` and `device_address` with the backend
    pub async fn register(
        &self,
        access_token: &str,
        device_address: &str,
    ) -> Result<(), RegistrationError> {
        let valid_until = match self.tokens.validate(access_token) {
            TokenValidity::ValidUntil(valid_until) => valid_until,
            TokenValidity::Invalid(reason) => {
                warn!(reason = %reason, "Skipping registration with invalid access token");
                self.state.write().status = RegistrationStatus::Failed;
                self.events.emit(CallEvent::RegistrationFailure {
                    error: reason.to_string(),
                    code: None,
                });
                return Err(RegistrationError::Expired {
                    reason: reason.to_string(),
                });
            }
        };

        {
            let mut state = self.state.write();
            state.status = RegistrationStatus::Registering;
            state.credential_valid_until = Some(valid_until);
        }

        info!(device_address = %device_address, "Registering with voice backend");
        if let Err(e) = self.backend.register(access_token, device_address).await {
            warn!(error = %e, code = ?e.code, "Voice backend registration failed");
            self.state.write().status = RegistrationStatus::Failed;
            self.events.emit(CallEvent::RegistrationFailure {
                error: e.message.clone(),
                code: e.code,
            });
            return Err(RegistrationError::Backend {
                message: e.message,
                code: e.code,
            });
        }

        let now = self.clock.now();
        {
            let mut state = self.state.write();
            state.status = RegistrationStatus::Registered;
            state.device_address = Some(device_address.to_string());
            state.last_binding_at = Some(now);
        }
        let address = device_address.to_string();
        if let Err(e) = self
            .store
            .update(|s| {
                s.device_address = Some(address);
                s.last_binding_at = Some(now);
            })
            .await
        {
            warn!(error = %e, "Failed to persist registration binding");
        }

        info!(device_address = %device_address, "Registered with voice backend");
        self.events.emit(CallEvent::RegistrationSuccess {
            device_address: device_address.to_string(),
        });
        Ok(())
    }

    /// Remove the binding. Failures are logged only.
    pub async fn unregister(&self, access_token: &str, device_address: &str) {
        match self.backend.unregister(access_token, device_address).await {
            Ok(()) => info!("Unregistered from voice backend"),
            Err(e) => warn!(error = %e, code = ?e.code, "Voice backend unregistration failed"),
        }
        let mut state = self.state.write();
        state.status = RegistrationStatus::Unregistered;
        state.last_binding_at = None;
    }

    /// Record a push address from the platform and re-register if it changed or
    /// the binding is due. Returns whether a registration was attempted.
    pub async fn update_device_address(
        &self,
        device_address: &str,
    ) -> Result<bool, RegistrationError> {
        let changed = self.device_address().as_deref() != Some(device_address);
        if !changed && !self.binding_due() {
            debug!("Device address unchanged and binding fresh");
            return Ok(false);
        }

        if changed {
            self.state.write().device_address = Some(device_address.to_string());
            let address = device_address.to_string();
            if let Err(e) = self.store.update(|s| s.device_address = Some(address)).await {
                warn!(error = %e, "Failed to persist device address");
            }
        }

        let Some(token) = self.tokens.current() else {
            debug!("No access token yet, registration deferred until login");
            return Ok(false);
        };
        self.register(&token, device_address).await?;
        Ok(true)
    }

    /// Refresh the binding if it is due; used after push wake-ups
    pub async fn refresh_if_due(&self) -> Result<bool, RegistrationError> {
        if !self.binding_due() {
            return Ok(false);
        }
        let Some(address) = self.device_address() else {
            return Err(RegistrationError::MissingDeviceAddress);
        };
        let Some(token) = self.tokens.current() else {
            return Ok(false);
        };
        debug!("Binding due for refresh");
        self.register(&token, &address).await?;
        Ok(true)
    }

    /// Seed state from persisted values after a restart
    pub fn restore(&self, persisted: &PersistedState) {
        let mut state = self.state.write();
        state.device_address = persisted.device_address.clone();
        state.last_binding_at = persisted.last_binding_at;
        if persisted.last_binding_at.is_some() {
            state.status = RegistrationStatus::Registered;
        }
    }

    /// Drop all in-memory state, on logout
    pub fn invalidate(&self) {
        *self.state.write() = RegistrationState::default();
    }
}

impl fmt::Debug for RegistrationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationManager")
            .field("policy", &self.policy)
            .field("state", &*self.state.read())
            .finish()
    }
}
