//! Credential persistence
//!
//! The access token, the device push address and the last binding time survive
//! restarts. They are kept in one [`PersistedState`] document behind a
//! [`CredentialStore`]; [`StateStore`] serializes read-modify-write cycles so
//! the token and registration components never clobber each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Everything that survives a restart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub access_token: Option<String>,
    pub device_address: Option<String>,
    pub last_binding_at: Option<DateTime<Utc>>,
}

/// Backing storage for [`PersistedState`]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<PersistedState, StoreError>;

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

/// JSON document on disk
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for JsonFileStore {
    async fn load(&self) -> Result<PersistedState, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let contents = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store, for tests and hosts without a writable disk
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: parking_lot::Mutex<PersistedState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: parking_lot::Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self) -> Result<PersistedState, StoreError> {
        Ok(self.state.lock().clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        *self.state.lock() = state.clone();
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.state.lock() = PersistedState::default();
        Ok(())
    }
}

/// Serialized access to a [`CredentialStore`]
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn CredentialStore>,
    lock: Arc<Mutex<()>>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn CredentialStore>) -> Self {
        Self {
            backend,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load(&self) -> Result<PersistedState, StoreError> {
        let _guard = self.lock.lock().await;
        self.backend.load().await
    }

    /// Load, modify and save in one step
    pub async fn update<F>(&self, f: F) -> Result<PersistedState, StoreError>
    where
        F: FnOnce(&mut PersistedState),
    {
        let _guard = self.lock.lock().await;
        let mut state = self.backend.load().await?;
        f(&mut state);
        self.backend.save(&state).await?;
        Ok(state)
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.backend.clear().await
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}
