//! Microphone permission source

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// The user has not been asked yet
    Undetermined,
}

impl PermissionStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionStatus::Granted)
    }
}

/// Platform microphone permission
#[async_trait]
pub trait MicrophonePermission: Send + Sync {
    fn status(&self) -> PermissionStatus;

    /// Prompt the user if needed and return the resulting status
    async fn request(&self) -> PermissionStatus;
}
