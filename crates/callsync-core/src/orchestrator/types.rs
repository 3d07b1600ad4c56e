//! Snapshot types returned to the UI bridge

use serde::Serialize;
use std::collections::HashMap;

use crate::call::{CallId, CallState};
use crate::registry::PendingInvite;

/// Result of `is_logged_in`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginStatus {
    pub is_logged_in: bool,
    pub has_valid_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

/// An invite as shown in the call status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInviteInfo {
    pub call_id: CallId,
    pub from: String,
    pub to: String,
    pub custom_params: HashMap<String, String>,
}

impl From<&PendingInvite> for PendingInviteInfo {
    fn from(invite: &PendingInvite) -> Self {
        Self {
            call_id: invite.record.id.clone(),
            from: invite.record.caller_label().to_string(),
            to: invite.record.local_handle.clone().unwrap_or_default(),
            custom_params: invite.record.custom_params.clone(),
        }
    }
}

/// Result of `get_call_status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStatus {
    pub has_active_call: bool,
    pub is_on_hold: bool,
    pub is_muted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
    /// State of the focused call, serialized as `null` without one
    pub call_state: Option<CallState>,
    pub pending_invites: Vec<PendingInviteInfo>,
    pub active_calls_count: usize,
}
