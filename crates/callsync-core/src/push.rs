//! Push payload decoding
//!
//! Push notifications wake the app for incoming calls. Payloads arrive as a
//! flat string map and are decoded synchronously into a [`DecodedPushEvent`];
//! no I/O happens here.
//!
//! | key                | meaning                                   |
//! |--------------------|-------------------------------------------|
//! | `twi_message_type` | `twilio.voice.call` or `twilio.voice.cancel` |
//! | `twi_call_sid`     | call id                                   |
//! | `twi_from`         | caller handle                             |
//! | `twi_to`           | callee handle                             |
//! | `twi_params`       | URL-encoded custom parameters (optional)  |

use std::collections::HashMap;
use tracing::debug;

use crate::call::{CallId, CallRecord};
use crate::events::CancelReason;
use crate::registry::PendingInvite;
use crate::transport::InviteHandle;

pub const MESSAGE_TYPE_KEY: &str = "twi_message_type";
pub const CALL_SID_KEY: &str = "twi_call_sid";
pub const FROM_KEY: &str = "twi_from";
pub const TO_KEY: &str = "twi_to";
pub const PARAMS_KEY: &str = "twi_params";

pub const INVITE_MESSAGE_TYPE: &str = "twilio.voice.call";
pub const CANCEL_MESSAGE_TYPE: &str = "twilio.voice.cancel";

/// Flat push payload
pub type PushPayload = HashMap<String, String>;

/// What a push payload means
#[derive(Debug, Clone)]
pub enum DecodedPushEvent {
    /// A new incoming call; the invite carries its `Invited` record
    NewInvite(PendingInvite),
    /// The caller hung up before the call was answered
    CancelledInvite {
        call_id: CallId,
        reason: CancelReason,
    },
    Unrecognized,
}

/// Decodes push payloads into call events
#[derive(Debug, Clone)]
pub struct PushWakeHandler {
    caller_name_param: String,
    client_prefix: String,
}

impl PushWakeHandler {
    pub fn new(caller_name_param: impl Into<String>, client_prefix: impl Into<String>) -> Self {
        Self {
            caller_name_param: caller_name_param.into(),
            client_prefix: client_prefix.into(),
        }
    }

    pub fn handle(&self, payload: &PushPayload) -> DecodedPushEvent {
        let Some(message_type) = payload.get(MESSAGE_TYPE_KEY) else {
            debug!("Push payload has no message type");
            return DecodedPushEvent::Unrecognized;
        };

        match message_type.as_str() {
            INVITE_MESSAGE_TYPE => self.decode_invite(payload),
            CANCEL_MESSAGE_TYPE => match payload.get(CALL_SID_KEY) {
                Some(sid) if !sid.is_empty() => DecodedPushEvent::CancelledInvite {
                    call_id: CallId::from(sid.as_str()),
                    reason: CancelReason::RemoteCancelled,
                },
                _ => DecodedPushEvent::Unrecognized,
            },
            other => {
                debug!(message_type = %other, "Ignoring unrelated push");
                DecodedPushEvent::Unrecognized
            }
        }
    }

    fn decode_invite(&self, payload: &PushPayload) -> DecodedPushEvent {
        let (Some(sid), Some(from), Some(to)) = (
            payload.get(CALL_SID_KEY),
            payload.get(FROM_KEY),
            payload.get(TO_KEY),
        ) else {
            debug!("Invite push is missing required keys");
            return DecodedPushEvent::Unrecognized;
        };
        if sid.is_empty() {
            return DecodedPushEvent::Unrecognized;
        }

        let custom_params = payload
            .get(PARAMS_KEY)
            .map(|raw| parse_params(raw))
            .unwrap_or_default();

        let display_name = custom_params
            .get(&self.caller_name_param)
            .filter(|name| !name.is_empty())
            .map(|name| self.strip_prefix(name).to_string());

        let call_id = CallId::from(sid.as_str());
        let record = CallRecord::incoming(
            call_id.clone(),
            self.strip_prefix(from),
            to.clone(),
            display_name,
            custom_params,
        );

        DecodedPushEvent::NewInvite(PendingInvite {
            record,
            handle: InviteHandle::new(call_id, payload.clone()),
        })
    }

    fn strip_prefix<'a>(&self, handle: &'a str) -> &'a str {
        if self.client_prefix.is_empty() {
            return handle;
        }
        handle.strip_prefix(self.client_prefix.as_str()).unwrap_or(handle)
    }
}

impl Default for PushWakeHandler {
    fn default() -> Self {
        Self::new("callerName", "client:")
    }
}

fn parse_params(raw: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}
