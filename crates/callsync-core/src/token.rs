//! Access token handling
//!
//! Tokens are JWT-shaped (`header.payload.signature`). The payload is decoded
//! for its `exp` and `grants.identity` claims only; the signature is checked by
//! the voice backend, never here.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::store::{StateStore, StoreError};

/// Why a token was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidToken {
    #[error("malformed token: expected 3 segments, found {segments}")]
    Malformed { segments: usize },

    #[error("token payload is not base64url encoded JSON")]
    UndecodablePayload,

    #[error("token has no numeric exp claim")]
    MissingExpiry,

    #[error("expired")]
    Expired { expired_at: i64 },
}

/// Result of validating a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidity {
    ValidUntil(DateTime<Utc>),
    Invalid(InvalidToken),
}

impl TokenValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenValidity::ValidUntil(_))
    }
}

/// Decode the claims segment of a token
pub fn decode_claims(token: &str) -> Result<Value, InvalidToken> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(InvalidToken::Malformed {
            segments: segments.len(),
        });
    }

    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .map_err(|_| InvalidToken::UndecodablePayload)?;

    let claims: Value =
        serde_json::from_slice(&bytes).map_err(|_| InvalidToken::UndecodablePayload)?;
    if !claims.is_object() {
        return Err(InvalidToken::UndecodablePayload);
    }
    Ok(claims)
}

/// Validate a token against `now`
pub fn validate_at(token: &str, now: DateTime<Utc>) -> TokenValidity {
    let claims = match decode_claims(token) {
        Ok(claims) => claims,
        Err(e) => return TokenValidity::Invalid(e),
    };

    let Some(exp) = claims.get("exp").and_then(Value::as_f64) else {
        return TokenValidity::Invalid(InvalidToken::MissingExpiry);
    };

    // Fractional expiries keep their sub-second part
    if exp <= now.timestamp_micros() as f64 / 1e6 {
        return TokenValidity::Invalid(InvalidToken::Expired {
            expired_at: exp as i64,
        });
    }
    let nanos = (exp.fract() * 1e9) as u32;
    match DateTime::from_timestamp(exp.trunc() as i64, nanos) {
        Some(valid_until) => TokenValidity::ValidUntil(valid_until),
        None => TokenValidity::Invalid(InvalidToken::MissingExpiry),
    }
}

/// The `grants.identity` claim, if present
pub fn identity(token: &str) -> Option<String> {
    let claims = decode_claims(token).ok()?;
    claims
        .get("grants")?
        .get("identity")?
        .as_str()
        .map(str::to_string)
}

/// Owns the current access token
pub struct TokenManager {
    store: StateStore,
    clock: Arc<dyn Clock>,
    current: RwLock<Option<String>>,
}

impl TokenManager {
    pub fn new(store: StateStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            current: RwLock::new(None),
        }
    }

    pub fn validate(&self, token: &str) -> TokenValidity {
        validate_at(token, self.clock.now())
    }

    pub fn identity(&self, token: &str) -> Option<String> {
        identity(token)
    }

    /// Keep `token` in memory and persist it
    pub async fn store(&self, token: &str) -> Result<(), StoreError> {
        self.store
            .update(|state| state.access_token = Some(token.to_string()))
            .await?;
        *self.current.write() = Some(token.to_string());
        debug!("Stored access token");
        Ok(())
    }

    pub fn current(&self) -> Option<String> {
        self.current.read().clone()
    }

    /// The current token, only if it has not expired
    pub fn current_valid(&self) -> Option<String> {
        self.current().filter(|token| self.validate(token).is_valid())
    }

    /// Drop the token from memory and storage
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.forget();
        self.store.update(|state| state.access_token = None).await?;
        Ok(())
    }

    /// Drop the in-memory token only
    pub fn forget(&self) {
        *self.current.write() = None;
    }

    /// Load the persisted token into memory
    pub async fn restore(&self) -> Result<Option<String>, StoreError> {
        let state = self.store.load().await?;
        if let Some(token) = &state.access_token {
            info!("Restored persisted access token");
            *self.current.write() = Some(token.clone());
        }
        Ok(state.access_token)
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("has_token", &self.current.read().is_some())
            .finish()
    }
}
