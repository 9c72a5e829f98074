use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use serde::Deserialize;

/// A bearer credential in `"<tokenHead> <token>"` form.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    header: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Credential").field(&self.preview()).finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenClaims {
    pub exp: Option<i64>,
    pub user_name: Option<String>,
}

impl Credential {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }

    /// Join a token prefix and token value, trimming stray whitespace from the
    /// prefix so the header never carries a double space.
    pub fn from_parts(token_head: &str, token: &str) -> Self {
        Self::new(format!("{} {}", token_head.trim_end(), token))
    }

    pub fn header_value(&self) -> &str {
        &self.header
    }

    pub fn preview(&self) -> String {
        preview(&self.header, 50)
    }

    pub fn len(&self) -> usize {
        self.header.len()
    }

    /// The token part with any `Bearer ` prefix removed.
    pub fn token(&self) -> &str {
        self.header
            .strip_prefix("Bearer ")
            .unwrap_or(&self.header)
            .trim_start()
    }

    pub fn claims(&self) -> Result<TokenClaims, String> {
        decode_claims(self.token())
    }
}

/// Decode the payload segment of a JWT without verifying its signature.
pub fn decode_claims(token: &str) -> Result<TokenClaims, String> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| "token is not a JWT".to_string())?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| format!("invalid JWT payload encoding: {}", e))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid JWT payload: {}", e))
}

pub fn preview(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let head: String = value.chars().take(max_chars).collect();
    format!("{}...", head)
}

pub fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Process-wide holder of the single bearer credential. Cloning yields another
/// handle to the same slot. Every read copies the value out, so no caller keeps
/// a guard or a stale copy across an await point.
#[derive(Clone, Default)]
pub struct CredentialStore {
    slot: Arc<RwLock<Option<Credential>>>,
}

impl CredentialStore {
    pub fn new(initial: Option<Credential>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn current(&self) -> Option<Credential> {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn replace(&self, credential: Credential) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(credential);
    }
}
