//! Authenticated request client for the OGE backend.
//!
//! Every call reads the current credential from the [`CredentialStore`] at send
//! time. An expiry signal (HTTP 401, or a 200 whose body carries code 40003)
//! triggers exactly one refresh followed by one reissue of the same call.
//! Failures are returned as data inside [`Timed`] and never cross the client
//! boundary as panics.

mod error;
mod transport;

pub use error::{ApiError, ExpirySignal, RefreshError, TOKEN_EXPIRED_CODE};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::config::Settings;
use crate::core::credential::{Credential, CredentialStore};

/// Which credential, if any, goes into the `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    None,
    /// The process-wide stored credential; eligible for refresh-and-retry.
    Stored,
    /// A caller-supplied token. Never refreshed.
    Explicit(String),
}

impl AuthMode {
    /// Stored credential unless the caller supplied a non-empty token.
    pub fn from_override(token: Option<&str>) -> Self {
        match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => AuthMode::Explicit(t.to_string()),
            None => AuthMode::Stored,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteCall {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub auth: AuthMode,
    pub timeout: Duration,
}

impl RemoteCall {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            query: Vec::new(),
            body: None,
            auth: AuthMode::Stored,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Decoded response body. Some endpoints answer with a bare word instead of
/// JSON; that text is kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
    Empty,
}

impl Payload {
    pub fn decode(body: &str) -> Self {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Payload::Empty;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(v) => Payload::Json(v),
            Err(_) => Payload::Text(trimmed.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Payload::Json(v) => v,
            Payload::Text(s) => Value::String(s),
            Payload::Empty => Value::Null,
        }
    }

    pub fn is_token_expired(&self) -> bool {
        let Some(code) = self.as_json().and_then(|v| v.get("code")) else {
            return false;
        };
        code.as_i64() == Some(TOKEN_EXPIRED_CODE)
            || code.as_str().and_then(|s| s.trim().parse::<i64>().ok()) == Some(TOKEN_EXPIRED_CODE)
    }
}

/// A value paired with how long it took to produce.
#[derive(Debug, Clone)]
pub struct Timed<T> {
    pub value: T,
    pub elapsed: Duration,
}

impl<T> Timed<T> {
    pub fn new(value: T, elapsed: Duration) -> Self {
        Self { value, elapsed }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Timed<U> {
        Timed {
            value: f(self.value),
            elapsed: self.elapsed,
        }
    }
}

pub type RemoteCallResult = Result<Payload, ApiError>;

#[derive(Clone)]
pub struct AuthConfig {
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: String,
    pub timeout: Duration,
}

impl AuthConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            auth_url: settings.backend.auth_url.clone(),
            username: settings.auth.username.clone(),
            password: settings.auth.password.clone(),
            client_id: settings.auth.client_id.clone(),
            client_secret: settings.auth.client_secret.clone(),
            scopes: settings.auth.scopes.clone(),
            timeout: Duration::from_secs(settings.timeouts.auth_secs),
        }
    }
}

#[derive(Deserialize)]
struct TokenEnvelope {
    data: Option<TokenData>,
}

#[derive(Deserialize)]
struct TokenData {
    token: Option<String>,
    #[serde(rename = "tokenHead")]
    token_head: Option<String>,
}

pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    credentials: CredentialStore,
    auth: AuthConfig,
    refresh_gate: Mutex<()>,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        credentials: CredentialStore,
        auth: AuthConfig,
    ) -> Self {
        Self {
            transport,
            credentials,
            auth,
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub async fn call(&self, call: &RemoteCall) -> Timed<RemoteCallResult> {
        let started = Instant::now();
        let result = self.dispatch(call).await;
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => info!(
                "API call succeeded - {} {} - {:.4}s",
                call.method,
                call.url,
                elapsed.as_secs_f64()
            ),
            Err(e) => error!(
                "API call failed - {} {} - {:.4}s - {}",
                call.method,
                call.url,
                elapsed.as_secs_f64(),
                e
            ),
        }
        Timed::new(result, elapsed)
    }

    async fn dispatch(&self, call: &RemoteCall) -> RemoteCallResult {
        let mut retry_allowed = call.auth == AuthMode::Stored;
        loop {
            let response = self.transport.execute(self.build_request(call)).await?;
            let payload = Payload::decode(&response.body);

            let signal = if response.status == 401 {
                Some(ExpirySignal::Unauthorized)
            } else if response.status == 200 && payload.is_token_expired() {
                Some(ExpirySignal::ExpiredCode)
            } else {
                None
            };

            match signal {
                Some(trigger) if retry_allowed => {
                    warn!("{} on {}, refreshing token", trigger, call.url);
                    retry_allowed = false;
                    match self.refresh().await {
                        Ok(_) => {
                            info!("Token refreshed, reissuing {} {}", call.method, call.url);
                            continue;
                        }
                        Err(reason) => {
                            return Err(ApiError::RefreshFailed {
                                trigger,
                                reason: reason.to_string(),
                            });
                        }
                    }
                }
                Some(ExpirySignal::ExpiredCode) => {
                    return Err(ApiError::TokenExpired {
                        body: response.body,
                    });
                }
                _ => {}
            }

            if response.status != 200 {
                if response.status == 401 {
                    let preview = self
                        .credentials
                        .current()
                        .map(|c| crate::core::credential::preview(c.header_value(), 30))
                        .unwrap_or_else(|| "None".to_string());
                    warn!("401 from {} with token {}", call.url, preview);
                }
                return Err(ApiError::Backend {
                    status: response.status,
                    body: response.body,
                });
            }

            return Ok(payload);
        }
    }

    fn build_request(&self, call: &RemoteCall) -> HttpRequest {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        match &call.auth {
            AuthMode::None => {}
            AuthMode::Stored => match self.credentials.current() {
                Some(credential) => {
                    debug!("Using stored token {}", credential.preview());
                    headers.push((
                        "Authorization".to_string(),
                        credential.header_value().to_string(),
                    ));
                }
                None => debug!("No stored token, sending without Authorization"),
            },
            AuthMode::Explicit(token) => {
                let value = if token.starts_with("Bearer ") {
                    token.clone()
                } else {
                    format!("Bearer {}", token)
                };
                headers.push(("Authorization".to_string(), value));
            }
        }

        HttpRequest {
            method: call.method.clone(),
            url: call.url.clone(),
            query: call.query.clone(),
            headers,
            json: call.body.clone(),
            timeout: call.timeout,
        }
    }

    /// Obtain a fresh credential from the auth endpoint and store it.
    /// Concurrent callers queue behind one another; each performs its own
    /// round-trip and the last one to finish wins.
    pub async fn refresh(&self) -> Result<Credential, RefreshError> {
        let _gate = self.refresh_gate.lock().await;
        info!("Refreshing backend token...");

        let request = HttpRequest {
            method: Method::POST,
            url: self.auth.auth_url.clone(),
            query: vec![
                ("scopes".to_string(), self.auth.scopes.clone()),
                ("client_secret".to_string(), self.auth.client_secret.clone()),
                ("client_id".to_string(), self.auth.client_id.clone()),
                ("grant_type".to_string(), "password".to_string()),
                ("username".to_string(), self.auth.username.clone()),
                ("password".to_string(), self.auth.password.clone()),
            ],
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            json: Some(serde_json::json!({
                "username": self.auth.username,
                "password": self.auth.password,
            })),
            timeout: self.auth.timeout,
        };

        let response = self.transport.execute(request).await.map_err(|e| {
            error!("Token refresh request failed: {}", e);
            RefreshError::from(e)
        })?;

        if response.status != 200 {
            error!(
                "Token refresh failed - HTTP {} - {}",
                response.status, response.body
            );
            return Err(RefreshError::Status {
                status: response.status,
                body: response.body,
            });
        }

        let envelope: TokenEnvelope = serde_json::from_str(&response.body)
            .map_err(|e| RefreshError::Malformed(format!("{}: {}", e, response.body)))?;
        let data = envelope
            .data
            .ok_or_else(|| RefreshError::Malformed(format!("missing data: {}", response.body)))?;
        let token = data
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RefreshError::Malformed(format!("missing token: {}", response.body)))?;
        let head = data.token_head.unwrap_or_else(|| "Bearer".to_string());

        let credential = Credential::from_parts(&head, &token);
        self.credentials.replace(credential.clone());
        info!(
            "Token refreshed: {} (length {})",
            credential.preview(),
            credential.len()
        );
        Ok(credential)
    }
}

#[cfg(test)]
pub(crate) mod testing;
