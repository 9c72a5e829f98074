use super::transport::TransportError;

/// Application-level code the backend embeds in an otherwise successful
/// response when the bearer token has expired.
pub const TOKEN_EXPIRED_CODE: i64 = 40003;

/// What made the client decide the credential needs renewing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirySignal {
    ExpiredCode,
    Unauthorized,
}

impl std::fmt::Display for ExpirySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpirySignal::ExpiredCode => write!(f, "token expired (code {})", TOKEN_EXPIRED_CODE),
            ExpirySignal::Unauthorized => write!(f, "HTTP 401 unauthorized"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("token expired (code 40003): {body}")]
    TokenExpired { body: String },
    #[error("{trigger}; token refresh failed: {reason}")]
    RefreshFailed { trigger: ExpirySignal, reason: String },
    #[error("backend returned HTTP {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("backend rejected request: {message}")]
    Rejected { message: String },
    #[error("unexpected response payload: {0}")]
    UnexpectedPayload(String),
    #[error("no job graph was produced")]
    NoJobGraph,
}

impl ApiError {
    /// Stable label used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Transport(_) => "transport",
            ApiError::TokenExpired { .. } => "token_expired",
            ApiError::RefreshFailed { .. } => "refresh_failed",
            ApiError::Backend { .. } => "backend",
            ApiError::Rejected { .. } => "rejected",
            ApiError::UnexpectedPayload(_) => "unexpected_payload",
            ApiError::NoJobGraph => "no_job_graph",
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Backend { status, .. } => Some(*status),
            ApiError::RefreshFailed {
                trigger: ExpirySignal::Unauthorized,
                ..
            } => Some(401),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "status_code": self.status_code(),
        })
    }
}

/// Why a refresh attempt did not yield a credential.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    #[error("auth request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("auth endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed token response: {0}")]
    Malformed(String),
}
