//! LLM provider error taxonomy

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by LLM provider calls.
///
/// The retry policy is owned by the service layer, not the provider; this
/// enum only classifies.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient API error {status}: {message}")]
    Transient { status: u16, message: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Classify an HTTP error status into the taxonomy.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            429 => Self::RateLimited { retry_after: None },
            401 | 403 => Self::Auth(message),
            s if s >= 500 => Self::Transient { status: s, message },
            _ => Self::BadRequest(message),
        }
    }

    /// Whether the service should retry this call
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transient { .. } | Self::Timeout(_) => true,
            Self::Network(err) => !err.is_builder(),
            Self::BadRequest(_) | Self::Auth(_) | Self::InvalidResponse(_) => false,
        }
    }

    /// Provider-suggested delay before retrying, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
