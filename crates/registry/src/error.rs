use std::time::Duration;

use thiserror::Error;

use einvoice_core::TenantId;

/// Registry call failure, classified for retry decisions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited by registry")]
    RateLimited { retry_after: Option<Duration> },

    #[error("registry unavailable (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("credential rejected (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("request rejected (HTTP {status}): {body}")]
    BadRequest { status: u16, body: String },

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("unexpected HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("malformed registry response: {0}")]
    Decode(String),

    #[error("registry protocol violation: {0}")]
    Protocol(String),
}

impl RegistryError {
    /// Network, timeout, 5xx and 429 may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RegistryError::Network(_)
                | RegistryError::Timeout
                | RegistryError::RateLimited { .. }
                | RegistryError::Server { .. }
        )
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RegistryError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Map a non-success HTTP status.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => RegistryError::Unauthorized { status },
            404 => RegistryError::NotFound(body),
            400 | 422 => RegistryError::BadRequest { status, body },
            429 => RegistryError::RateLimited { retry_after },
            500..=599 => RegistryError::Server { status, body },
            _ => RegistryError::UnexpectedStatus { status, body },
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("no registry credential available for tenant {0}")]
    Unavailable(TenantId),

    #[error("credential source failed: {0}")]
    Source(String),
}
