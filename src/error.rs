//! Crate-level error type.
//!
//! The taxonomy follows the layering of the session stack: authorization
//! failures come from the OAuth flow, transport failures from HTTP, protocol
//! failures from the JMAP dispatcher. Partial success of a `*/set` call is not
//! an error; see [`crate::jmap::set::SetReport`].

use crate::auth::error::AuthError;

/// Unified error type for the session layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Terminal OAuth failure (state mismatch, IdP error, failed exchange).
    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthError),

    /// Network or HTTP-layer failure, non-2xx status, or undecodable body.
    #[error("Transport error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// Well-formed JMAP error (request-level problem details or a method-level
    /// `error` response).
    #[error("JMAP error {error_type}{}", .description.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Protocol {
        error_type: String,
        description: Option<String>,
    },

    /// Refresh was unavailable or failed; credentials have been cleared.
    #[error("Session expired; login required")]
    SessionExpired,

    /// No credentials are present.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The caller built an invalid batch (duplicate name, forward reference).
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Build a transport error from a status code and response body.
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transport {
            status,
            message: message.into(),
        }
    }

    /// Build a malformed-response transport error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: format!("malformed response: {}", message.into()),
        }
    }

    /// Whether this error means the bearer token was rejected.
    ///
    /// Matches HTTP 401, transport messages mentioning unauthorized/expired,
    /// and a missing token.
    pub fn is_authorization_failure(&self) -> bool {
        match self {
            Self::Transport { status: Some(401), .. } => true,
            Self::Transport { message, .. } => {
                let message = message.to_ascii_lowercase();
                message.contains("unauthorized") || message.contains("expired")
            }
            Self::NotAuthenticated => true,
            _ => false,
        }
    }

    /// HTTP status carried by a transport error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        tracing::debug!(error = %err, "HTTP client error");
        Self::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}

/// Result alias using the crate error.
pub type Result<T, E = Error> = std::result::Result<T, E>;
