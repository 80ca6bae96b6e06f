//! Error types for the auth module.

/// Errors produced by the authorization flow and credential storage.
///
/// Every variant except [`AuthError::Storage`] and [`AuthError::Http`] is an
/// authorization failure in the terminal sense: the caller must start a new
/// login rather than retry.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// `complete_login` was called with no login in progress.
    #[error("No pending authorization; call login() first")]
    NoPendingAuthorization,

    /// The callback `state` did not match the pending authorization.
    #[error("Invalid state parameter in authorization callback")]
    InvalidState,

    /// The identity provider returned an `error` parameter in the callback.
    #[error("Authorization denied by provider: {error}")]
    Denied {
        error: String,
        description: Option<String>,
    },

    /// The callback URL could not be interpreted.
    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    /// The token endpoint rejected the authorization code exchange.
    #[error("Code exchange failed: {0}")]
    ExchangeFailed(String),

    /// The token endpoint rejected the refresh token (expired or revoked).
    #[error("Refresh token rejected: {0}")]
    RefreshRejected(String),

    /// A refresh was requested but no refresh token is stored.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Server metadata discovery failed or returned an invalid document.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// A logout happened while the exchange was in flight; its result was discarded.
    #[error("Authorization superseded by logout")]
    Superseded,

    /// Credential storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// HTTP client error talking to the identity provider.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
