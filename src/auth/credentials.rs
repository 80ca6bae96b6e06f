//! Credential and pending-authorization data.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// OAuth credentials for one authenticated identity.
///
/// A credential without `expires_at` is treated as already expired.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    /// Bearer token presented on every JMAP call.
    pub access_token: String,

    /// Refresh token, if the provider issued one.
    pub refresh_token: Option<String>,

    /// Instant at which the access token stops being valid.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Build credentials from a token-endpoint response relative to now.
    pub fn new(access_token: String, refresh_token: Option<String>, expires_in: Option<i64>) -> Self {
        Self::issued_at(Utc::now(), access_token, refresh_token, expires_in)
    }

    /// Build credentials from a token-endpoint response relative to `now`.
    pub fn issued_at(
        now: DateTime<Utc>,
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Option<i64>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            // An `expires_in` chrono cannot represent leaves no expiry.
            expires_at: expires_in
                .and_then(Duration::try_seconds)
                .and_then(|lifetime| now.checked_add_signed(lifetime)),
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// `now >= expires_at`, or `true` when no expiry is known.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| now >= exp)
    }

    /// A non-empty refresh token, if present.
    pub fn usable_refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Keep the previous refresh token when a refresh response omits one.
    pub fn inherit_refresh_token(mut self, previous: &str) -> Self {
        if self.usable_refresh_token().is_none() {
            self.refresh_token = Some(previous.to_string());
        }
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// PKCE state held between `login()` and `complete_login()`.
///
/// Consumed exactly once.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub code_verifier: String,
    pub state: String,
    /// Redirect URI the authorization request was built with; the token
    /// exchange must repeat it verbatim.
    pub redirect_uri: String,
}

impl std::fmt::Debug for PendingAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthorization")
            .field("state", &self.state)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}
