//! OAuth 2.0 authorization code flow with PKCE.
//!
//! # Key Characteristics
//! - Token request format: form-encoded (standard OAuth)
//! - Client secret: optional, sent only for confidential clients
//! - Auth URL parameters: `client_id`, `redirect_uri`, `response_type=code`,
//!   `scope`, `state`, `code_challenge`, `code_challenge_method=S256`, plus
//!   any configured extra parameters
//!
//! Endpoints come from [`ServerMetadata`], either discovered or configured.

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::auth::callback::{CallbackParams, validate_callback};
use crate::auth::credentials::{Credentials, PendingAuthorization};
use crate::auth::discovery::ServerMetadata;
use crate::auth::error::AuthError;
use crate::auth::pkce::{PKCE_METHOD, Pkce, generate_state};
use crate::config::OAuthConfig;

/// Cap on how much of an unparseable error body ends up in an error message.
const MAX_ERROR_BODY: usize = 256;

/// Token response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Error response from the token endpoint (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenErrorResponse {
    fn message(&self) -> String {
        match self.error_description {
            Some(ref desc) => format!("{}: {}", self.error, desc),
            None => self.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
        }
    }
}

/// Builds authorization requests and exchanges codes or refresh tokens for
/// [`Credentials`]. Holds no mutable state; the session manager owns that.
#[derive(Debug, Clone)]
pub struct AuthorizationFlow {
    http: reqwest::Client,
    config: OAuthConfig,
}

impl AuthorizationFlow {
    pub fn new(http: reqwest::Client, config: OAuthConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Build the authorization URL and the PKCE state that must be kept until
    /// the callback arrives.
    pub fn begin_authorization(
        &self,
        metadata: &ServerMetadata,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<(Url, PendingAuthorization), AuthError> {
        let pkce = Pkce::generate();
        let state = generate_state();
        let scope = scopes.join(" ");

        let endpoint = metadata.authorization_endpoint.as_str();
        let separator = if metadata.authorization_endpoint.query().is_some() {
            '&'
        } else {
            '?'
        };

        let mut url = format!(
            "{}{}client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&code_challenge={}&code_challenge_method={}",
            endpoint,
            separator,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(&state),
            urlencoding::encode(&pkce.challenge),
            PKCE_METHOD,
        );
        for (key, value) in &self.config.extra_params {
            url.push('&');
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }

        let url = Url::parse(&url)
            .map_err(|e| AuthError::Discovery(format!("invalid authorization URL: {}", e)))?;

        let pending = PendingAuthorization {
            code_verifier: pkce.verifier,
            state,
            redirect_uri: redirect_uri.to_string(),
        };

        Ok((url, pending))
    }

    /// Validate the callback against `pending` and exchange its code for tokens.
    ///
    /// Terminal on any failure; a rejected code is never retried.
    pub async fn exchange_code(
        &self,
        metadata: &ServerMetadata,
        callback_url: &str,
        pending: &PendingAuthorization,
    ) -> Result<Credentials, AuthError> {
        let params = CallbackParams::parse(callback_url)?;
        let code = validate_callback(&params, &pending.state)?;

        debug!("Exchanging authorization code for tokens");

        let mut form = vec![
            ("grant_type", Grant::AuthorizationCode.as_str()),
            ("code", code.as_str()),
            ("redirect_uri", pending.redirect_uri.as_str()),
            ("code_verifier", pending.code_verifier.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(ref secret) = self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let token = self
            .post_token(&metadata.token_endpoint, &form, Grant::AuthorizationCode)
            .await?;

        debug!("Authorization code exchange successful");

        Ok(Credentials::new(
            token.access_token,
            token.refresh_token.filter(|t| !t.is_empty()),
            token.expires_in,
        ))
    }

    /// Exchange a refresh token for fresh credentials. Does not retry.
    ///
    /// When the response omits `refresh_token`, the one passed in is kept.
    pub async fn exchange_refresh_token(
        &self,
        metadata: &ServerMetadata,
        refresh_token: &str,
    ) -> Result<Credentials, AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::NoRefreshToken);
        }

        debug!("Refreshing access token");

        let mut form = vec![
            ("grant_type", Grant::RefreshToken.as_str()),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(ref secret) = self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let token = self
            .post_token(&metadata.token_endpoint, &form, Grant::RefreshToken)
            .await?;

        debug!("Token refresh successful");

        Ok(Credentials::new(token.access_token, token.refresh_token, token.expires_in)
            .inherit_refresh_token(refresh_token))
    }

    async fn post_token(
        &self,
        token_endpoint: &Url,
        form: &[(&str, &str)],
        grant: Grant,
    ) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(token_endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(error) => {
                    warn!(
                        grant = grant.as_str(),
                        error = %error.error,
                        description = ?error.error_description,
                        "Token request failed"
                    );
                    if grant == Grant::RefreshToken && error.error == "invalid_grant" {
                        return Err(AuthError::RefreshRejected(error.message()));
                    }
                    error.message()
                }
                Err(_) => {
                    warn!(grant = grant.as_str(), status = status.as_u16(), "Token request failed");
                    format!("HTTP {}: {}", status.as_u16(), truncate(&body))
                }
            };

            return Err(match grant {
                Grant::AuthorizationCode => AuthError::ExchangeFailed(message),
                Grant::RefreshToken => AuthError::RefreshRejected(message),
            });
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::ExchangeFailed(format!("Failed to parse token response: {}", e))
        })?;

        if token.access_token.is_empty() {
            return Err(AuthError::ExchangeFailed(
                "Token response contained an empty access_token".to_string(),
            ));
        }
        if let Some(ref token_type) = token.token_type {
            if !token_type.eq_ignore_ascii_case("bearer") {
                warn!(%token_type, "Token endpoint issued a non-bearer token type");
            }
        }

        Ok(token)
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
