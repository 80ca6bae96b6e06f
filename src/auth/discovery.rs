//! Authorization-server metadata discovery.

use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::auth::error::AuthError;

/// RFC 8414 metadata path.
pub const OAUTH_METADATA_PATH: &str = "/.well-known/oauth-authorization-server";

/// OpenID Connect discovery path, tried when the RFC 8414 document is absent.
pub const OPENID_METADATA_PATH: &str = "/.well-known/openid-configuration";

/// Endpoints of the authorization server. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMetadata {
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
}

impl ServerMetadata {
    /// Build metadata from explicitly configured endpoints.
    pub fn from_endpoints(authorization_endpoint: &str, token_endpoint: &str) -> Result<Self, AuthError> {
        Ok(Self {
            authorization_endpoint: parse_endpoint("authorization_endpoint", authorization_endpoint)?,
            token_endpoint: parse_endpoint("token_endpoint", token_endpoint)?,
        })
    }
}

/// Fetch and validate the issuer's metadata document.
///
/// Tries [`OAUTH_METADATA_PATH`] first and falls back to
/// [`OPENID_METADATA_PATH`] on 404.
pub async fn discover(http: &reqwest::Client, issuer: &str) -> Result<ServerMetadata, AuthError> {
    let base = issuer.trim_end_matches('/');

    for path in [OAUTH_METADATA_PATH, OPENID_METADATA_PATH] {
        let url = format!("{}{}", base, path);
        debug!(%url, "Fetching authorization server metadata");

        let response = http.get(&url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(%url, "Metadata document not found");
            continue;
        }

        if !status.is_success() {
            return Err(AuthError::Discovery(format!(
                "HTTP {} fetching {}",
                status.as_u16(),
                url
            )));
        }

        let body = response.text().await?;
        let json: Value = serde_json::from_str(&body)
            .map_err(|e| AuthError::Discovery(format!("invalid JSON from {}: {}", url, e)))?;
        return validate_server_metadata(&json, issuer);
    }

    Err(AuthError::Discovery(format!(
        "no metadata document found for issuer {}",
        issuer
    )))
}

/// Validate a metadata document against the configured issuer.
pub fn validate_server_metadata(json: &Value, issuer: &str) -> Result<ServerMetadata, AuthError> {
    let obj = json
        .as_object()
        .ok_or_else(|| AuthError::Discovery("expected object".to_string()))?;

    if let Some(advertised) = obj.get("issuer").and_then(|v| v.as_str()) {
        if advertised.trim_end_matches('/') != issuer.trim_end_matches('/') {
            return Err(AuthError::Discovery(format!(
                "issuer mismatch: expected {}, got {}",
                issuer, advertised
            )));
        }
    }

    let authorization_endpoint = get_non_empty_string(obj, "authorization_endpoint")?;
    let token_endpoint = get_non_empty_string(obj, "token_endpoint")?;

    ServerMetadata::from_endpoints(authorization_endpoint, token_endpoint)
}

fn get_non_empty_string<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, AuthError> {
    match obj.get(field).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(AuthError::Discovery(format!("missing field {}", field))),
    }
}

fn parse_endpoint(field: &'static str, value: &str) -> Result<Url, AuthError> {
    Url::parse(value).map_err(|e| AuthError::Discovery(format!("invalid {}: {}", field, e)))
}
