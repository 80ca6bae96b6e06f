//! Authorization callback parsing.
//!
//! The identity provider redirects back to `redirect_uri` with either
//! `?code=...&state=...` or `?error=...&error_description=...&state=...`.

use tracing::warn;
use url::Url;

use crate::auth::error::AuthError;
use crate::auth::pkce::constant_time_eq;

/// Query parameters from the authorization callback.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse the query string of a callback URL.
    pub fn parse(callback_url: &str) -> Result<Self, AuthError> {
        let url = Url::parse(callback_url)
            .map_err(|e| AuthError::InvalidCallback(format!("not a valid URL: {}", e)))?;

        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            // First occurrence wins; duplicates are ignored.
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        Ok(params)
    }
}

/// Validate callback parameters against the expected `state` and extract the
/// authorization code.
///
/// Checked in order: provider `error`, `state` match, presence of `code`. A
/// provider error is reported even when `state` is missing, since some
/// providers drop it on denial.
pub fn validate_callback(params: &CallbackParams, expected_state: &str) -> Result<String, AuthError> {
    if let Some(ref error) = params.error {
        warn!(
            error = %error,
            description = ?params.error_description,
            "Authorization error from provider"
        );
        return Err(AuthError::Denied {
            error: error.clone(),
            description: params.error_description.clone(),
        });
    }

    match params.state.as_deref() {
        Some(state) if constant_time_eq(state, expected_state) => {}
        _ => {
            warn!("Callback state does not match pending authorization");
            return Err(AuthError::InvalidState);
        }
    }

    params
        .code
        .as_ref()
        .filter(|c| !c.is_empty())
        .cloned()
        .ok_or_else(|| {
            AuthError::InvalidCallback("missing authorization code in callback".to_string())
        })
}
