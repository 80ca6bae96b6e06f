//! Keyring-based credential storage.

use super::CredentialStore;
use crate::auth::credentials::Credentials;
use crate::auth::error::AuthError;
use tracing::instrument;

/// Stores credentials in the platform's native secret store, one entry per
/// account, serialized as JSON.
///
/// Only compiled with the `system-keyring` feature.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringCredentialStore {
    const SERVICE_NAME: &str = "jmap-session";

    pub fn new() -> Self {
        Self {
            service: Self::SERVICE_NAME.to_string(),
        }
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Check if the system keyring is reachable at all.
    pub fn is_available() -> bool {
        match keyring::Entry::new(Self::SERVICE_NAME, "availability-check") {
            Ok(entry) => match entry.get_password() {
                Ok(_) | Err(keyring::Error::NoEntry) => true,
                Err(keyring::Error::NoStorageAccess(_)) | Err(keyring::Error::PlatformFailure(_)) => {
                    false
                }
                Err(_) => true,
            },
            Err(_) => false,
        }
    }

    fn entry(&self, account: &str) -> Result<keyring::Entry, AuthError> {
        keyring::Entry::new(&self.service, account)
            .map_err(|e| AuthError::Storage(format!("Failed to create keyring entry: {}", e)))
    }
}

impl CredentialStore for KeyringCredentialStore {
    #[instrument(skip(self))]
    fn get(&self, account: &str) -> Result<Option<Credentials>, AuthError> {
        match self.entry(account)?.get_password() {
            Ok(secret) => serde_json::from_str(&secret).map(Some).map_err(|e| {
                AuthError::Storage(format!("Failed to parse credentials from keyring: {}", e))
            }),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::Storage(format!("Keyring read failed: {}", e))),
        }
    }

    #[instrument(skip(self, credentials))]
    fn set(&self, account: &str, credentials: &Credentials) -> Result<(), AuthError> {
        let secret = serde_json::to_string(credentials)
            .map_err(|e| AuthError::Storage(format!("Failed to serialize credentials: {}", e)))?;
        self.entry(account)?
            .set_password(&secret)
            .map_err(|e| AuthError::Storage(format!("Keyring write failed: {}", e)))
    }

    #[instrument(skip(self))]
    fn clear(&self, account: &str) -> Result<(), AuthError> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::Storage(format!("Keyring delete failed: {}", e))),
        }
    }

    fn name(&self) -> &str {
        "keyring"
    }
}
