//! Credential storage trait.

use crate::auth::credentials::Credentials;
use crate::auth::error::AuthError;
use std::sync::Arc;

/// Key-value interface over the concrete credential medium.
///
/// All storage implementations must be thread-safe (`Send + Sync`).
/// Operations take an `account` key so that several authenticated
/// identities can share one backend.
pub trait CredentialStore: Send + Sync {
    /// Load the stored credentials for an account, if any.
    fn get(&self, account: &str) -> Result<Option<Credentials>, AuthError>;

    /// Replace the stored credentials for an account.
    fn set(&self, account: &str, credentials: &Credentials) -> Result<(), AuthError>;

    /// Remove the stored credentials for an account. Removing nothing is not an error.
    fn clear(&self, account: &str) -> Result<(), AuthError>;

    /// Get the name of this storage backend.
    fn name(&self) -> &str;
}

impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    fn get(&self, account: &str) -> Result<Option<Credentials>, AuthError> {
        (**self).get(account)
    }
    fn set(&self, account: &str, credentials: &Credentials) -> Result<(), AuthError> {
        (**self).set(account, credentials)
    }
    fn clear(&self, account: &str) -> Result<(), AuthError> {
        (**self).clear(account)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: CredentialStore + ?Sized> CredentialStore for Box<T> {
    fn get(&self, account: &str) -> Result<Option<Credentials>, AuthError> {
        (**self).get(account)
    }
    fn set(&self, account: &str, credentials: &Credentials) -> Result<(), AuthError> {
        (**self).set(account, credentials)
    }
    fn clear(&self, account: &str) -> Result<(), AuthError> {
        (**self).clear(account)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}
