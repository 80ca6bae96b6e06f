//! In-memory credential storage.

use super::CredentialStore;
use crate::auth::credentials::Credentials;
use crate::auth::error::AuthError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::instrument;

/// Process-scoped credential storage.
///
/// Cloning shares the underlying map, so a test can keep a handle and
/// observe what the session wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    inner: Arc<RwLock<HashMap<String, Credentials>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with credentials for one account.
    pub fn with_credentials(account: impl Into<String>, credentials: Credentials) -> Self {
        let mut map = HashMap::new();
        map.insert(account.into(), credentials);
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> AuthError {
    AuthError::Storage("credential map lock poisoned".to_string())
}

impl CredentialStore for MemoryCredentialStore {
    #[instrument(skip(self))]
    fn get(&self, account: &str) -> Result<Option<Credentials>, AuthError> {
        let guard = self.inner.read().map_err(poisoned)?;
        Ok(guard.get(account).cloned())
    }

    #[instrument(skip(self, credentials))]
    fn set(&self, account: &str, credentials: &Credentials) -> Result<(), AuthError> {
        let mut guard = self.inner.write().map_err(poisoned)?;
        guard.insert(account.to_string(), credentials.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    fn clear(&self, account: &str) -> Result<(), AuthError> {
        let mut guard = self.inner.write().map_err(poisoned)?;
        guard.remove(account);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
