//! Authenticated JMAP session layer.
//!
//! A [`Session`] owns everything one identity needs to talk to a JMAP server:
//! the OAuth2 (PKCE) credential lifecycle in [`auth::SessionManager`], the
//! batch-oriented [`jmap::ProtocolClient`], and the
//! [`invoker::AuthenticatedInvoker`] that recovers from an expired token with
//! exactly one refresh and one retry. Sessions are constructed explicitly;
//! there is no global state, so several sessions may coexist.

pub mod auth;
pub mod config;
pub mod error;
pub mod invoker;
pub mod jmap;
pub mod net;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use crate::auth::flow::AuthorizationFlow;
use crate::auth::session::SessionManager;
use crate::auth::store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
use crate::config::{Config, StorageBackend};
use crate::error::{Error, Result};
use crate::invoker::AuthenticatedInvoker;
use crate::jmap::ProtocolClient;
use crate::net::HttpClient;

/// One authenticated identity against one JMAP server.
#[derive(Debug)]
pub struct Session {
    config: Config,
    auth: Arc<SessionManager>,
    client: Arc<ProtocolClient>,
    invoker: AuthenticatedInvoker,
}

impl Session {
    /// Build a session using the credential store named in `config.storage`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let store = build_store(&config)?;
        Self::with_store(config, store)
    }

    /// Build a session around an explicit credential store.
    pub fn with_store(config: Config, store: Arc<dyn CredentialStore>) -> Result<Self> {
        config.validate()?;

        // Token requests never follow redirects; discovery and JMAP requests may.
        let token_http = HttpClient::without_redirects(&config.http);
        let api_http = HttpClient::from_config(&config.http);

        let flow = AuthorizationFlow::new(token_http.inner().clone(), config.oauth.clone());
        let auth = Arc::new(
            SessionManager::new(flow, store, config.session.account.clone())?
                .with_discovery_client(api_http.inner().clone()),
        );

        let session_url = Url::parse(&config.jmap.session_url)
            .map_err(|e| Error::Config(format!("jmap.session_url is not a URL: {e}")))?;
        let client = Arc::new(ProtocolClient::new(
            api_http.inner().clone(),
            session_url,
            auth.clone(),
        ));

        let invoker = AuthenticatedInvoker::new(auth.clone(), client.clone())
            .with_proactive_refresh(config.session.proactive_refresh);

        info!(
            account = %config.session.account,
            backend = %config.storage.backend,
            session_url = %config.jmap.session_url,
            "Session created"
        );

        Ok(Self {
            config,
            auth,
            client,
            invoker,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Authentication state machine.
    pub fn auth(&self) -> &Arc<SessionManager> {
        &self.auth
    }

    /// JMAP client. Prefer [`Session::invoke`] for calls that should survive
    /// token expiry.
    pub fn client(&self) -> &Arc<ProtocolClient> {
        &self.client
    }

    pub fn invoker(&self) -> &AuthenticatedInvoker {
        &self.invoker
    }

    /// Run `op` through the invoker.
    pub async fn invoke<T, F, Fut>(&self, cancel: &CancellationToken, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.invoker.invoke(cancel, op).await
    }

    /// Drop cached protocol state and any pending authorization.
    ///
    /// Stored credentials are kept; use [`SessionManager::logout`] to clear them.
    pub async fn close(&self) {
        self.client.reset().await;
        self.auth.abandon_login().await;
        info!(account = %self.config.session.account, "Session closed");
    }
}

fn build_store(config: &Config) -> Result<Arc<dyn CredentialStore>> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryCredentialStore::new())),
        StorageBackend::File => Ok(Arc::new(FileCredentialStore::new(&config.storage.dir))),
        #[cfg(feature = "system-keyring")]
        StorageBackend::Keyring => Ok(Arc::new(auth::store::KeyringCredentialStore::new())),
        #[cfg(not(feature = "system-keyring"))]
        StorageBackend::Keyring => Err(Error::Config(
            "storage.backend = \"keyring\" requires the system-keyring feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::Credentials;
    use crate::auth::session::SessionState;

    fn config() -> Config {
        let mut config = Config::default();
        config.oauth.client_id = "webmail".to_string();
        config.oauth.redirect_uri = "https://app.example.com/callback".to_string();
        config.oauth.authorization_endpoint = Some("http://127.0.0.1:9/authorize".to_string());
        config.oauth.token_endpoint = Some("http://127.0.0.1:9/token".to_string());
        config.jmap.session_url = "http://127.0.0.1:9/.well-known/jmap".to_string();
        config
    }

    #[test]
    fn test_new_rejects_incomplete_config() {
        let err = Session::new(Config::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let first = Session::with_store(
            config(),
            Arc::new(MemoryCredentialStore::with_credentials(
                "default",
                Credentials::new("at".into(), None, Some(3600)),
            )),
        )
        .unwrap();
        let second = Session::new(config()).unwrap();

        assert!(first.auth().is_authenticated().await);
        assert!(!second.auth().is_authenticated().await);
    }

    #[tokio::test]
    async fn test_close_keeps_credentials_and_drops_pending_login() {
        let session = Session::with_store(
            config(),
            Arc::new(MemoryCredentialStore::with_credentials(
                "default",
                Credentials::new("at".into(), Some("rt".into()), Some(3600)),
            )),
        )
        .unwrap();
        session.auth().login().await.unwrap();
        assert_eq!(session.auth().state().await, SessionState::Authenticating);

        session.close().await;
        assert_eq!(session.auth().state().await, SessionState::Authenticated);
        assert!(session.auth().is_authenticated().await);
    }

    #[cfg(not(feature = "system-keyring"))]
    #[test]
    fn test_keyring_backend_needs_feature() {
        let mut config = config();
        config.storage.backend = StorageBackend::Keyring;
        let err = Session::new(config).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("system-keyring")));
    }

    #[test]
    fn test_file_backend_builds() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.storage.backend = StorageBackend::File;
        config.storage.dir = dir.path().to_path_buf();
        let session = Session::new(config).unwrap();
        assert_eq!(session.config().storage.backend, StorageBackend::File);
    }
}
