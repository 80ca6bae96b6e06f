//! Session manager: the authentication state machine.
//!
//! ```text
//! Unauthenticated ──login()──▶ Authenticating ──complete_login()──▶ Authenticated
//!        ▲                          │ failure                         │   ▲
//!        └──────────────────────────┘                       refresh() │   │ success
//!        ▲                                                            ▼   │
//!        └──────────────────── failure ─────────────────────────── Refreshing
//!
//! any state ──logout()──▶ LoggedOut ──login()──▶ Authenticating
//! ```
//!
//! Every credential write, refresh failure and logout bumps a generation
//! counter. Callers that observed an authorization failure pass the generation
//! they observed to [`SessionManager::refresh_if_current`]; when it has moved,
//! someone else already refreshed (or logged out) and no second network
//! refresh is issued.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::credentials::{Credentials, PendingAuthorization};
use crate::auth::discovery::{ServerMetadata, discover};
use crate::auth::error::AuthError;
use crate::auth::flow::AuthorizationFlow;
use crate::auth::store::CredentialStore;
use crate::error::Error;
use crate::jmap::client::TokenSource;

/// Authentication state of a [`SessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
    LoggedOut,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "unauthenticated"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Refreshing => write!(f, "refreshing"),
            Self::LoggedOut => write!(f, "logged_out"),
        }
    }
}

/// Result of a refresh request, switched on by the invoker.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// Fresh credentials are in place (by this call or a concurrent one).
    Refreshed,
    /// The refresh was attempted and failed; credentials have been cleared.
    Failed(AuthError),
    /// No refresh was possible: no credentials or no refresh token.
    NotAttempted,
}

/// An authorization request ready for the user agent.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    credentials: Option<Credentials>,
    pending: Option<PendingAuthorization>,
    /// Bumped on every credential write, refresh failure and logout.
    generation: u64,
    /// Bumped on logout only.
    epoch: u64,
}

/// Owns the credential lifecycle for one identity.
pub struct SessionManager {
    flow: AuthorizationFlow,
    store: Arc<dyn CredentialStore>,
    account: String,
    metadata: OnceCell<ServerMetadata>,
    /// Client for metadata discovery; follows redirects, unlike token calls.
    discovery_http: reqwest::Client,
    inner: RwLock<SessionInner>,
    /// Serializes network refreshes.
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("account", &self.account)
            .field("store", &self.store.name())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager, loading any stored credentials for `account`.
    ///
    /// Stored credentials put the machine directly into `Authenticated`.
    /// Explicitly configured endpoints bypass discovery.
    pub fn new(
        flow: AuthorizationFlow,
        store: Arc<dyn CredentialStore>,
        account: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let account = account.into();
        let credentials = store.get(&account)?;

        let metadata = match flow.config().explicit_endpoints() {
            Some((authorization, token)) => {
                OnceCell::new_with(Some(ServerMetadata::from_endpoints(authorization, token)?))
            }
            None => OnceCell::new(),
        };

        let state = if credentials.is_some() {
            info!(%account, store = store.name(), "Loaded stored credentials");
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };

        Ok(Self {
            discovery_http: flow.http().clone(),
            flow,
            store,
            account,
            metadata,
            inner: RwLock::new(SessionInner {
                state,
                credentials,
                pending: None,
                generation: 0,
                epoch: 0,
            }),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Use `http` for metadata discovery instead of the token client.
    #[must_use]
    pub fn with_discovery_client(mut self, http: reqwest::Client) -> Self {
        self.discovery_http = http;
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Server metadata, discovered on first use and cached for the manager's
    /// lifetime. Concurrent first callers share one fetch.
    pub async fn metadata(&self) -> Result<&ServerMetadata, AuthError> {
        self.metadata
            .get_or_try_init(|| async {
                let issuer = self
                    .flow
                    .config()
                    .issuer
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        AuthError::Discovery("no issuer or explicit endpoints configured".to_string())
                    })?;
                let metadata = discover(&self.discovery_http, issuer).await?;
                info!(
                    authorization_endpoint = %metadata.authorization_endpoint,
                    token_endpoint = %metadata.token_endpoint,
                    "Discovered authorization server"
                );
                Ok(metadata)
            })
            .await
    }

    /// Start a login. A pending authorization from an earlier call is
    /// discarded; the newest login wins.
    pub async fn login(&self) -> Result<AuthorizationRequest, AuthError> {
        let metadata = self.metadata().await?;
        let config = self.flow.config();
        let (url, pending) = self
            .flow
            .begin_authorization(metadata, &config.scopes, &config.redirect_uri)?;
        let state = pending.state.clone();

        let mut inner = self.inner.write().await;
        if inner.pending.replace(pending).is_some() {
            debug!("Superseding earlier pending authorization");
        }
        inner.state = SessionState::Authenticating;
        info!(account = %self.account, "Login started");

        Ok(AuthorizationRequest { url, state })
    }

    /// Finish a login from the provider's callback URL.
    ///
    /// The pending authorization is consumed whatever the outcome. Nothing is
    /// stored unless the state matches and the exchange succeeds.
    pub async fn complete_login(&self, callback_url: &str) -> Result<(), AuthError> {
        let (pending, epoch) = {
            let mut inner = self.inner.write().await;
            let pending = inner.pending.take().ok_or(AuthError::NoPendingAuthorization)?;
            (pending, inner.epoch)
        };

        let result = match self.metadata().await {
            Ok(metadata) => self.flow.exchange_code(metadata, callback_url, &pending).await,
            Err(e) => Err(e),
        };

        let mut inner = self.inner.write().await;
        if inner.epoch != epoch {
            warn!("Logout happened during code exchange; discarding result");
            return Err(AuthError::Superseded);
        }

        let credentials = match result {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(error = %e, "Login failed");
                inner.state = fallback_state(&inner);
                return Err(e);
            }
        };

        if let Err(e) = self.store.set(&self.account, &credentials) {
            warn!(error = %e, "Failed to persist credentials");
            inner.state = fallback_state(&inner);
            return Err(e);
        }

        inner.credentials = Some(credentials);
        inner.state = SessionState::Authenticated;
        inner.generation += 1;
        info!(account = %self.account, "Login complete");
        Ok(())
    }

    /// Drop a pending authorization without completing it.
    pub async fn abandon_login(&self) {
        let mut inner = self.inner.write().await;
        if inner.pending.take().is_some() {
            inner.state = fallback_state(&inner);
            debug!("Pending authorization abandoned");
        }
    }

    /// Refresh the access token unconditionally.
    pub async fn refresh(self: &Arc<Self>) -> RefreshOutcome {
        let observed = self.generation().await;
        self.refresh_if_current(observed).await
    }

    /// Refresh unless the credentials changed since generation `observed`.
    ///
    /// Single-flight: concurrent callers that observed the same generation
    /// share one network refresh. The refresh itself runs on a spawned task,
    /// so dropping this future never leaves the state at `Refreshing`.
    pub async fn refresh_if_current(self: &Arc<Self>, observed: u64) -> RefreshOutcome {
        let this = Arc::clone(self);
        match tokio::spawn(async move { this.refresh_serialized(observed).await }).await {
            Ok(outcome) => outcome,
            Err(e) => RefreshOutcome::Failed(AuthError::RefreshRejected(format!(
                "refresh task aborted: {e}"
            ))),
        }
    }

    async fn refresh_serialized(&self, observed: u64) -> RefreshOutcome {
        let _guard = self.refresh_lock.lock().await;

        let refresh_token = {
            let mut inner = self.inner.write().await;
            if inner.generation != observed {
                debug!(observed, current = inner.generation, "Credentials already replaced");
                return settled_outcome(&inner);
            }
            let Some(token) = inner
                .credentials
                .as_ref()
                .and_then(|c| c.usable_refresh_token())
                .map(str::to_string)
            else {
                debug!("No refresh token available");
                return RefreshOutcome::NotAttempted;
            };
            inner.state = SessionState::Refreshing;
            token
        };

        let result = match self.metadata().await {
            Ok(metadata) => self.flow.exchange_refresh_token(metadata, &refresh_token).await,
            Err(e) => Err(e),
        };

        let mut inner = self.inner.write().await;
        if inner.generation != observed {
            // Logout (or a new login) won while the request was in flight.
            debug!("Discarding refresh result; credentials changed while refreshing");
            return settled_outcome(&inner);
        }

        match result {
            Ok(credentials) => {
                if let Err(e) = self.store.set(&self.account, &credentials) {
                    warn!(error = %e, "Failed to persist refreshed credentials");
                }
                inner.credentials = Some(credentials);
                inner.state = SessionState::Authenticated;
                inner.generation += 1;
                info!(account = %self.account, "Access token refreshed");
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                inner.credentials = None;
                inner.state = SessionState::Unauthenticated;
                inner.generation += 1;
                if let Err(store_err) = self.store.clear(&self.account) {
                    warn!(error = %store_err, "Failed to clear stored credentials");
                }
                RefreshOutcome::Failed(e)
            }
        }
    }

    /// Clear credentials and any pending authorization. Idempotent.
    ///
    /// In-memory state is always cleared; a storage failure is reported after.
    pub async fn logout(&self) -> Result<(), AuthError> {
        {
            let mut inner = self.inner.write().await;
            let was = inner.state;
            inner.credentials = None;
            inner.pending = None;
            inner.state = SessionState::LoggedOut;
            inner.generation += 1;
            inner.epoch += 1;
            if was != SessionState::LoggedOut {
                info!(account = %self.account, "Logged out");
            }
        }
        self.store.clear(&self.account)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.read().await.credentials.is_some()
    }

    /// `now >= expires_at`, or true when there is no credential or no expiry.
    pub async fn is_expired(&self) -> bool {
        self.inner
            .read()
            .await
            .credentials
            .as_ref()
            .is_none_or(Credentials::is_expired)
    }

    pub async fn state(&self) -> SessionState {
        self.inner.read().await.state
    }

    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }

    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .await
            .credentials
            .as_ref()
            .and_then(|c| c.expires_at)
    }

    pub async fn has_refresh_token(&self) -> bool {
        self.inner
            .read()
            .await
            .credentials
            .as_ref()
            .is_some_and(|c| c.usable_refresh_token().is_some())
    }

    /// Current bearer token. Never refreshes.
    pub async fn access_token(&self) -> Result<String, Error> {
        self.inner
            .read()
            .await
            .credentials
            .as_ref()
            .map(|c| c.access_token.clone())
            .ok_or(Error::NotAuthenticated)
    }
}

#[async_trait::async_trait]
impl TokenSource for SessionManager {
    async fn access_token(&self) -> Result<String, Error> {
        SessionManager::access_token(self).await
    }
}

fn fallback_state(inner: &SessionInner) -> SessionState {
    if inner.credentials.is_some() {
        SessionState::Authenticated
    } else {
        SessionState::Unauthenticated
    }
}

fn settled_outcome(inner: &SessionInner) -> RefreshOutcome {
    if inner.credentials.is_some() {
        RefreshOutcome::Refreshed
    } else {
        RefreshOutcome::NotAttempted
    }
}
