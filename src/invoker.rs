//! Refresh-and-retry around protocol calls.
//!
//! [`AuthenticatedInvoker::invoke`] runs an operation and, if it fails with an
//! authorization error, refreshes the token once and replays the operation
//! once. For one logical operation there is never more than one refresh and
//! never more than two runs of the operation, however many HTTP requests the
//! operation itself makes.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::session::{RefreshOutcome, SessionManager};
use crate::error::{Error, Result};
use crate::jmap::ProtocolClient;

#[derive(Debug, Clone)]
pub struct AuthenticatedInvoker {
    session: Arc<SessionManager>,
    client: Arc<ProtocolClient>,
    proactive_refresh: bool,
}

impl AuthenticatedInvoker {
    pub fn new(session: Arc<SessionManager>, client: Arc<ProtocolClient>) -> Self {
        Self {
            session,
            client,
            proactive_refresh: false,
        }
    }

    /// Spend the refresh before the first attempt when the token is already
    /// past its expiry.
    pub fn with_proactive_refresh(mut self, enabled: bool) -> Self {
        self.proactive_refresh = enabled;
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn client(&self) -> &Arc<ProtocolClient> {
        &self.client
    }

    /// Run `op`, recovering once from an authorization failure.
    ///
    /// `op` is called at most twice. Cancelling `cancel` aborts whichever
    /// step is in flight and returns [`Error::Cancelled`]; a cancelled
    /// operation is never retried.
    pub async fn invoke<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !self.session.is_authenticated().await {
            debug!("Not authenticated; skipping operation");
            return Err(Error::SessionExpired);
        }

        let mut refreshed = false;
        if self.proactive_refresh
            && self.session.is_expired().await
            && self.session.has_refresh_token().await
        {
            debug!("Access token expired; refreshing before the first attempt");
            let observed = self.session.generation().await;
            match until_cancelled(cancel, self.session.refresh_if_current(observed)).await? {
                RefreshOutcome::Refreshed => refreshed = true,
                outcome => return self.expire(outcome).await,
            }
        }

        let observed = self.session.generation().await;
        let err = match until_cancelled(cancel, op()).await? {
            Ok(value) => return Ok(value),
            Err(e) if e.is_authorization_failure() => e,
            Err(e) => return Err(e),
        };

        if refreshed {
            // The single refresh was already spent up front.
            warn!(error = %err, "Authorization failed after a proactive refresh");
            return Err(err);
        }

        debug!(error = %err, "Authorization failure; refreshing once");
        match until_cancelled(cancel, self.session.refresh_if_current(observed)).await? {
            RefreshOutcome::Refreshed => {}
            outcome => return self.expire(outcome).await,
        }

        if cancel.is_cancelled() {
            debug!("Cancelled before retry");
            return Err(Error::Cancelled);
        }
        until_cancelled(cancel, op()).await?
    }

    /// Terminal path: force logout, drop protocol state, report expiry.
    async fn expire<T>(&self, outcome: RefreshOutcome) -> Result<T> {
        match outcome {
            RefreshOutcome::Failed(e) => warn!(error = %e, "Refresh failed; session expired"),
            RefreshOutcome::NotAttempted => info!("No refresh possible; session expired"),
            RefreshOutcome::Refreshed => {}
        }
        if let Err(e) = self.session.logout().await {
            warn!(error = %e, "Failed to clear stored credentials on expiry");
        }
        self.client.reset().await;
        Err(Error::SessionExpired)
    }
}

async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::auth::credentials::Credentials;
    use crate::auth::flow::AuthorizationFlow;
    use crate::auth::session::SessionState;
    use crate::auth::store::{CredentialStore, MemoryCredentialStore};
    use crate::config::OAuthConfig;
    use url::Url;

    fn invoker(store: Arc<MemoryCredentialStore>) -> AuthenticatedInvoker {
        let config = OAuthConfig {
            client_id: "webmail".to_string(),
            redirect_uri: "https://app.example.com/callback".to_string(),
            authorization_endpoint: Some("http://127.0.0.1:9/authorize".to_string()),
            token_endpoint: Some("http://127.0.0.1:9/token".to_string()),
            ..Default::default()
        };
        let flow = AuthorizationFlow::new(reqwest::Client::new(), config);
        let session = Arc::new(SessionManager::new(flow, store, "default").unwrap());
        let client = Arc::new(ProtocolClient::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:9/session").unwrap(),
            session.clone(),
        ));
        AuthenticatedInvoker::new(session, client)
    }

    fn store_with(refresh_token: Option<&str>) -> Arc<MemoryCredentialStore> {
        Arc::new(MemoryCredentialStore::with_credentials(
            "default",
            Credentials::new("at".into(), refresh_token.map(str::to_string), Some(3600)),
        ))
    }

    #[tokio::test]
    async fn test_success_runs_once() {
        let invoker = invoker(store_with(Some("rt")));
        let calls = &AtomicUsize::new(0);
        let value = invoker
            .invoke(&CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unauthenticated_short_circuits() {
        let invoker = invoker(Arc::new(MemoryCredentialStore::new()));
        let calls = &AtomicUsize::new(0);
        let err = invoker
            .invoke(&CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionExpired));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_auth_errors_propagate_without_refresh() {
        let invoker = invoker(store_with(Some("rt")));
        let calls = &AtomicUsize::new(0);
        let err = invoker
            .invoke(&CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Protocol {
                    error_type: "invalidArguments".into(),
                    description: None,
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(invoker.session().is_authenticated().await);
    }

    #[tokio::test]
    async fn test_401_without_refresh_token_expires_session() {
        let store = store_with(None);
        let invoker = invoker(store.clone());
        let calls = &AtomicUsize::new(0);
        let err = invoker
            .invoke(&CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::transport(Some(401), "unauthorized"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionExpired));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!invoker.session().is_authenticated().await);
        assert_eq!(invoker.session().state().await, SessionState::LoggedOut);
        assert!(store.get("default").unwrap().is_none());

        // Later calls short-circuit.
        let err = invoker
            .invoke(&CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionExpired));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let invoker = invoker(store_with(Some("rt")));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = invoker
            .invoke(&cancel, || async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_attempt() {
        let invoker = invoker(store_with(Some("rt")));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let calls = AtomicUsize::new(0);
        let err = invoker
            .invoke(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                let trigger = trigger.clone();
                async move {
                    trigger.cancel();
                    std::future::pending::<Result<()>>().await
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(invoker.session().is_authenticated().await);
    }
}
