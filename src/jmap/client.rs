//! HTTP transport for JMAP batches.
//!
//! The client reads a bearer token from its [`TokenSource`] on every request
//! and never refreshes it; recovery from a rejected token is the invoker's
//! job. Nothing here retries.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use super::method::Method;
use super::request::Batch;
use super::response::{BatchResponse, ProblemDetails, Response};
use super::session::JmapSession;
use crate::error::{Error, Result};

/// Maximum body length carried in a transport error.
const MAX_ERROR_BODY: usize = 512;

/// Source of the current bearer token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current access token, or [`Error::NotAuthenticated`].
    async fn access_token(&self) -> Result<String>;
}

/// Issues JMAP requests against one session endpoint.
pub struct ProtocolClient {
    http: reqwest::Client,
    session_url: Url,
    tokens: Arc<dyn TokenSource>,
    session: RwLock<Option<Arc<JmapSession>>>,
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("session_url", &self.session_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ProtocolClient {
    pub fn new(http: reqwest::Client, session_url: Url, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http,
            session_url,
            tokens,
            session: RwLock::new(None),
        }
    }

    pub fn session_url(&self) -> &Url {
        &self.session_url
    }

    /// The JMAP session resource, fetched on first use and cached until
    /// [`reset`](Self::reset).
    pub async fn session(&self) -> Result<Arc<JmapSession>> {
        if let Some(ref session) = *self.session.read().await {
            return Ok(Arc::clone(session));
        }

        let mut cached = self.session.write().await;
        // Another caller may have fetched it while we waited for the lock.
        if let Some(ref session) = *cached {
            return Ok(Arc::clone(session));
        }

        let session = Arc::new(self.fetch_session().await?);
        info!(
            username = %session.username,
            accounts = session.accounts.len(),
            state = %session.state,
            "JMAP session established"
        );
        *cached = Some(Arc::clone(&session));
        Ok(session)
    }

    async fn fetch_session(&self) -> Result<JmapSession> {
        let token = self.tokens.access_token().await?;
        debug!(url = %self.session_url, "Fetching JMAP session resource");

        let response = self
            .http
            .get(self.session_url.clone())
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let body = check_status(response).await?;
        serde_json::from_str(&body)
            .map_err(|e| Error::malformed(format!("invalid session resource: {e}")))
    }

    /// Drop the cached session resource.
    pub async fn reset(&self) {
        if self.session.write().await.take().is_some() {
            debug!("JMAP session cache cleared");
        }
    }

    /// Primary account id for `capability`.
    pub async fn primary_account_id(&self, capability: &str) -> Result<String> {
        let session = self.session().await?;
        session
            .primary_account_id(capability)
            .map(str::to_string)
            .ok_or_else(|| Error::Protocol {
                error_type: "accountNotFound".to_string(),
                description: Some(format!("no primary account for {capability}")),
            })
    }

    /// Send every call in `batch` as one POST.
    pub async fn send(&self, batch: Batch) -> Result<BatchResponse> {
        let (request, declared) = batch.into_parts()?;
        let session = self.session().await?;
        let api_url = session.api_url(&self.session_url)?;
        let token = self.tokens.access_token().await?;

        debug!(
            url = %api_url,
            calls = request.method_calls.len(),
            using = ?request.using,
            "Sending JMAP request"
        );

        let response = self
            .http
            .post(api_url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request)
            .send()
            .await?;

        let body = check_status(response).await?;
        let response: Response = serde_json::from_str(&body)
            .map_err(|e| Error::malformed(format!("invalid JMAP response: {e}")))?;

        if let Some(ref state) = response.session_state {
            if *state != session.state {
                debug!(old = %session.state, new = %state, "Session state changed; refetching on next call");
                let mut cached = self.session.write().await;
                if cached.as_ref().is_some_and(|s| Arc::ptr_eq(s, &session)) {
                    *cached = None;
                }
            }
        }

        BatchResponse::correlate(&declared, response)
    }

    /// Build a batch with `build` and send it.
    pub async fn call_batch<F>(&self, build: F) -> Result<BatchResponse>
    where
        F: FnOnce(&mut Batch) -> Result<()>,
    {
        let mut batch = Batch::new();
        build(&mut batch)?;
        self.send(batch).await
    }

    /// Single typed call.
    pub async fn call<M: Method>(&self, method: M) -> Result<M::Response> {
        let mut batch = Batch::new();
        let handle = batch.call("call", method)?;
        self.send(batch).await?.get(&handle)
    }

    /// Single untyped call.
    pub async fn call_raw(&self, method_name: &str, arguments: Value) -> Result<Value> {
        let mut batch = Batch::new();
        batch.call_raw("call", method_name, arguments)?;
        let mut results = self.send(batch).await?.into_results();
        results
            .remove("call")
            .unwrap_or_else(|| Err(Error::malformed("no result for call")))
    }
}

/// Map a non-2xx response to a transport or protocol error; return the body
/// otherwise.
async fn check_status(response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return Ok(body);
    }
    if status == StatusCode::UNAUTHORIZED {
        warn!("JMAP server rejected the bearer token");
        return Err(Error::transport(Some(401), "unauthorized"));
    }
    if let Some(problem) = ProblemDetails::parse(body.as_bytes()) {
        warn!(status = status.as_u16(), problem_type = %problem.problem_type, "JMAP request rejected");
        return Err(problem.into());
    }

    warn!(status = status.as_u16(), "JMAP request failed");
    let cut = body.char_indices().nth(MAX_ERROR_BODY).map(|(idx, _)| idx);
    let message = match cut {
        Some(idx) => format!("{}...", &body[..idx]),
        None => body,
    };
    Err(Error::transport(Some(status.as_u16()), message))
}
