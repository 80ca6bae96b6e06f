//! HTTP client construction.

use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder};

use crate::config::HttpConfig;

/// Default user agent.
pub const USER_AGENT: &str = concat!("jmap-session/", env!("CARGO_PKG_VERSION"));

/// Default connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum redirects followed by the JMAP and discovery client.
const MAX_REDIRECTS: usize = 5;

/// HTTP client wrapper with the standard configuration (User-Agent, timeouts).
///
/// Cloning is cheap; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Build a client from the `[http]` configuration section.
    pub fn from_config(config: &HttpConfig) -> Self {
        Self::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .request_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
    }

    /// Same configuration, but never follows redirects.
    ///
    /// Token-endpoint calls carry secrets in the body and must not be
    /// replayed against another origin.
    pub fn without_redirects(config: &HttpConfig) -> Self {
        Self::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .request_timeout(Duration::from_secs(config.request_timeout_secs))
            .follow_redirects(false)
            .build()
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    builder: ClientBuilder,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            builder: Client::builder()
                .user_agent(USER_AGENT)
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT)
                .redirect(Policy::limited(MAX_REDIRECTS)),
        }
    }
}

impl HttpClientBuilder {
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.builder = self.builder.user_agent(ua);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.connect_timeout(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.timeout(timeout);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        let policy = if follow {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };
        self.builder = self.builder.redirect(policy);
        self
    }

    /// Build the client, falling back to reqwest defaults if the TLS backend
    /// rejects the configuration.
    pub fn build(self) -> HttpClient {
        let inner = match self.builder.build() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to build HTTP client with custom config: {}; using defaults", e);
                Client::default()
            }
        };
        HttpClient { inner }
    }
}
