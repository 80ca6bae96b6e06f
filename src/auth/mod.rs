//! OAuth 2.0 authentication for the JMAP session.
//!
//! # Architecture
//!
//! - [`SessionManager`] - State machine owning credentials, login and refresh
//! - [`AuthorizationFlow`] - PKCE authorization request and token-endpoint exchanges
//! - [`CredentialStore`] - Pluggable credential persistence (memory, file, keyring)
//! - [`Credentials`] - Token data with expiry checking
//! - [`Pkce`] - PKCE S256 challenge/verifier generation
//! - [`discovery`] - Authorization-server metadata discovery

pub mod callback;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod session;
pub mod store;

pub use credentials::{Credentials, PendingAuthorization};
pub use discovery::ServerMetadata;
pub use error::AuthError;
pub use flow::AuthorizationFlow;
pub use pkce::Pkce;
pub use session::{AuthorizationRequest, RefreshOutcome, SessionManager, SessionState};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};

#[cfg(feature = "system-keyring")]
pub use store::KeyringCredentialStore;
