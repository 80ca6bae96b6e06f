#![allow(dead_code)]

use std::sync::Arc;

use jmap_session::Session;
use jmap_session::auth::{CredentialStore, Credentials, MemoryCredentialStore};
use jmap_session::config::Config;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SESSION_PATH: &str = "/.well-known/jmap";
pub const API_PATH: &str = "/jmap/api";
pub const TOKEN_PATH: &str = "/oauth/token";
pub const AUTHORIZE_PATH: &str = "/oauth/authorize";
pub const REDIRECT_URI: &str = "https://app.example.com/callback";

/// Configuration pointing every endpoint at `server`, with explicit OAuth
/// endpoints so no discovery happens.
pub fn config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.oauth.client_id = "webmail".to_string();
    config.oauth.redirect_uri = REDIRECT_URI.to_string();
    config.oauth.authorization_endpoint = Some(format!("{}{AUTHORIZE_PATH}", server.uri()));
    config.oauth.token_endpoint = Some(format!("{}{TOKEN_PATH}", server.uri()));
    config.jmap.session_url = format!("{}{SESSION_PATH}", server.uri());
    config
}

pub fn session_with(config: Config, store: Arc<dyn CredentialStore>) -> Session {
    Session::with_store(config, store).unwrap()
}

/// A session already holding `access_token` (valid for an hour).
pub fn authenticated(
    server: &MockServer,
    access_token: &str,
    refresh_token: Option<&str>,
) -> (Session, Arc<MemoryCredentialStore>) {
    let store = Arc::new(MemoryCredentialStore::with_credentials(
        "default",
        Credentials::new(
            access_token.to_string(),
            refresh_token.map(str::to_string),
            Some(3600),
        ),
    ));
    (session_with(config(server), store.clone()), store)
}

pub fn token_body(access_token: &str, refresh_token: Option<&str>) -> Value {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3600
    });
    if let Some(rt) = refresh_token {
        body["refresh_token"] = json!(rt);
    }
    body
}

pub fn session_resource() -> Value {
    json!({
        "capabilities": {
            "urn:ietf:params:jmap:core": {"maxCallsInRequest": 16},
            "urn:ietf:params:jmap:mail": {},
            "urn:ietf:params:jmap:contacts": {}
        },
        "accounts": {
            "A1": {"name": "ada@example.com", "isPersonal": true, "isReadOnly": false}
        },
        "primaryAccounts": {
            "urn:ietf:params:jmap:mail": "A1",
            "urn:ietf:params:jmap:contacts": "A1"
        },
        "username": "ada@example.com",
        "apiUrl": API_PATH,
        "state": "s1"
    })
}

/// Serve the session resource to any bearer.
pub async fn mount_session(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(SESSION_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_resource()))
        .mount(server)
        .await;
}

/// A JMAP response envelope.
pub fn jmap_response(method_responses: Value) -> Value {
    json!({"methodResponses": method_responses, "sessionState": "s1"})
}
