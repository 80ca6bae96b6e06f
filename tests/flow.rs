mod common;

use jmap_session::auth::{AuthError, AuthorizationFlow, ServerMetadata};
use jmap_session::config::OAuthConfig;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{AUTHORIZE_PATH, REDIRECT_URI, TOKEN_PATH, token_body};

fn flow(config: OAuthConfig) -> AuthorizationFlow {
    AuthorizationFlow::new(reqwest::Client::new(), config)
}

fn oauth_config() -> OAuthConfig {
    OAuthConfig {
        client_id: "webmail".to_string(),
        redirect_uri: REDIRECT_URI.to_string(),
        ..Default::default()
    }
}

fn metadata(server: &MockServer) -> ServerMetadata {
    ServerMetadata::from_endpoints(
        &format!("{}{AUTHORIZE_PATH}", server.uri()),
        &format!("{}{TOKEN_PATH}", server.uri()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_code_exchange_sends_verifier_and_returns_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(header("accept", "application/json"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=abc123"))
        .and(body_string_contains("code_verifier="))
        .and(body_string_contains("client_id=webmail"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at1", Some("rt1"))))
        .expect(1)
        .mount(&server)
        .await;

    let flow = flow(oauth_config());
    let metadata = metadata(&server);
    let scopes = vec!["openid".to_string()];
    let (_, pending) = flow.begin_authorization(&metadata, &scopes, REDIRECT_URI).unwrap();
    let callback = format!("{REDIRECT_URI}?code=abc123&state={}", pending.state);

    let credentials = flow.exchange_code(&metadata, &callback, &pending).await.unwrap();
    assert_eq!(credentials.access_token, "at1");
    assert_eq!(credentials.refresh_token.as_deref(), Some("rt1"));
    assert!(!credentials.is_expired());
}

#[tokio::test]
async fn test_confidential_client_sends_secret() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("client_secret=s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at1", None)))
        .expect(1)
        .mount(&server)
        .await;

    let flow = flow(OAuthConfig {
        client_secret: Some("s3cret".to_string()),
        ..oauth_config()
    });
    let credentials = flow.exchange_refresh_token(&metadata(&server), "rt0").await.unwrap();
    assert_eq!(credentials.access_token, "at1");
}

#[tokio::test]
async fn test_refresh_keeps_old_refresh_token_when_omitted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at2", None)))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = flow(oauth_config())
        .exchange_refresh_token(&metadata(&server), "rt-old")
        .await
        .unwrap();
    assert_eq!(credentials.access_token, "at2");
    assert_eq!(credentials.refresh_token.as_deref(), Some("rt-old"));
}

#[tokio::test]
async fn test_refresh_rotates_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at2", Some("rt-new"))))
        .mount(&server)
        .await;

    let credentials = flow(oauth_config())
        .exchange_refresh_token(&metadata(&server), "rt-old")
        .await
        .unwrap();
    assert_eq!(credentials.refresh_token.as_deref(), Some("rt-new"));
}

#[tokio::test]
async fn test_unrepresentable_expires_in_yields_expired_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at",
            "token_type": "Bearer",
            "expires_in": i64::MAX
        })))
        .expect(2)
        .mount(&server)
        .await;

    let flow = flow(oauth_config());
    let metadata = metadata(&server);
    let (_, pending) = flow.begin_authorization(&metadata, &[], REDIRECT_URI).unwrap();
    let callback = format!("{REDIRECT_URI}?code=abc123&state={}", pending.state);

    let credentials = flow.exchange_code(&metadata, &callback, &pending).await.unwrap();
    assert_eq!(credentials.access_token, "at");
    assert!(credentials.expires_at.is_none());
    assert!(credentials.is_expired());

    let refreshed = flow.exchange_refresh_token(&metadata, "rt").await.unwrap();
    assert!(refreshed.expires_at.is_none());
    assert_eq!(refreshed.refresh_token.as_deref(), Some("rt"));
}

#[tokio::test]
async fn test_invalid_grant_is_refresh_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = flow(oauth_config())
        .exchange_refresh_token(&metadata(&server), "rt-old")
        .await
        .unwrap_err();
    match err {
        AuthError::RefreshRejected(message) => assert!(message.contains("refresh token revoked")),
        other => panic!("expected RefreshRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_refresh_server_error_is_refresh_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let err = flow(oauth_config())
        .exchange_refresh_token(&metadata(&server), "rt-old")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::RefreshRejected(ref m) if m.contains("HTTP 500")));
}

#[tokio::test]
async fn test_rejected_code_is_exchange_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .expect(1)
        .mount(&server)
        .await;

    let flow = flow(oauth_config());
    let metadata = metadata(&server);
    let (_, pending) = flow.begin_authorization(&metadata, &[], REDIRECT_URI).unwrap();
    let callback = format!("{REDIRECT_URI}?code=used&state={}", pending.state);

    let err = flow.exchange_code(&metadata, &callback, &pending).await.unwrap_err();
    assert!(matches!(err, AuthError::ExchangeFailed(_)));
}

#[tokio::test]
async fn test_empty_access_token_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": ""})))
        .mount(&server)
        .await;

    let flow = flow(oauth_config());
    let metadata = metadata(&server);
    let (_, pending) = flow.begin_authorization(&metadata, &[], REDIRECT_URI).unwrap();
    let callback = format!("{REDIRECT_URI}?code=abc&state={}", pending.state);
    let err = flow.exchange_code(&metadata, &callback, &pending).await.unwrap_err();
    assert!(matches!(err, AuthError::ExchangeFailed(_)));
}

#[tokio::test]
async fn test_denied_callback_never_reaches_token_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at", None)))
        .expect(0)
        .mount(&server)
        .await;

    let flow = flow(oauth_config());
    let metadata = metadata(&server);
    let (_, pending) = flow.begin_authorization(&metadata, &[], REDIRECT_URI).unwrap();
    let callback = format!(
        "{REDIRECT_URI}?error=access_denied&error_description=User+said+no&state={}",
        pending.state
    );

    let err = flow.exchange_code(&metadata, &callback, &pending).await.unwrap_err();
    match err {
        AuthError::Denied { error, description } => {
            assert_eq!(error, "access_denied");
            assert_eq!(description.as_deref(), Some("User said no"));
        }
        other => panic!("expected Denied, got {other:?}"),
    }
}
