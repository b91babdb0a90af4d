//! End-to-end lifecycle: authorization, refresh decisions and guarded calls
//! against a mock provider and API.

mod common;

use std::sync::Arc;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{CLIENT_ID, REDIRECT_URI, ScriptedUi, SUBJECT, config, id_token, token_response};
use oidc_account::config::FlowType;
use oidc_account::net::HttpClient;
use oidc_account::oidc::ImplicitTokens;
use oidc_account::store::{FileCredentialStore, MemoryCredentialStore};
use oidc_account::{
    AuthToken, AuthorizationOutcome, Authenticator, CredentialStore, OidcError, TokenKind,
    TokenState,
};

const ACCOUNT: &str = "jdoe (248289761001)";

fn authenticator(server: &MockServer, flow: FlowType, store: Arc<dyn CredentialStore>) -> Authenticator {
    Authenticator::with_parts(
        &config(&server.uri(), flow),
        Arc::new(HttpClient::new()),
        store,
    )
    .unwrap()
}

/// Store holding `ACCOUNT` with the given slots.
fn store_with(slots: &[(TokenKind, &str)]) -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with_account(ACCOUNT, "oidc-account", slots))
}

async fn mount_userinfo(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/oauth2/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sub": SUBJECT,
            "preferred_username": "jdoe",
        })))
        .mount(server)
        .await;
}

// =============================================================================
// Interactive authorization
// =============================================================================

#[tokio::test]
async fn test_code_flow_login_creates_named_account() {
    let server = MockServer::start().await;
    let id = id_token(CLIENT_ID, 3600);
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_response(Some(&id), Some("8xLOxBtZp8"))),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_userinfo(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileCredentialStore::new(dir.path()));
    let auth = authenticator(&server, FlowType::AuthorizationCode, store.clone());
    let ui = ScriptedUi::new(AuthorizationOutcome::Redirected(format!(
        "{REDIRECT_URI}?code=SplxlOBeZQQYbYS6WxSbIA&state=af0ifjsldkj"
    )));

    let handle = auth.authorize(&ui, None).await.unwrap();
    assert_eq!(handle.name, ACCOUNT);
    assert_eq!(handle.account_type, "oidc-account");
    assert_eq!(auth.lifecycle.state(ACCOUNT), TokenState::HasValidToken);

    let shown = ui.requests.lock().unwrap();
    assert!(shown[0].url.as_str().contains("response_type=code"));
    assert!(shown[0].url.as_str().contains("prompt=consent"));
    drop(shown);

    assert_eq!(store.get(ACCOUNT, TokenKind::Id).unwrap(), Some(id.clone()));
    assert_eq!(
        store.get(ACCOUNT, TokenKind::Refresh).unwrap().as_deref(),
        Some("8xLOxBtZp8")
    );
    assert_eq!(
        auth.get_auth_token(ACCOUNT, TokenKind::Id).await.unwrap(),
        AuthToken::Token(id)
    );
}

#[tokio::test]
async fn test_implicit_login_needs_no_token_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    mount_userinfo(&server).await;

    let id = id_token(CLIENT_ID, 3600);
    let fragment = ImplicitTokens {
        access_token: "SlAV32hkKG".into(),
        id_token: id.clone(),
        token_type: "Bearer".into(),
        expires_in: 3600,
        scope: None,
    }
    .to_fragment();
    let store = Arc::new(MemoryCredentialStore::new());
    let auth = authenticator(&server, FlowType::Implicit, store.clone());
    let ui = ScriptedUi::new(AuthorizationOutcome::Redirected(format!("{REDIRECT_URI}#{fragment}")));

    let handle = auth.authorize(&ui, None).await.unwrap();
    assert_eq!(store.get(&handle.name, TokenKind::Id).unwrap(), Some(id));
    assert!(store.get(&handle.name, TokenKind::Refresh).unwrap().is_none());
}

#[tokio::test]
async fn test_hybrid_login_with_foreign_front_channel_token_persists_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(
            Some(&id_token(CLIENT_ID, 3600)),
            Some("rt"),
        )))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let auth = authenticator(&server, FlowType::Hybrid, store.clone());
    let ui = ScriptedUi::new(AuthorizationOutcome::Redirected(format!(
        "{REDIRECT_URI}#code=abc&id_token={}",
        id_token("someone-else", 3600)
    )));

    let err = auth.authorize(&ui, None).await.unwrap_err();
    assert!(matches!(err, OidcError::InvalidToken(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_cancelled_login_commits_nothing() {
    let server = MockServer::start().await;
    let store = store_with(&[]);
    let auth = authenticator(&server, FlowType::Hybrid, store.clone());
    let ui = ScriptedUi::new(AuthorizationOutcome::Cancelled);

    let err = auth.authorize(&ui, Some(ACCOUNT)).await.unwrap_err();
    assert!(matches!(err, OidcError::AuthorizationCancelled));
    assert!(err.user_message().is_none());
    assert_eq!(auth.lifecycle.state(ACCOUNT), TokenState::NeedsReauthorization);
    for kind in TokenKind::ALL {
        assert!(store.get(ACCOUNT, kind).unwrap().is_none());
    }
}

#[tokio::test]
async fn test_provider_error_is_rendered_verbatim() {
    let server = MockServer::start().await;
    let auth = authenticator(&server, FlowType::AuthorizationCode, store_with(&[]));
    let ui = ScriptedUi::new(AuthorizationOutcome::Redirected(format!(
        "{REDIRECT_URI}?error=server_error&error_description=Something+broke"
    )));

    let err = auth.authorize(&ui, Some(ACCOUNT)).await.unwrap_err();
    assert_eq!(
        err.user_message().as_deref(),
        Some("Error code: server_error\n\nSomething broke")
    );
}

// =============================================================================
// Refresh decisions
// =============================================================================

#[tokio::test]
async fn test_invalid_grant_moves_to_reauthorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let auth = authenticator(&server, FlowType::Hybrid, store_with(&[(TokenKind::Refresh, "dead")]));
    let token = auth.get_auth_token(ACCOUNT, TokenKind::Id).await.unwrap();

    let AuthToken::ReauthorizationRequired(request) = token else {
        panic!("expected re-authorization, got {token:?}");
    };
    assert_eq!(request.account.as_deref(), Some(ACCOUNT));
    assert_eq!(auth.lifecycle.state(ACCOUNT), TokenState::NeedsReauthorization);
}

#[tokio::test]
async fn test_server_error_leaves_needs_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_with(&[(TokenKind::Refresh, "8xLOxBtZp8")]);
    let auth = authenticator(&server, FlowType::Hybrid, store.clone());
    let err = auth.get_auth_token(ACCOUNT, TokenKind::Id).await.unwrap_err();

    assert!(matches!(err, OidcError::Transport(_)));
    assert_eq!(auth.lifecycle.state(ACCOUNT), TokenState::NeedsRefresh);
    assert_eq!(
        store.get(ACCOUNT, TokenKind::Refresh).unwrap().as_deref(),
        Some("8xLOxBtZp8")
    );
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_response(Some(&id_token(CLIENT_ID, 3600)), None))
                .set_delay(std::time::Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let auth = authenticator(&server, FlowType::Hybrid, store_with(&[(TokenKind::Refresh, "rt")]));
    let (a, b) = tokio::join!(
        auth.get_auth_token(ACCOUNT, TokenKind::Id),
        auth.get_auth_token(ACCOUNT, TokenKind::Id),
    );
    assert_eq!(a.unwrap(), b.unwrap());
}

// =============================================================================
// Guarded API calls
// =============================================================================

#[tokio::test]
async fn test_guard_retries_once_after_401() {
    let server = MockServer::start().await;
    let stale = id_token(CLIENT_ID, 3600);
    let fresh = id_token(CLIENT_ID, 7200);

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(Some(&fresh), None)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/profile"))
        .and(header("authorization", format!("Bearer {stale}").as_str()))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/profile"))
        .and(header("authorization", format!("Bearer {fresh}").as_str()))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "jdoe"})))
        .expect(1)
        .mount(&server)
        .await;

    let auth = authenticator(
        &server,
        FlowType::Hybrid,
        store_with(&[(TokenKind::Id, stale.as_str()), (TokenKind::Refresh, "rt")]),
    );
    let json = auth
        .get_json(ACCOUNT, &format!("{}/api/profile", server.uri()))
        .await
        .unwrap();
    assert_eq!(json["name"], "jdoe");
}

#[tokio::test]
async fn test_guard_gives_up_after_second_401() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_response(Some(&id_token(CLIENT_ID, 7200)), None)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/profile"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let auth = authenticator(
        &server,
        FlowType::Hybrid,
        store_with(&[
            (TokenKind::Id, id_token(CLIENT_ID, 3600).as_str()),
            (TokenKind::Refresh, "rt"),
        ]),
    );
    let err = auth
        .make_request(ACCOUNT, reqwest::Method::GET, &format!("{}/api/profile", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "401 Unauthorized");
}

#[tokio::test]
async fn test_guard_does_not_retry_other_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/profile"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let auth = authenticator(
        &server,
        FlowType::Hybrid,
        store_with(&[(TokenKind::Id, id_token(CLIENT_ID, 3600).as_str())]),
    );
    match auth.get_json(ACCOUNT, &format!("{}/api/profile", server.uri())).await {
        Err(OidcError::UnrecoverableApi { status, message }) => {
            assert_eq!(status, 404);
            assert_eq!(message, "Not Found");
        }
        other => panic!("expected UnrecoverableApi, got {other:?}"),
    }
}
