//! Token and userinfo endpoint contract, against a mock provider.

mod common;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{CLIENT_ID, config, id_token, token_response};
use oidc_account::config::FlowType;
use oidc_account::net::HttpClient;
use oidc_account::{OidcError, TokenExchanger};

fn exchanger(server: &MockServer) -> TokenExchanger {
    let config = config(&server.uri(), FlowType::AuthorizationCode);
    TokenExchanger::new(config.client, Arc::new(HttpClient::new())).unwrap()
}

#[tokio::test]
async fn test_exchange_code_posts_form_with_basic_auth() {
    let server = MockServer::start().await;
    let basic = format!("Basic {}", STANDARD.encode("foobar:xyzzy"));

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(header("authorization", basic.as_str()))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=SplxlOBeZQQYbYS6WxSbIA"))
        .and(body_string_contains("redirect_uri=app%3A%2F%2Foidcsample.example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(
            Some(&id_token(CLIENT_ID, 3600)),
            Some("8xLOxBtZp8"),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = exchanger(&server)
        .exchange_code("SplxlOBeZQQYbYS6WxSbIA")
        .await
        .unwrap();
    assert_eq!(tokens.access_token, "SlAV32hkKG");
    assert_eq!(tokens.refresh_token.as_deref(), Some("8xLOxBtZp8"));
    assert_eq!(tokens.expires_in, Some(3600));
    assert_eq!(tokens.claims().unwrap().sub.as_deref(), Some(common::SUBJECT));
}

#[tokio::test]
async fn test_exchange_code_rejects_wrong_audience() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(
            Some(&id_token("another-client", 3600)),
            Some("8xLOxBtZp8"),
        )))
        .mount(&server)
        .await;

    let err = exchanger(&server).exchange_code("code").await.unwrap_err();
    assert!(matches!(err, OidcError::InvalidToken(_)));
    assert_eq!(err.user_message().as_deref(), Some("Could not get ID Token."));
}

#[tokio::test]
async fn test_refresh_reasserts_scope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=8xLOxBtZp8"))
        .and(body_string_contains("scope=openid+profile+offline_access"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_response(Some(&id_token(CLIENT_ID, 3600)), None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let tokens = exchanger(&server).refresh("8xLOxBtZp8").await.unwrap();
    assert!(tokens.id_token.is_some());
    assert!(tokens.refresh_token.is_none());
}

#[tokio::test]
async fn test_refresh_invalid_grant_is_distinguished() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Refresh token expired",
        })))
        .mount(&server)
        .await;

    let err = exchanger(&server).refresh("dead").await.unwrap_err();
    assert!(err.requires_reauthorization());
}

#[tokio::test]
async fn test_other_client_errors_are_transport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_client",
        })))
        .mount(&server)
        .await;

    match exchanger(&server).refresh("rt").await {
        Err(OidcError::Transport(msg)) => assert!(msg.contains("invalid_client")),
        other => panic!("expected Transport, got {other:?}"),
    }
}

#[tokio::test]
async fn test_user_info_uses_id_token_as_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth2/userinfo"))
        .and(header("authorization", "Bearer the-id-token"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sub": common::SUBJECT,
            "preferred_username": "jdoe",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let info = exchanger(&server).user_info("the-id-token").await.unwrap();
    assert_eq!(info["preferred_username"], "jdoe");
}

#[tokio::test]
async fn test_unreachable_provider_is_transport() {
    let server = MockServer::start().await;
    let exchanger = exchanger(&server);
    drop(server);

    assert!(matches!(
        exchanger.exchange_code("code").await,
        Err(OidcError::Transport(_))
    ));
}
