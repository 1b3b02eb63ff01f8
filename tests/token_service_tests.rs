mod auth_support;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use scopeauth::auth::{AuthError, DeviceAuthClient, TokenService, TokenStore};
use scopeauth::config::AuthConfig;
use scopeauth::scope::ScopeRegistry;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use auth_support::{strings, token, InMemoryTokenStore, PollOutcome, ScriptedFlow};

fn service_for(server: &MockServer, store: Arc<InMemoryTokenStore>) -> TokenService {
    let config = AuthConfig::builder()
        .client_id("test-client")
        .auth_base_url(server.uri())
        .build();
    TokenService::new(DeviceAuthClient::new(reqwest::Client::new(), &config), store)
}

fn idle_registry() -> ScopeRegistry {
    ScopeRegistry::new(ScriptedFlow::new(PollOutcome::Gated), Duration::from_secs(5))
}

fn validation_body(scopes: &[&str]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "client_id": "test-client",
        "login": "streamer",
        "scopes": scopes,
        "user_id": "1234",
        "expires_in": 3600
    }))
}

#[tokio::test]
async fn restore_without_persisted_token_returns_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .respond_with(validation_body(&[]))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryTokenStore::new());
    let registry = idle_registry();
    let restored = service_for(&server, store).restore(&registry).await.unwrap();

    assert!(restored.is_none());
    assert!(registry.current_token().is_none());
}

#[tokio::test]
async fn restore_installs_validated_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .and(header("Authorization", "OAuth stored-access"))
        .respond_with(validation_body(&["chat:read", "chat:edit"]))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryTokenStore::seeded(token("stored-access", &["chat:read"])));
    let registry = idle_registry();
    let restored = service_for(&server, store.clone())
        .restore(&registry)
        .await
        .unwrap()
        .expect("token restored");

    assert_eq!(restored.access_token, "stored-access");
    assert_eq!(restored.scopes, strings(&["chat:read", "chat:edit"]));
    assert!(restored.expires_at.is_some());
    assert_eq!(
        registry.current_token().map(|t| t.access_token.clone()),
        Some("stored-access".to_string())
    );
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn restore_refreshes_rejected_token_and_persists_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "status": 401,
            "message": "invalid access token"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=stored-access-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-access",
            "refresh_token": "fresh-refresh",
            "scope": ["chat:read"],
            "expires_in": 14400
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryTokenStore::seeded(token("stored-access", &["chat:read"])));
    let registry = idle_registry();
    let restored = service_for(&server, store.clone())
        .restore(&registry)
        .await
        .unwrap()
        .expect("token restored");

    assert_eq!(restored.access_token, "fresh-access");
    assert_eq!(store.save_count(), 1);
    assert_eq!(store.get().map(|t| t.access_token), Some("fresh-access".to_string()));
    assert_eq!(
        registry.current_token().and_then(|t| t.refresh_token.clone()),
        Some("fresh-refresh".to_string())
    );
}

#[tokio::test]
async fn restore_discards_token_that_cannot_be_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": 400,
            "message": "Invalid refresh token"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryTokenStore::seeded(token("stored-access", &["chat:read"])));
    let registry = idle_registry();
    let restored = service_for(&server, store.clone()).restore(&registry).await.unwrap();

    assert!(restored.is_none());
    assert!(store.get().is_none());
    assert!(registry.current_token().is_none());
}

#[tokio::test]
async fn restore_keeps_token_when_provider_is_unreachable() {
    let config = AuthConfig::builder()
        .client_id("test-client")
        .auth_base_url("http://127.0.0.1:1")
        .build();
    let store = Arc::new(InMemoryTokenStore::seeded(token("stored-access", &["chat:read"])));
    let service = TokenService::new(DeviceAuthClient::new(reqwest::Client::new(), &config), store.clone());

    let err = service.restore(&idle_registry()).await.unwrap_err();
    assert!(matches!(err, AuthError::Network(_)), "got {err:?}");
    assert!(store.get().is_some());
}

#[tokio::test]
async fn logout_clears_store_and_registry() {
    let server = MockServer::start().await;
    let store = Arc::new(InMemoryTokenStore::seeded(token("stored-access", &["chat:read"])));
    let registry = idle_registry().with_token(token("stored-access", &["chat:read"]));
    let service = service_for(&server, store.clone());

    service.logout(Some(&registry)).unwrap();

    assert!(store.get().is_none());
    assert!(registry.current_token().is_none());
    assert!(service.store().load().unwrap().is_none());
}
