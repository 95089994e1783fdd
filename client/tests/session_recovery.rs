//! Session recovery against a mock API server.

#![allow(clippy::unwrap_used)]

use lms_client::{ApiClient, ClientConfig, ClientError, Credentials, ErrorKind};
use lms_core::{MemorySessionStore, SessionStore};
use lms_testing::{ManualClock, RecordingNavigator, login_body, session};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    server: MockServer,
    client: ApiClient,
    store: Arc<MemorySessionStore>,
    navigator: Arc<RecordingNavigator>,
}

async fn harness(current_path: &str) -> Harness {
    lms_testing::init_tracing();
    let server = MockServer::start().await;
    let store = Arc::new(MemorySessionStore::with_session(session("tok1", "ref1")));
    let navigator = Arc::new(RecordingNavigator::at(current_path));
    let client = ApiClient::new(
        ClientConfig::with_base_url(server.uri()),
        store.clone(),
        navigator.clone(),
    )
    .unwrap();

    Harness {
        server,
        client,
        store,
        navigator,
    }
}

fn tokens(access: &str, refresh: &str) -> Value {
    json!({ "accessToken": access, "refreshToken": refresh })
}

#[tokio::test]
async fn test_expired_token_is_refreshed_and_request_resent() {
    let h = harness("/dashboard").await;

    Mock::given(method("GET"))
        .and(path("/v1/protected"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/users/refresh"))
        .and(body_json(json!({ "refreshToken": "ref1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(tokens("tok2", "ref2")))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/protected"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&h.server)
        .await;

    let body: Value = h.client.get_json("/v1/protected").await.unwrap();

    assert_eq!(body, json!({ "ok": true }));
    let current = h.store.current().unwrap();
    assert_eq!(current.access_token, "tok2");
    assert_eq!(current.refresh_token, "ref2");
    assert_eq!(current.user, session("tok1", "ref1").user);
    assert_eq!(h.navigator.redirect_count(), 0);
}

#[tokio::test]
async fn test_second_401_is_surfaced_without_another_refresh() {
    let h = harness("/dashboard").await;

    Mock::given(method("GET"))
        .and(path("/v1/protected"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "Forbidden token" })))
        .expect(2)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/users/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tokens("tok2", "ref2")))
        .expect(1)
        .mount(&h.server)
        .await;

    let err = h
        .client
        .get_json::<Value>("/v1/protected")
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert_eq!(err.message(), "Forbidden token");
    assert_eq!(h.store.access_token().as_deref(), Some("tok2"));
    assert_eq!(h.navigator.redirect_count(), 0);
}

#[tokio::test]
async fn test_failed_refresh_tears_down_and_redirects_once() {
    let h = harness("/tugas").await;

    Mock::given(method("GET"))
        .and(path("/v1/protected"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/users/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;

    let err = h
        .client
        .get_json::<Value>("/v1/protected")
        .await
        .unwrap_err();

    assert_eq!(err, ClientError::SessionExpired);
    assert_eq!(err.kind(), ErrorKind::AuthExpired);
    assert!(h.store.current().is_none());
    assert!(h.store.access_token().is_none());
    assert!(h.store.refresh_token().is_none());
    assert!(h.store.user().is_none());
    assert_eq!(h.navigator.redirects(), vec!["/sign-in".to_string()]);
}

#[tokio::test]
async fn test_no_redirect_when_already_on_sign_in() {
    let h = harness("/sign-in").await;

    Mock::given(method("GET"))
        .and(path("/v1/protected"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/users/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.server)
        .await;

    let result = h.client.get_json::<Value>("/v1/protected").await;

    assert_eq!(result.unwrap_err(), ClientError::SessionExpired);
    assert!(!h.store.is_authenticated());
    assert_eq!(h.navigator.redirect_count(), 0);
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let h = harness("/dashboard").await;

    Mock::given(method("GET"))
        .and(path("/v1/protected"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/users/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(tokens("tok2", "ref2"))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/protected"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(3)
        .mount(&h.server)
        .await;

    let (a, b, c) = tokio::join!(
        h.client.get_json::<Value>("/v1/protected"),
        h.client.get_json::<Value>("/v1/protected"),
        h.client.get_json::<Value>("/v1/protected"),
    );

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(h.store.access_token().as_deref(), Some("tok2"));
}

#[tokio::test]
async fn test_token_rotated_by_another_request_is_reused() {
    let h = harness("/dashboard").await;

    // The server answers slowly with 401 for the old token; meanwhile the
    // session is refreshed elsewhere.
    Mock::given(method("GET"))
        .and(path("/v1/protected"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(200)))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/protected"))
        .and(header("authorization", "Bearer tok9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/users/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tokens("tokX", "refX")))
        .expect(0)
        .mount(&h.server)
        .await;

    let store = h.store.clone();
    let rotate = async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.set_tokens(lms_core::TokenPair {
            access_token: "tok9".to_string(),
            refresh_token: "ref9".to_string(),
        });
    };

    let (result, ()) = tokio::join!(h.client.get_json::<Value>("/v1/protected"), rotate);
    assert_eq!(result.unwrap(), json!({ "ok": true }));
}

#[tokio::test]
async fn test_login_401_never_refreshes() {
    let server = MockServer::start().await;
    let store = Arc::new(MemorySessionStore::new());
    let navigator = Arc::new(RecordingNavigator::at("/sign-in"));
    let client = ApiClient::new(
        ClientConfig::with_base_url(server.uri()),
        store.clone(),
        navigator.clone(),
    )
    .unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/users/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "message": "Email atau password salah" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/users/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tokens("tok2", "ref2")))
        .expect(0)
        .mount(&server)
        .await;

    let err = client
        .login(&Credentials::new("siswa@sekolah.id", "salah"))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert_eq!(err.message(), "Email atau password salah");
    assert!(!store.is_authenticated());
    assert_eq!(navigator.redirect_count(), 0);
}

#[tokio::test]
async fn test_login_stores_session_and_sends_bearer() {
    let server = MockServer::start().await;
    let store = Arc::new(MemorySessionStore::new());
    let client = ApiClient::new(
        ClientConfig::with_base_url(server.uri()),
        store.clone(),
        Arc::new(RecordingNavigator::at("/sign-in")),
    )
    .unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/users/login"))
        .and(body_json(json!({ "email": "user1@sekolah.id", "password": "rahasia" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body("tok1", "ref1")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users/me"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1, "role": "admin" })))
        .expect(1)
        .mount(&server)
        .await;

    let user = client
        .login(&Credentials::new("user1@sekolah.id", "rahasia"))
        .await
        .unwrap();
    assert_eq!(Some(user.clone()), store.user());

    // A non-auth response carrying user data never touches the stored user.
    let _: Value = client.get_json("/v1/users/me").await.unwrap();
    assert_eq!(store.user(), Some(user));
}

#[tokio::test]
async fn test_rate_limit_blocks_login_until_cooldown_elapses() {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::default());
    let client = ApiClient::with_clock(
        ClientConfig::with_base_url(server.uri()),
        Arc::new(MemorySessionStore::new()),
        Arc::new(RecordingNavigator::at("/sign-in")),
        clock.clone(),
    )
    .unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/users/login"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = Credentials::new("guru@sekolah.id", "rahasia");
    let first = client.login(&credentials).await.unwrap_err();
    assert_eq!(first.kind(), ErrorKind::RateLimited);

    clock.advance(Duration::from_secs(10));
    let second = client.login(&credentials).await.unwrap_err();
    assert_eq!(second.kind(), ErrorKind::RateLimited);
    assert_eq!(second.message(), "Too many attempts. Try again in 20 seconds.");

    clock.advance(Duration::from_secs(21));
    assert!(!client.cooldown().is_active());
}

#[tokio::test]
async fn test_401_without_refresh_token_tears_down_directly() {
    let server = MockServer::start().await;
    let store = Arc::new(MemorySessionStore::new());
    let navigator = Arc::new(RecordingNavigator::at("/nilai"));
    let client = ApiClient::new(
        ClientConfig::with_base_url(server.uri()),
        store.clone(),
        navigator.clone(),
    )
    .unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/protected"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/users/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tokens("tok2", "ref2")))
        .expect(0)
        .mount(&server)
        .await;

    let err = client.get_json::<Value>("/v1/protected").await.unwrap_err();

    assert_eq!(err, ClientError::SessionExpired);
    assert!(!store.is_authenticated());
    assert_eq!(navigator.redirects(), vec!["/sign-in".to_string()]);
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    let store = Arc::new(MemorySessionStore::with_session(session("tok1", "ref1")));
    let navigator = Arc::new(RecordingNavigator::at("/dashboard"));
    let client = ApiClient::new(
        ClientConfig::with_base_url(server.uri()).with_timeout(Duration::from_millis(100)),
        store.clone(),
        navigator.clone(),
    )
    .unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/classes"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": [] }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let err = client.get_json::<Value>("/v1/classes").await.unwrap_err();

    assert_eq!(err, ClientError::Timeout);
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(err.is_retryable());
    assert!(store.is_authenticated());
    assert_eq!(navigator.redirect_count(), 0);
}
