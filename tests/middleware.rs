//! Admission middleware driven through the full router.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{FailingStore, FAILURE_DETAIL};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use gatekeeper::http::middleware::{INVALID_KEY_MESSAGE, RATE_LIMITED_MESSAGE};
use gatekeeper::http::router;
use gatekeeper::ratelimit::{AdmissionBackend, AdmissionEngine, LimitTable, TokenLimits};
use gatekeeper::store::{CounterStore, MemoryStore};

fn limits(ip_limit: u64) -> LimitTable {
    LimitTable::new(ip_limit, Duration::from_secs(60))
        .with_tokens(TokenLimits::from_iter([("abc123", 3)]))
}

fn app_with_store(ip_limit: u64) -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let backend: Arc<dyn AdmissionBackend> =
        Arc::new(AdmissionEngine::new(Arc::clone(&store), limits(ip_limit)));
    (router(backend), store)
}

fn app(ip_limit: u64) -> Router {
    app_with_store(ip_limit).0
}

fn get(path: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, content_type, body)
}

#[tokio::test]
async fn test_allowed_request_reaches_route() {
    let app = app(5);

    let (status, _, body) = send(&app, get("/health", &[("x-forwarded-for", "10.0.0.1")])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _, body) = send(&app, get("/", &[("x-forwarded-for", "10.0.0.1")])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Rate Limiter API");

    let (status, _, body) = send(&app, get("/api/test", &[("x-forwarded-for", "10.0.0.1")])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Test endpoint");
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn test_ip_over_limit_gets_429() {
    let app = app(5);
    let headers = [("x-forwarded-for", "10.0.0.1")];

    for _ in 0..5 {
        let (status, _, _) = send(&app, get("/", &headers)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, content_type, body) = send(&app, get("/", &headers)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(body, serde_json::json!({ "error": RATE_LIMITED_MESSAGE }));

    // Blocked: stays 429.
    let (status, _, _) = send(&app, get("/", &headers)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // Another client is unaffected.
    let (status, _, _) = send(&app, get("/", &[("x-forwarded-for", "10.0.0.2")])).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unregistered_token_gets_403() {
    let app = app(5);

    let (status, content_type, body) =
        send(&app, get("/", &[("api_key", "xyz999"), ("x-forwarded-for", "10.0.0.1")])).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(body, serde_json::json!({ "error": INVALID_KEY_MESSAGE }));
}

#[tokio::test]
async fn test_registered_token_over_limit_gets_429() {
    let app = app(100);
    let headers = [("api_key", "abc123"), ("x-forwarded-for", "10.0.0.1")];

    for _ in 0..3 {
        let (status, _, _) = send(&app, get("/", &headers)).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _, body) = send(&app, get("/", &headers)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], RATE_LIMITED_MESSAGE);
}

#[tokio::test]
async fn test_token_header_overrides_blocked_ip() {
    let (app, store) = app_with_store(1);
    let ip = [("x-forwarded-for", "192.0.2.50")];

    send(&app, get("/", &ip)).await;
    let (status, _, _) = send(&app, get("/", &ip)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, _, _) = send(
        &app,
        get("/", &[("api_key", "abc123"), ("x-forwarded-for", "192.0.2.50")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.get_value("ratelimit:token:abc123").await.unwrap(), 1);
}

#[tokio::test]
async fn test_empty_token_header_uses_ip() {
    let (app, store) = app_with_store(5);

    let request = get("/", &[("api_key", ""), ("x-real-ip", "198.51.100.9")]);
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.get_value("ratelimit:ip:198.51.100.9").await.unwrap(), 1);
}

#[tokio::test]
async fn test_forwarded_for_takes_first_hop() {
    let (app, store) = app_with_store(5);

    send(
        &app,
        get(
            "/",
            &[
                ("x-forwarded-for", "203.0.113.5, 10.0.0.1"),
                ("x-real-ip", "198.51.100.9"),
            ],
        ),
    )
    .await;

    assert_eq!(store.get_value("ratelimit:ip:203.0.113.5").await.unwrap(), 1);
    assert_eq!(store.get_value("ratelimit:ip:198.51.100.9").await.unwrap(), 0);
    assert_eq!(store.get_value("ratelimit:ip:10.0.0.1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_store_failure_gets_generic_500() {
    let backend: Arc<dyn AdmissionBackend> =
        Arc::new(AdmissionEngine::new(Arc::new(FailingStore), limits(5)));
    let app = router(backend);

    let response = app
        .clone()
        .oneshot(get("/", &[("x-forwarded-for", "10.0.0.1")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(!text.contains(FAILURE_DETAIL));
    assert!(!text.contains("6379"));

    // An unregistered token is still refused as such while the store is down.
    let (status, _, _) = send(&app, get("/", &[("api_key", "xyz999")])).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
