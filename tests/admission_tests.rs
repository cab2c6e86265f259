use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use tower::ServiceExt;

use gatekeeper::{
    auth::{issue_token, AuthGate, Claims},
    error::StoreError,
    limiter::{Decision, Quota},
    metrics::Metrics,
    middleware::{AdmissionState, KeyStrategy},
    routes::{build_router, AppState},
    store::{CounterStore, MemoryCounterStore},
};

const SECRET: &str = "integration-test-secret";

/// Store stub that fails every check, for exercising the failure policy.
struct BrokenStore;

#[async_trait]
impl CounterStore for BrokenStore {
    async fn check(&self, _key: &str, _quota: &Quota) -> Result<Decision, StoreError> {
        Err(StoreError::Timeout(Duration::from_millis(150)))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Err(StoreError::Timeout(Duration::from_millis(150)))
    }
}

fn build_app(store: Arc<dyn CounterStore>, quota: Quota, fail_open: bool) -> Router {
    let metrics = Arc::new(Metrics::new().unwrap());
    let auth = AuthGate::new(SECRET, metrics.clone());
    let admission = AdmissionState::new(store.clone(), quota, metrics.clone())
        .with_fail_open(fail_open)
        .with_key_strategy(KeyStrategy::Subject);
    build_router(auth, admission, AppState { store, metrics })
}

fn bearer_token(sub: i64) -> String {
    let claims = Claims::new(sub, "user", Utc::now().timestamp(), 3600);
    issue_token(&claims, SECRET).unwrap()
}

fn whoami_request(token: Option<&str>) -> Request<Body> {
    let builder = Request::builder().uri("/api/v1/whoami");
    let builder = match token {
        Some(token) => builder.header("Authorization", format!("Bearer {token}")),
        None => builder,
    };
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn authenticated_request_passes_with_quota_headers() {
    let app = build_app(
        Arc::new(MemoryCounterStore::new()),
        Quota::per_period(5, Duration::from_secs(60)),
        false,
    );

    let response = app
        .oneshot(whoami_request(Some(&bearer_token(42))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("X-RateLimit-Limit").unwrap(), "5");
    assert_eq!(response.headers().get("X-RateLimit-Remaining").unwrap(), "4");
    assert!(response.headers().contains_key("X-RateLimit-Reset"));

    let body = body_json(response).await;
    assert_eq!(body["user_id"], 42);
    assert_eq!(body["role"], "user");
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let app = build_app(
        Arc::new(MemoryCounterStore::new()),
        Quota::per_period(5, Duration::from_secs(60)),
        false,
    );

    let response = app.oneshot(whoami_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "unauthorized");
}

#[tokio::test]
async fn garbage_token_is_unauthorized() {
    let app = build_app(
        Arc::new(MemoryCounterStore::new()),
        Quota::per_period(5, Duration::from_secs(60)),
        false,
    );

    let response = app.oneshot(whoami_request(Some("garbage"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "invalid_token");
}

#[tokio::test]
async fn exhaustion_returns_429_with_retry_after() {
    let store = Arc::new(MemoryCounterStore::new());
    let app = build_app(
        store,
        Quota::per_period(2, Duration::from_secs(60)),
        false,
    );
    let token = bearer_token(7);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(whoami_request(Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.oneshot(whoami_request(Some(&token))).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("Retry-After"));
    assert_eq!(response.headers().get("X-RateLimit-Remaining").unwrap(), "0");
    assert_eq!(body_json(response).await["code"], "rate_limit_exceeded");
}

#[tokio::test]
async fn buckets_are_per_subject() {
    let store = Arc::new(MemoryCounterStore::new());
    let app = build_app(
        store,
        Quota::per_period(1, Duration::from_secs(60)),
        false,
    );

    let first = app
        .clone()
        .oneshot(whoami_request(Some(&bearer_token(1))))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let throttled = app
        .clone()
        .oneshot(whoami_request(Some(&bearer_token(1))))
        .await
        .unwrap();
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different subject has its own bucket.
    let other = app
        .oneshot(whoami_request(Some(&bearer_token(2))))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn store_failure_fails_closed_by_default() {
    let app = build_app(
        Arc::new(BrokenStore),
        Quota::per_period(5, Duration::from_secs(60)),
        false,
    );

    let response = app
        .oneshot(whoami_request(Some(&bearer_token(1))))
        .await
        .unwrap();

    // The request never reaches the downstream handler.
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["code"], "internal_server_error");
}

#[tokio::test]
async fn store_failure_forwards_when_fail_open() {
    let app = build_app(
        Arc::new(BrokenStore),
        Quota::per_period(5, Duration::from_secs(60)),
        true,
    );

    let response = app
        .oneshot(whoami_request(Some(&bearer_token(1))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // No quota headers without a decision.
    assert!(!response.headers().contains_key("X-RateLimit-Limit"));
}

#[tokio::test]
async fn public_status_is_rate_limited_by_peer_addr() {
    let store = Arc::new(MemoryCounterStore::new());
    let app = build_app(
        store,
        Quota::per_period(1, Duration::from_secs(60)),
        false,
    );

    let request = || {
        Request::builder()
            .uri("/api/v1/status")
            .header("X-Forwarded-For", "203.0.113.9")
            .body(Body::empty())
            .unwrap()
    };

    let first = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn healthcheck_reflects_store_health() {
    let healthy = build_app(
        Arc::new(MemoryCounterStore::new()),
        Quota::per_period(5, Duration::from_secs(60)),
        false,
    );
    let response = healthy
        .oneshot(
            Request::builder()
                .uri("/healthcheck")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");

    let broken = build_app(
        Arc::new(BrokenStore),
        Quota::per_period(5, Duration::from_secs(60)),
        false,
    );
    let response = broken
        .oneshot(
            Request::builder()
                .uri("/healthcheck")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn metrics_endpoint_exposes_request_counters() {
    let app = build_app(
        Arc::new(MemoryCounterStore::new()),
        Quota::per_period(5, Duration::from_secs(60)),
        false,
    );

    // One tracked request first so the counter vec has a sample.
    let _ = app
        .clone()
        .oneshot(whoami_request(Some(&bearer_token(1))))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("http_requests_total"));
    assert!(text.contains("admission_decisions_total"));
}
