use std::{sync::Arc, time::Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::{
    auth::Claims,
    error::ApiError,
    limiter::{Decision, Quota},
    metrics::Metrics,
    store::CounterStore,
};

/// How the rate-limit key is derived from a request. `Subject` avoids
/// NAT/shared-IP false positives on authenticated routes and is an explicit
/// configuration choice, not automatic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    #[default]
    PeerAddr,
    Subject,
}

/// Shared state of the admission middleware. All mutable counter state lives
/// in the store, which is what makes this safe to run identically on every
/// instance behind a load balancer.
#[derive(Clone)]
pub struct AdmissionState {
    pub store: Arc<dyn CounterStore>,
    pub quota: Quota,
    /// Forward requests when the store is down instead of failing them.
    /// Off by default: an outage must not silently disable protection.
    pub fail_open: bool,
    pub key_strategy: KeyStrategy,
    pub metrics: Arc<Metrics>,
}

impl AdmissionState {
    pub fn new(store: Arc<dyn CounterStore>, quota: Quota, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            quota,
            fail_open: false,
            key_strategy: KeyStrategy::default(),
            metrics,
        }
    }

    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    pub fn with_key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }
}

/// Admission middleware: one atomic quota check per request, short-circuiting
/// before any downstream handler on exhaustion or store failure.
pub async fn admit(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let key = derive_key(&request, state.key_strategy);

    // The check runs in its own task so the shared counter stays consistent
    // even if the caller disconnects while it is in flight; the result is
    // simply discarded with the request in that case.
    let store = state.store.clone();
    let quota = state.quota;
    let task_key = key.clone();
    let outcome = tokio::spawn(async move { store.check(&task_key, &quota).await })
        .await
        .map_err(|e| crate::error::StoreError::Task(e.to_string()))
        .and_then(|inner| inner);

    let decision = match outcome {
        Ok(decision) => decision,
        Err(err) if state.fail_open => {
            state.metrics.record_store_error(true);
            warn!(key = %key, error = %err, "counter store failed, admitting without quota check");
            return next.run(request).await;
        }
        Err(err) => {
            state.metrics.record_store_error(false);
            error!(key = %key, error = %err, "counter store failed, refusing request");
            return ApiError::internal_server_error().into_response();
        }
    };

    if !decision.allowed {
        state.metrics.record_throttled();
        warn!(
            key = %key,
            retry_after_ms = decision.retry_after.as_millis() as u64,
            "rate limit exceeded"
        );
        let mut response = ApiError::rate_limit_exceeded().into_response();
        apply_quota_headers(response.headers_mut(), &decision);
        response.headers_mut().insert(
            "Retry-After",
            header_value(retry_after_secs(&decision).to_string()),
        );
        return response;
    }

    state.metrics.record_allowed();
    let mut response = next.run(request).await;
    apply_quota_headers(response.headers_mut(), &decision);
    response
}

/// Derive the bucket key for a request: the authenticated subject when
/// configured and available, otherwise the peer network address.
pub fn derive_key(request: &Request, strategy: KeyStrategy) -> String {
    if strategy == KeyStrategy::Subject {
        if let Some(claims) = request.extensions().get::<Claims>() {
            return format!("sub:{}", claims.sub);
        }
    }
    format!("ip:{}", peer_addr(request))
}

fn peer_addr(request: &Request) -> String {
    request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            request
                .headers()
                .get("X-Real-IP")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<std::net::SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    let reset_at = chrono::Utc::now().timestamp()
        + chrono::Duration::from_std(decision.reset_after)
            .unwrap_or(chrono::Duration::zero())
            .num_seconds();

    headers.insert("X-RateLimit-Limit", header_value(decision.limit.to_string()));
    headers.insert(
        "X-RateLimit-Remaining",
        header_value(decision.remaining.to_string()),
    );
    headers.insert("X-RateLimit-Reset", header_value(reset_at.to_string()));
}

fn retry_after_secs(decision: &Decision) -> u64 {
    decision.retry_after.as_secs_f64().ceil().max(1.0) as u64
}

fn header_value(value: String) -> HeaderValue {
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

/// Request telemetry: one structured log line and the Prometheus
/// counter/histogram pair per request.
pub async fn track(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();
    metrics.record_http_request(&method, &path, status);
    metrics.record_http_duration(&method, &path, latency.as_secs_f64());
    info!(
        method = %method,
        path = %path,
        status,
        latency_ms = latency.as_millis() as u64,
        "request processed"
    );

    response
}
