use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    response::Json,
    routing::get,
    Router,
};
use prometheus::TextEncoder;
use serde_json::json;

use crate::{
    auth::{require_auth, AuthGate, AuthenticatedUser},
    metrics::Metrics,
    middleware::{admit, track, AdmissionState},
    store::CounterStore,
};

/// Handler-facing state: the store handle for health checks and the metrics
/// registry for exposition.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CounterStore>,
    pub metrics: Arc<Metrics>,
}

/// Assemble the full router. Gate order on protected routes is
/// authentication, then admission (so subject-keyed buckets see the caller
/// identity), then the handler; public API routes carry admission only.
pub fn build_router(auth: AuthGate, admission: AdmissionState, state: AppState) -> Router {
    let protected = Router::new()
        .route("/whoami", get(whoami))
        .layer(from_fn_with_state(admission.clone(), admit))
        .layer(from_fn_with_state(auth, require_auth));

    let public = Router::new()
        .route("/status", get(status))
        .layer(from_fn_with_state(admission, admit));

    Router::new()
        .nest("/api/v1", protected.merge(public))
        .route("/healthcheck", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(from_fn_with_state(state.metrics.clone(), track))
        .with_state(state)
}

async fn status() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn whoami(AuthenticatedUser(claims): AuthenticatedUser) -> Json<serde_json::Value> {
    Json(json!({
        "user_id": claims.sub,
        "role": claims.role,
    }))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.store.health_check().await {
        Ok(()) => Ok(Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let families = state.metrics.registry().gather();

    encoder
        .encode_to_string(&families)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
