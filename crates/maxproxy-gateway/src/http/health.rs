use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health — liveness probe.
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

/// GET /healthz — Kubernetes-style liveness probe.
pub async fn healthz_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

/// GET /auth/status — token status for both providers, no secrets.
pub async fn auth_status_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "anthropic": state.anthropic_oauth.store().status(),
        "chatgpt": state.chatgpt_oauth.store().status(),
    }))
}
