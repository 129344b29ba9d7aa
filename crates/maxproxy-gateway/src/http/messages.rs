//! Native Anthropic Messages endpoint: shape and forward.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use maxproxy_providers::shape::{self, USE_1M_CONTEXT_KEY};
use maxproxy_providers::StreamTracer;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{anthropic_error, auth_required, short_request_id, sse_response, upstream_status};
use crate::app::AppState;

/// POST /v1/messages — Anthropic-native path.
pub async fn messages_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Response {
    let request_id = short_request_id();

    // Field-level validation before anything is sent upstream.
    let Some(model) = body.get("model").and_then(Value::as_str).map(str::to_string) else {
        return anthropic_error(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "model: field required",
        );
    };
    if body.get("messages").and_then(Value::as_array).is_none() {
        return anthropic_error(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "messages: field required",
        );
    }
    if body.get("max_tokens").and_then(Value::as_u64).is_none() {
        return anthropic_error(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "max_tokens: field required",
        );
    }

    info!(request_id, model = %model, "anthropic messages request");

    let access_token = match state.anthropic_oauth.valid_access_token().await {
        Ok(token) => token,
        Err(e) => {
            error!(request_id, error = %e, "no valid token available");
            return auth_required();
        }
    };

    // Resolve short aliases like "sonnet-4-5" to the backend id.
    let resolved = state.registry.resolve(&model);
    debug!(request_id, backend = %resolved.backend_id, "resolved model");
    body["model"] = json!(resolved.backend_id);
    if resolved.use_1m_context {
        body[USE_1M_CONTEXT_KEY] = json!(true);
    }

    shape::ensure_thinking_max_tokens(&mut body);
    shape::sanitize(&mut body);
    shape::inject_spoof_system(&mut body);
    shape::add_prompt_caching(&mut body);

    let client_betas = headers
        .get("anthropic-beta")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    if stream {
        let tracer = StreamTracer::maybe_create(
            state.config.stream_trace_enabled,
            &request_id,
            "anthropic-messages",
            &state.config.stream_trace_dir,
            state.config.stream_trace_max_bytes,
        )
        .map(Arc::new);

        let (tx, rx) = mpsc::channel::<String>(64);
        let task_state = state.clone();
        let task_tracer = tracer.clone();
        tokio::spawn(async move {
            task_state
                .anthropic
                .stream(
                    &request_id,
                    body,
                    &access_token,
                    client_betas.as_deref(),
                    task_tracer.clone(),
                    tx,
                )
                .await;
            if let Some(tracer) = task_tracer {
                tracer.close();
            }
        });
        return sse_response(rx, &[]);
    }

    match state
        .anthropic
        .invoke(body, &access_token, client_betas.as_deref())
        .await
    {
        Ok(response) => {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();

            if status != 200 {
                error!(request_id, status, "Anthropic API error");
                let error_body: Value = serde_json::from_str(&text).unwrap_or_else(|_| {
                    json!({ "error": { "type": "api_error", "message": text } })
                });
                return (upstream_status(status), Json(error_body)).into_response();
            }

            match serde_json::from_str::<Value>(&text) {
                Ok(anthropic_response) => {
                    let usage_in = anthropic_response
                        .pointer("/usage/input_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    let usage_out = anthropic_response
                        .pointer("/usage/output_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    debug!(request_id, usage_in, usage_out, "anthropic messages finished");
                    Json(anthropic_response).into_response()
                }
                Err(e) => anthropic_error(
                    StatusCode::BAD_GATEWAY,
                    "api_error",
                    &format!("malformed upstream response: {e}"),
                ),
            }
        }
        Err(e) => {
            error!(request_id, error = %e, "anthropic request failed");
            anthropic_error(StatusCode::BAD_GATEWAY, "api_error", &e.to_string())
        }
    }
}
