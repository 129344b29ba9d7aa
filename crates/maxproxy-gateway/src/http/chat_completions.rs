//! OpenAI Chat Completions endpoint — the multi-provider front door.
//!
//! Routing by resolved model: ChatGPT-family models go to the Codex
//! Responses driver, user-configured custom models pass through to their
//! OpenAI-compatible endpoint, everything else is converted and shaped for
//! Anthropic.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use maxproxy_models::{CustomModel, ModelFamily, Resolved};
use maxproxy_providers::convert::request::prepare_anthropic_request;
use maxproxy_providers::convert::response::anthropic_to_openai_response;
use maxproxy_providers::convert::stream::convert_anthropic_stream;
use maxproxy_providers::{ChatCompletionRequest, ProviderError, StreamTracer};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{auth_required, openai_error, short_request_id, sse_response, upstream_status};
use crate::app::AppState;

/// POST /v1/chat/completions.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Response {
    let request_id = short_request_id();

    if body.is_object() && body.get("model").is_none() {
        body["model"] = json!(state.config.default_model);
    }

    let request: ChatCompletionRequest = match serde_json::from_value(body.clone()) {
        Ok(request) => request,
        Err(e) => {
            return openai_error(
                StatusCode::BAD_REQUEST,
                &format!("invalid request: {e}"),
                "invalid_request_error",
            );
        }
    };

    if let Some(custom) = state.registry.custom_config(&request.model) {
        info!(request_id, model = %request.model, "routing to custom provider");
        let custom = custom.clone();
        return custom_provider_route(state, request_id, body, request.stream, custom).await;
    }

    let resolved = state.registry.resolve(&request.model);
    match resolved.family {
        ModelFamily::ChatGpt => {
            info!(request_id, model = %request.model, "routing to ChatGPT Responses API");
            chatgpt_route(state, request_id, request, resolved).await
        }
        _ => {
            info!(request_id, model = %request.model, stream = request.stream,
                "routing to Anthropic");
            anthropic_route(state, request_id, request, resolved, headers).await
        }
    }
}

async fn anthropic_route(
    state: Arc<AppState>,
    request_id: String,
    request: ChatCompletionRequest,
    resolved: Resolved,
    headers: HeaderMap,
) -> Response {
    let access_token = match state.anthropic_oauth.valid_access_token().await {
        Ok(token) => token,
        Err(e) => {
            error!(request_id, error = %e, "no valid token available");
            return auth_required();
        }
    };

    let shaped = match prepare_anthropic_request(&request, &resolved, &state.thinking_cache) {
        Ok(shaped) => shaped,
        Err(ProviderError::InvalidRequest(message)) => {
            return openai_error(StatusCode::BAD_REQUEST, &message, "invalid_request_error");
        }
        Err(e) => {
            error!(request_id, error = %e, "request conversion failed");
            return openai_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &e.to_string(),
                "internal_error",
            );
        }
    };
    debug!(request_id, model = %resolved.backend_id, "prepared Anthropic request");

    let client_betas = headers
        .get("anthropic-beta")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if request.stream {
        let tracer = StreamTracer::maybe_create(
            state.config.stream_trace_enabled,
            &request_id,
            "openai-chat",
            &state.config.stream_trace_dir,
            state.config.stream_trace_max_bytes,
        )
        .map(Arc::new);

        let (raw_tx, raw_rx) = mpsc::channel::<String>(64);
        let (out_tx, out_rx) = mpsc::channel::<String>(64);

        let driver_state = state.clone();
        let driver_tracer = tracer.clone();
        let driver_request_id = request_id.clone();
        tokio::spawn(async move {
            driver_state
                .anthropic
                .stream(
                    &driver_request_id,
                    shaped,
                    &access_token,
                    client_betas.as_deref(),
                    driver_tracer,
                    raw_tx,
                )
                .await;
        });

        let cache = state.thinking_cache.clone();
        let model = request.model.clone();
        tokio::spawn(async move {
            convert_anthropic_stream(raw_rx, model, request_id, cache, tracer.clone(), out_tx)
                .await;
            if let Some(tracer) = tracer {
                tracer.close();
            }
        });

        return sse_response(out_rx, &[]);
    }

    match state
        .anthropic
        .invoke(shaped, &access_token, client_betas.as_deref())
        .await
    {
        Ok(response) => {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();

            if status != 200 {
                error!(request_id, status, "Anthropic API error");
                let upstream: Value = serde_json::from_str(&text).unwrap_or_default();
                let message = upstream
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or(if text.is_empty() { "Unknown error" } else { &text });
                let error_type = upstream
                    .pointer("/error/type")
                    .and_then(Value::as_str)
                    .unwrap_or("api_error");
                return openai_error(upstream_status(status), message, error_type);
            }

            match serde_json::from_str::<Value>(&text) {
                Ok(anthropic_response) => {
                    let openai = anthropic_to_openai_response(
                        &anthropic_response,
                        &request.model,
                        &state.thinking_cache,
                    );
                    Json(openai).into_response()
                }
                Err(e) => openai_error(
                    StatusCode::BAD_GATEWAY,
                    &format!("malformed upstream response: {e}"),
                    "api_error",
                ),
            }
        }
        Err(e) => {
            error!(request_id, error = %e, "anthropic request failed");
            openai_error(StatusCode::BAD_GATEWAY, &e.to_string(), "api_error")
        }
    }
}

async fn chatgpt_route(
    state: Arc<AppState>,
    request_id: String,
    request: ChatCompletionRequest,
    resolved: Resolved,
) -> Response {
    let (access_token, account_id) = match state.chatgpt_oauth.valid_credentials().await {
        Ok(credentials) => credentials,
        Err(e) => {
            error!(request_id, error = %e, "no valid ChatGPT credentials");
            return auth_required();
        }
    };
    let Some(account_id) = account_id else {
        return openai_error(
            StatusCode::UNAUTHORIZED,
            "No valid ChatGPT OAuth credentials available",
            "auth_error",
        );
    };

    let effort = request
        .reasoning_effort
        .clone()
        .or_else(|| resolved.reasoning_level.clone());

    if request.stream {
        let tracer = StreamTracer::maybe_create(
            state.config.stream_trace_enabled,
            &request_id,
            "chatgpt",
            &state.config.stream_trace_dir,
            state.config.stream_trace_max_bytes,
        )
        .map(Arc::new);

        let (tx, rx) = mpsc::channel::<String>(64);
        let task_state = state.clone();
        let task_tracer = tracer.clone();
        tokio::spawn(async move {
            task_state
                .chatgpt
                .stream_chat(
                    &request_id,
                    &request,
                    &resolved.backend_id,
                    effort.as_deref(),
                    &access_token,
                    &account_id,
                    task_tracer.clone(),
                    tx,
                )
                .await;
            if let Some(tracer) = task_tracer {
                tracer.close();
            }
        });

        return sse_response(rx, &[("X-Accel-Buffering", "no")]);
    }

    match state
        .chatgpt
        .collect_chat(
            &request_id,
            &request,
            &resolved.backend_id,
            effort.as_deref(),
            &access_token,
            &account_id,
        )
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(ProviderError::Api { status, message }) => {
            let upstream: Value = serde_json::from_str(&message).unwrap_or_default();
            let detail = upstream
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or(&message);
            openai_error(upstream_status(status), detail, "api_error")
        }
        Err(e) => {
            error!(request_id, error = %e, "ChatGPT request failed");
            openai_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("ChatGPT request failed: {e}"),
                "internal_error",
            )
        }
    }
}

async fn custom_provider_route(
    state: Arc<AppState>,
    request_id: String,
    body: Value,
    stream: bool,
    custom: CustomModel,
) -> Response {
    if stream {
        let tracer = StreamTracer::maybe_create(
            state.config.stream_trace_enabled,
            &request_id,
            "custom-provider",
            &state.config.stream_trace_dir,
            state.config.stream_trace_max_bytes,
        )
        .map(Arc::new);

        let (tx, rx) = mpsc::channel::<String>(64);
        let task_state = state.clone();
        let task_tracer = tracer.clone();
        tokio::spawn(async move {
            task_state
                .openai_compat
                .stream(
                    &request_id,
                    &body,
                    &custom.base_url,
                    &custom.api_key,
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
        .openai_compat
        .invoke(&request_id, &body, &custom.base_url, &custom.api_key)
        .await
    {
        Ok(response) => {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();

            if status != 200 {
                error!(request_id, status, "custom provider error");
                let error_body: Value = serde_json::from_str(&text).unwrap_or_else(|_| {
                    json!({ "error": {
                        "message": text,
                        "type": "api_error",
                        "code": status,
                    }})
                });
                return (upstream_status(status), Json(error_body)).into_response();
            }

            match serde_json::from_str::<Value>(&text) {
                Ok(value) => Json(value).into_response(),
                Err(e) => openai_error(
                    StatusCode::BAD_GATEWAY,
                    &format!("malformed upstream response: {e}"),
                    "api_error",
                ),
            }
        }
        Err(e) => {
            error!(request_id, error = %e, "custom provider request failed");
            openai_error(StatusCode::BAD_GATEWAY, &e.to_string(), "api_error")
        }
    }
}
