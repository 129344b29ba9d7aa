//! OpenAI Responses API front door (ChatGPT Codex path).

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use maxproxy_providers::{ProviderError, ResponsesRequest};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::{auth_required, openai_error, short_request_id, sse_response, upstream_status};
use crate::app::AppState;

/// POST /v1/responses.
pub async fn responses_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    let request_id = short_request_id();

    let request: ResponsesRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return openai_error(
                StatusCode::BAD_REQUEST,
                &format!("invalid request: {e}"),
                "invalid_request_error",
            );
        }
    };

    let stream = request.stream.unwrap_or(false);
    info!(request_id, model = %request.model, stream, "responses API request");

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

    let resolved = state.registry.resolve(&request.model);
    let effort = resolved.reasoning_level.clone();

    // Open before streaming so upstream failures become HTTP errors.
    let upstream = match state
        .chatgpt
        .open_responses(
            &request_id,
            &request,
            &resolved.backend_id,
            effort.as_deref(),
            &access_token,
            &account_id,
        )
        .await
    {
        Ok(upstream) => upstream,
        Err(ProviderError::Api { status, message }) => {
            return openai_error(
                upstream_status(status),
                &format!("Codex API error: {message}"),
                "api_error",
            );
        }
        Err(ProviderError::Http(e)) if e.is_timeout() => {
            return openai_error(StatusCode::GATEWAY_TIMEOUT, "Request timeout", "timeout_error");
        }
        Err(e) => {
            error!(request_id, error = %e, "Codex request failed");
            return openai_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &e.to_string(),
                "internal_error",
            );
        }
    };

    if stream {
        let (tx, rx) = mpsc::channel::<String>(64);
        let task_state = state.clone();
        tokio::spawn(async move {
            task_state
                .chatgpt
                .pump_responses(&request_id, upstream, tx)
                .await;
        });
        return sse_response(rx, &[]);
    }

    match state
        .chatgpt
        .collect_responses(&request_id, upstream, &resolved.backend_id)
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(ProviderError::Api { status, message }) => {
            openai_error(upstream_status(status), &message, "api_error")
        }
        Err(ProviderError::Http(e)) if e.is_timeout() => {
            openai_error(StatusCode::GATEWAY_TIMEOUT, "Request timeout", "timeout_error")
        }
        Err(e) => {
            error!(request_id, error = %e, "Codex collect failed");
            openai_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &e.to_string(),
                "internal_error",
            )
        }
    }
}
