//! HTTP route handlers and shared response helpers.

pub mod chat_completions;
pub mod count_tokens;
pub mod health;
pub mod messages;
pub mod models;
pub mod responses;

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::sync::mpsc;

/// Short random id attached to every log line of a request.
pub(crate) fn short_request_id() -> String {
    let id = uuid::Uuid::new_v4().to_string();
    id[..8].to_string()
}

/// Error envelope in the OpenAI dialect.
pub(crate) fn openai_error(status: StatusCode, message: &str, error_type: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
            }
        })),
    )
        .into_response()
}

/// Error envelope in the Anthropic dialect.
pub(crate) fn anthropic_error(status: StatusCode, error_type: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": { "type": error_type, "message": message }
        })),
    )
        .into_response()
}

/// 401 for missing or expired proxy credentials.
pub(crate) fn auth_required() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": { "message": "OAuth expired; please authenticate using the CLI" }
        })),
    )
        .into_response()
}

/// Wrap a channel of pre-formatted SSE strings as a streaming response.
pub(crate) fn sse_response(
    mut rx: mpsc::Receiver<String>,
    extra_headers: &[(&'static str, &'static str)],
) -> Response {
    let stream = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<_, std::convert::Infallible>(Bytes::from(chunk));
        }
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive");
    for (name, value) in extra_headers {
        builder = builder.header(*name, *value);
    }

    match builder.body(Body::from_stream(stream)) {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Upstream status passthrough helper.
pub(crate) fn upstream_status(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
}
