use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::short_request_id;

#[derive(Deserialize)]
pub struct CountTokensRequest {
    pub model: String,
    pub messages: Vec<Value>,
    #[serde(default)]
    pub system: Option<Value>,
    #[serde(default)]
    pub tools: Option<Value>,
}

fn content_chars(content: Option<&Value>) -> usize {
    match content {
        Some(Value::String(s)) => s.len(),
        Some(value @ Value::Array(_)) => value.to_string().len(),
        Some(Value::Null) | None => 0,
        Some(other) => other.to_string().len(),
    }
}

/// POST /v1/messages/count_tokens (and the /v1/beta alias).
///
/// Local heuristic only: roughly 4 characters per token across the
/// serialized content, minimum 1. No upstream call is made.
pub async fn count_tokens_handler(Json(request): Json<CountTokensRequest>) -> Json<Value> {
    let request_id = short_request_id();
    debug!(request_id, model = %request.model, "count tokens request");

    let mut total_chars = 0;
    for message in &request.messages {
        total_chars += content_chars(message.get("content"));
    }
    total_chars += content_chars(request.system.as_ref());
    if let Some(tools) = &request.tools {
        total_chars += tools.to_string().len();
    }

    let estimated = std::cmp::max(1, total_chars / 4);
    debug!(request_id, total_chars, estimated, "estimated token count");

    Json(json!({ "input_tokens": estimated }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn estimates_roughly_four_chars_per_token() {
        let request: CountTokensRequest = serde_json::from_value(json!({
            "model": "sonnet-4-5",
            "messages": [{ "role": "user", "content": "a".repeat(400) }],
        }))
        .unwrap();
        let Json(result) = count_tokens_handler(Json(request)).await;
        assert_eq!(result["input_tokens"], json!(100));
    }

    #[tokio::test]
    async fn empty_request_counts_at_least_one_token() {
        let request: CountTokensRequest = serde_json::from_value(json!({
            "model": "sonnet-4-5",
            "messages": [],
        }))
        .unwrap();
        let Json(result) = count_tokens_handler(Json(request)).await;
        assert_eq!(result["input_tokens"], json!(1));
    }

    #[tokio::test]
    async fn block_content_and_tools_are_serialized_for_counting() {
        let request: CountTokensRequest = serde_json::from_value(json!({
            "model": "sonnet-4-5",
            "messages": [
                { "role": "user", "content": [{ "type": "text", "text": "hello" }] }
            ],
            "system": "be brief",
            "tools": [{ "name": "f", "input_schema": {} }],
        }))
        .unwrap();
        let Json(result) = count_tokens_handler(Json(request)).await;
        assert!(result["input_tokens"].as_u64().unwrap() > 1);
    }
}
