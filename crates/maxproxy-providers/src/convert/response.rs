//! Anthropic Messages response → OpenAI chat completion.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::convert::content::anthropic_content_to_openai;
use crate::thinking::ThinkingCache;

/// Map an Anthropic stop_reason onto the OpenAI finish_reason vocabulary.
pub fn map_stop_reason(stop_reason: Option<&str>) -> &'static str {
    match stop_reason {
        Some("end_turn") | Some("stop_sequence") => "stop",
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        _ => "stop",
    }
}

/// Convert a non-streaming Anthropic response into an OpenAI
/// chat.completion object.
///
/// Signed thinking blocks accompanying tool calls are written into the
/// thinking cache so the next turn can restore them.
pub fn anthropic_to_openai_response(
    anthropic: &Value,
    model: &str,
    cache: &ThinkingCache,
) -> Value {
    let content = anthropic
        .get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let (text_content, tool_calls, reasoning_content, thinking_blocks) =
        anthropic_content_to_openai(&content);

    cache_signed_thinking(&tool_calls, &thinking_blocks, cache);

    let mut message = Map::new();
    message.insert("role".into(), json!("assistant"));
    message.insert(
        "content".into(),
        text_content.clone().map(Value::String).unwrap_or(Value::Null),
    );
    if !tool_calls.is_empty() {
        message.insert("tool_calls".into(), Value::Array(tool_calls));
    }
    if let Some(reasoning) = &reasoning_content {
        message.insert("reasoning_content".into(), json!(reasoning));
    }
    if !thinking_blocks.is_empty() {
        message.insert("thinking_blocks".into(), Value::Array(thinking_blocks));
    }

    let finish_reason =
        map_stop_reason(anthropic.get("stop_reason").and_then(Value::as_str));

    let usage_in = anthropic
        .pointer("/usage/input_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let usage_out = anthropic
        .pointer("/usage/output_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let mut usage = json!({
        "prompt_tokens": usage_in,
        "completion_tokens": usage_out,
        "total_tokens": usage_in + usage_out,
    });
    if let Some(reasoning) = &reasoning_content {
        // Upstream output_tokens already include thinking; reported
        // separately as a rough chars/4 estimate for transparency.
        let reasoning_tokens = reasoning.len() / 4;
        usage["completion_tokens_details"] = json!({ "reasoning_tokens": reasoning_tokens });
        debug!(chars = reasoning.len(), reasoning_tokens, "extracted reasoning content");
    }

    let response_id = anthropic
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .trim_start_matches("msg_");

    json!({
        "id": format!("chatcmpl-{response_id}"),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": Value::Object(message),
            "finish_reason": finish_reason,
        }],
        "usage": usage,
    })
}

/// Persist the first signed thinking block keyed by every tool-call id.
fn cache_signed_thinking(tool_calls: &[Value], thinking_blocks: &[Value], cache: &ThinkingCache) {
    if tool_calls.is_empty() {
        return;
    }

    let signed = thinking_blocks.iter().find_map(|block| {
        let thinking = block.get("thinking").and_then(Value::as_str)?;
        let signature = block.get("signature").and_then(Value::as_str)?;
        if thinking.is_empty() || signature.trim().is_empty() {
            return None;
        }
        Some(json!({ "type": "thinking", "thinking": thinking, "signature": signature }))
    });

    if let Some(signed) = signed {
        for call in tool_calls {
            if let Some(id) = call.get("id").and_then(Value::as_str) {
                if !id.is_empty() {
                    debug!(tool_use_id = id, "caching signed thinking block");
                    cache.put(id, &signed);
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(map_stop_reason(Some("end_turn")), "stop");
        assert_eq!(map_stop_reason(Some("stop_sequence")), "stop");
        assert_eq!(map_stop_reason(Some("max_tokens")), "length");
        assert_eq!(map_stop_reason(Some("tool_use")), "tool_calls");
        assert_eq!(map_stop_reason(Some("anything_else")), "stop");
        assert_eq!(map_stop_reason(None), "stop");
    }

    #[test]
    fn text_response_maps_to_openai_shape() {
        let cache = ThinkingCache::new();
        let anthropic = json!({
            "id": "msg_0123",
            "content": [{ "type": "text", "text": "pong" }],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 10, "output_tokens": 2 },
        });
        let openai = anthropic_to_openai_response(&anthropic, "sonnet-4-5", &cache);

        assert_eq!(openai["id"], "chatcmpl-0123");
        assert_eq!(openai["choices"][0]["message"]["content"], "pong");
        assert_eq!(openai["choices"][0]["finish_reason"], "stop");
        assert_eq!(openai["usage"]["prompt_tokens"], json!(10));
        assert_eq!(openai["usage"]["completion_tokens"], json!(2));
        assert_eq!(openai["usage"]["total_tokens"], json!(12));
    }

    #[test]
    fn tool_use_response_maps_to_tool_calls() {
        let cache = ThinkingCache::new();
        let anthropic = json!({
            "id": "msg_1",
            "content": [
                { "type": "tool_use", "id": "toolu_1", "name": "get_weather",
                  "input": { "city": "Berlin" } }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 5, "output_tokens": 7 },
        });
        let openai = anthropic_to_openai_response(&anthropic, "sonnet-4-5", &cache);

        let call = &openai["choices"][0]["message"]["tool_calls"][0];
        assert_eq!(call["id"], "toolu_1");
        assert_eq!(call["function"]["name"], "get_weather");
        let args: Value =
            serde_json::from_str(call["function"]["arguments"].as_str().unwrap()).unwrap();
        assert_eq!(args["city"], "Berlin");
        assert_eq!(openai["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn signed_thinking_with_tool_calls_is_cached() {
        let cache = ThinkingCache::new();
        let anthropic = json!({
            "id": "msg_2",
            "content": [
                { "type": "thinking", "thinking": "let me check", "signature": "sig_abc" },
                { "type": "tool_use", "id": "toolu_9", "name": "f", "input": {} }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 1, "output_tokens": 1 },
        });
        let openai = anthropic_to_openai_response(&anthropic, "m", &cache);

        let cached = cache.get("toolu_9").unwrap();
        assert_eq!(cached["signature"], "sig_abc");

        // reasoning is surfaced on the message too
        let message = &openai["choices"][0]["message"];
        assert_eq!(message["reasoning_content"], "let me check");
        assert_eq!(message["thinking_blocks"].as_array().unwrap().len(), 1);
        assert!(openai["usage"]["completion_tokens_details"]["reasoning_tokens"].is_u64());
    }

    #[test]
    fn unsigned_thinking_is_not_cached() {
        let cache = ThinkingCache::new();
        let anthropic = json!({
            "id": "msg_3",
            "content": [
                { "type": "thinking", "thinking": "unsigned" },
                { "type": "tool_use", "id": "toolu_10", "name": "f", "input": {} }
            ],
            "stop_reason": "tool_use",
            "usage": {},
        });
        anthropic_to_openai_response(&anthropic, "m", &cache);
        assert!(cache.get("toolu_10").is_none());
    }
}
