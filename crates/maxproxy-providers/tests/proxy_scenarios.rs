//! End-to-end shaping and streaming scenarios across the converter pipeline.

use std::sync::Arc;

use maxproxy_models::ModelRegistry;
use maxproxy_providers::convert::request::prepare_anthropic_request;
use maxproxy_providers::convert::stream::{convert_anthropic_stream, DONE_CHUNK};
use maxproxy_providers::shape;
use maxproxy_providers::{ChatCompletionRequest, SseEvent, SseParser, ThinkingCache};
use serde_json::{json, Value};
use tokio::sync::mpsc;

fn chat_request(body: Value) -> ChatCompletionRequest {
    serde_json::from_value(body).unwrap()
}

fn registry() -> ModelRegistry {
    ModelRegistry::new(Vec::new())
}

#[test]
fn echo_chat_shapes_for_anthropic() {
    let cache = ThinkingCache::new();
    let request = chat_request(json!({
        "model": "sonnet-4-5",
        "messages": [{ "role": "user", "content": "ping" }],
        "stream": false,
    }));
    let resolved = registry().resolve("sonnet-4-5");
    let shaped = prepare_anthropic_request(&request, &resolved, &cache).unwrap();

    assert_eq!(shaped["model"], "claude-sonnet-4-5-20250929");
    assert!(shaped.get("max_tokens").is_some());
    assert!(shaped.get("top_k").is_none());
    assert_eq!(
        shaped["system"][0]["text"],
        "You are Claude Code, Anthropic's official CLI for Claude."
    );
}

#[test]
fn reasoning_variant_budget_and_constraints() {
    let cache = ThinkingCache::new();
    let request = chat_request(json!({
        "model": "sonnet-4-5-reasoning-high",
        "messages": [{ "role": "user", "content": "think" }],
        "max_tokens": 1000,
    }));
    let resolved = registry().resolve("sonnet-4-5-reasoning-high");
    let shaped = prepare_anthropic_request(&request, &resolved, &cache).unwrap();

    assert_eq!(shaped["model"], "claude-sonnet-4-5-20250929");
    assert_eq!(shaped["thinking"], json!({ "type": "enabled", "budget_tokens": 32000 }));
    assert_eq!(shaped["max_tokens"], json!(33024));
    assert_eq!(shaped["temperature"], json!(1.0));
    assert!(shaped.get("top_k").is_none());
}

#[test]
fn one_m_variant_streaming_beta_headers() {
    let cache = ThinkingCache::new();
    let request = chat_request(json!({
        "model": "sonnet-4-5-1m",
        "messages": [{ "role": "user", "content": "long context" }],
        "stream": true,
    }));
    let resolved = registry().resolve("sonnet-4-5-1m");
    let shaped = prepare_anthropic_request(&request, &resolved, &cache).unwrap();

    let betas = shape::build_beta_headers(&shaped, None, true);
    assert!(betas.contains("oauth-2025-04-20"));
    assert!(betas.contains("context-1m-2025-08-07"));
}

#[test]
fn sse_parser_chunking_is_boundary_independent() {
    let mut parser = SseParser::new();
    let mut events = Vec::new();
    for chunk in ["event: x\nda", "ta: a\nda", "ta: b\n\n"] {
        events.extend(parser.feed(chunk));
    }
    events.extend(parser.flush());

    assert_eq!(
        events,
        vec![SseEvent {
            event: Some("x".to_string()),
            data: "a\nb".to_string(),
        }]
    );
}

/// Tool-use round-trip with signed thinking: turn 1 streams thinking +
/// tool_use (arguments atomic), the cache learns the signed block, and turn
/// 2 re-prepends it so thinking can stay enabled.
#[tokio::test]
async fn signed_thinking_round_trip() {
    let cache = Arc::new(ThinkingCache::new());

    // Turn 1: upstream emits signed thinking then a tool_use.
    let frames = [
        "event: message_start\ndata: {\"type\":\"message_start\"}\n\n",
        "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"signature\":\"sig_abc\"}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"look up weather\"}}\n\n",
        "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"get_weather\"}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"city\\\":\\\"Berlin\\\"}\"}}\n\n",
        "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":1}\n\n",
        "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"}}\n\n",
        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    ];

    let (up_tx, up_rx) = mpsc::channel(32);
    let (down_tx, mut down_rx) = mpsc::channel(32);
    for frame in frames {
        up_tx.send(frame.to_string()).await.unwrap();
    }
    drop(up_tx);
    convert_anthropic_stream(
        up_rx,
        "sonnet-4-5-reasoning-high".to_string(),
        "turn1".to_string(),
        cache.clone(),
        None,
        down_tx,
    )
    .await;

    let mut chunks = Vec::new();
    while let Some(chunk) = down_rx.recv().await {
        chunks.push(chunk);
    }

    // arguments arrive exactly once, complete
    let argument_payloads: Vec<String> = chunks
        .iter()
        .filter(|c| *c != DONE_CHUNK)
        .filter_map(|c| {
            let v: Value = serde_json::from_str(c.strip_prefix("data: ")?.trim()).ok()?;
            let args = v["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"]
                .as_str()?
                .to_string();
            if args.is_empty() {
                None
            } else {
                Some(args)
            }
        })
        .collect();
    assert_eq!(argument_payloads, vec!["{\"city\":\"Berlin\"}".to_string()]);

    // the cache learned the signed block for the tool id
    assert_eq!(cache.get("toolu_1").unwrap()["signature"], "sig_abc");

    // Turn 2: the client replays the assistant tool_use without thinking;
    // the shaper restores the cached block and keeps thinking enabled.
    let request = chat_request(json!({
        "model": "sonnet-4-5-reasoning-high",
        "messages": [
            { "role": "user", "content": "weather in Berlin?" },
            { "role": "assistant", "content": Value::Null, "tool_calls": [{
                "id": "toolu_1", "type": "function",
                "function": { "name": "get_weather", "arguments": "{\"city\":\"Berlin\"}" }
            }]},
            { "role": "tool", "tool_call_id": "toolu_1", "content": "{\"temp\": 5}" },
        ],
        "max_tokens": 1000,
    }));
    let resolved = registry().resolve("sonnet-4-5-reasoning-high");
    let shaped = prepare_anthropic_request(&request, &resolved, &cache).unwrap();

    let assistant = shaped["messages"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["role"] == "assistant")
        .unwrap();
    assert_eq!(assistant["content"][0]["type"], "thinking");
    assert_eq!(assistant["content"][0]["signature"], "sig_abc");
    assert_eq!(shaped["thinking"]["type"], "enabled");
}

/// Without a cached block the same turn-2 request must disable thinking —
/// and never drop messages.
#[test]
fn thinking_disabled_when_cache_cannot_help() {
    let cache = ThinkingCache::new();
    let request = chat_request(json!({
        "model": "sonnet-4-5-reasoning-high",
        "messages": [
            { "role": "user", "content": "q" },
            { "role": "assistant", "content": Value::Null, "tool_calls": [{
                "id": "toolu_unseen", "type": "function",
                "function": { "name": "f", "arguments": "{}" }
            }]},
            { "role": "tool", "tool_call_id": "toolu_unseen", "content": "ok" },
        ],
        "max_tokens": 500,
    }));
    let resolved = registry().resolve("sonnet-4-5-reasoning-high");
    let shaped = prepare_anthropic_request(&request, &resolved, &cache).unwrap();

    assert!(shaped.get("thinking").is_none());
    // tool linkage intact: the tool_use and its tool_result both survive
    let messages = shaped["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1]["content"][0]["type"], "tool_use");
    assert_eq!(messages[2]["content"][0]["type"], "tool_result");
}

#[test]
fn sanitize_idempotence_on_shaped_requests() {
    let cache = ThinkingCache::new();
    let request = chat_request(json!({
        "model": "sonnet-4-5",
        "messages": [{ "role": "user", "content": "q" }],
        "temperature": 0.3,
        "top_p": 0.8,
    }));
    let resolved = registry().resolve("sonnet-4-5");
    let mut shaped = prepare_anthropic_request(&request, &resolved, &cache).unwrap();

    let once = shaped.clone();
    shape::sanitize(&mut shaped);
    assert_eq!(shaped, once);
}
