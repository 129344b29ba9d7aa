//! Anthropic SSE stream → OpenAI chunked-delta stream.
//!
//! Text and reasoning deltas pass through unbuffered. Tool-call argument
//! fragments (`input_json_delta`) are buffered and released as ONE chunk at
//! `content_block_stop`: clients parse `arguments` eagerly, and a partial
//! JSON prefix like `{"name": "A"` parses as a complete-but-wrong value.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::convert::response::map_stop_reason;
use crate::sse::{SseEvent, SseParser};
use crate::thinking::ThinkingCache;
use crate::trace::StreamTracer;

/// Stream terminator; emitted exactly once on every path.
pub const DONE_CHUNK: &str = "data: [DONE]\n\n";

struct ToolCallState {
    openai_index: usize,
    id: String,
    name: String,
    arguments: String,
}

struct ThinkingAccum {
    thinking: String,
    signature: Option<String>,
}

struct StreamState {
    completion_id: String,
    created: i64,
    model: String,
    request_id: String,
    /// Anthropic content-block index → OpenAI tool-call state.
    tool_states: HashMap<u64, ToolCallState>,
    next_tool_index: usize,
    /// Anthropic content-block index → thinking accumulator.
    thinking_accums: HashMap<u64, ThinkingAccum>,
    /// tool_use ids seen this turn, for the thinking-cache write.
    tool_use_ids: Vec<String>,
}

impl StreamState {
    fn new(model: String, request_id: String) -> Self {
        let created = chrono::Utc::now().timestamp();
        Self {
            completion_id: format!("chatcmpl-{created}"),
            created,
            model,
            request_id,
            tool_states: HashMap::new(),
            next_tool_index: 0,
            thinking_accums: HashMap::new(),
            tool_use_ids: Vec::new(),
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> String {
        let payload = json!({
            "id": self.completion_id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        });
        format!("data: {payload}\n\n")
    }

    fn tool_call_chunk(&self, state: &ToolCallState, arguments: &str) -> String {
        self.chunk(
            json!({
                "tool_calls": [{
                    "index": state.openai_index,
                    "id": state.id,
                    "type": "function",
                    "function": { "name": state.name, "arguments": arguments },
                }]
            }),
            None,
        )
    }

    /// Handle one parsed SSE frame. Returns emitted chunks plus whether the
    /// stream is finished.
    fn handle_event(&mut self, event: &SseEvent, cache: &ThinkingCache) -> (Vec<String>, bool) {
        let mut out = Vec::new();
        let event_name = event.event.as_deref().unwrap_or("").trim();
        let raw = event.data.trim();

        if raw.is_empty() || event_name == "ping" {
            return (out, false);
        }

        let data: Value = match serde_json::from_str(raw) {
            Ok(d) => d,
            Err(_) => {
                warn!(request_id = %self.request_id, "failed to decode SSE data");
                return (out, false);
            }
        };
        let data_type = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(event_name);

        match data_type {
            "ping" => {}

            "message_start" => {
                out.push(self.chunk(json!({ "role": "assistant", "content": "" }), None));
            }

            "content_block_start" => {
                let block = data.get("content_block").cloned().unwrap_or_default();
                let block_type = block.get("type").and_then(Value::as_str).unwrap_or("");
                let index = data.get("index").and_then(Value::as_u64);

                if block_type == "tool_use" {
                    let Some(index) = index else {
                        warn!(request_id = %self.request_id, "tool_use block missing index");
                        return (out, false);
                    };
                    let id = block
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let state = ToolCallState {
                        openai_index: self.next_tool_index,
                        id: id.clone(),
                        name: block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        arguments: String::new(),
                    };
                    self.next_tool_index += 1;

                    // Announce the call now; arguments follow atomically at
                    // content_block_stop.
                    out.push(self.tool_call_chunk(&state, ""));
                    self.tool_states.insert(index, state);
                    if !id.is_empty() {
                        self.tool_use_ids.push(id);
                    }
                } else if block_type == "thinking" || block_type == "redacted_thinking" {
                    if let Some(index) = index {
                        self.thinking_accums.insert(
                            index,
                            ThinkingAccum {
                                thinking: String::new(),
                                signature: block
                                    .get("signature")
                                    .and_then(Value::as_str)
                                    .map(str::to_string),
                            },
                        );
                    }
                }
            }

            "content_block_delta" => {
                let delta = data.get("delta").cloned().unwrap_or_default();
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        if let Some(text) = delta.get("text").and_then(Value::as_str) {
                            if !text.is_empty() {
                                out.push(self.chunk(json!({ "content": text }), None));
                            }
                        }
                    }
                    Some("input_json_delta") => {
                        let Some(index) = data.get("index").and_then(Value::as_u64) else {
                            warn!(request_id = %self.request_id, "input_json_delta missing index");
                            return (out, false);
                        };
                        match self.tool_states.get_mut(&index) {
                            Some(state) => {
                                if let Some(partial) =
                                    delta.get("partial_json").and_then(Value::as_str)
                                {
                                    state.arguments.push_str(partial);
                                }
                            }
                            None => {
                                warn!(
                                    request_id = %self.request_id,
                                    index, "input_json_delta for unknown tool index"
                                );
                            }
                        }
                    }
                    Some("thinking_delta") | Some("redacted_thinking_delta") => {
                        let Some(index) = data.get("index").and_then(Value::as_u64) else {
                            debug!(request_id = %self.request_id, "thinking delta missing index");
                            return (out, false);
                        };
                        let text = delta
                            .get("text")
                            .or_else(|| delta.get("thinking"))
                            .or_else(|| delta.get("partial_text"))
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        if !text.is_empty() {
                            out.push(self.chunk(json!({ "reasoning_content": text }), None));
                            let accum =
                                self.thinking_accums.entry(index).or_insert(ThinkingAccum {
                                    thinking: String::new(),
                                    signature: None,
                                });
                            accum.thinking.push_str(text);
                        }
                    }
                    other => {
                        debug!(request_id = %self.request_id, ?other, "unhandled delta type");
                    }
                }
            }

            "content_block_stop" => {
                if let Some(index) = data.get("index").and_then(Value::as_u64) {
                    if let Some(state) = self.tool_states.remove(&index) {
                        if !state.arguments.is_empty() {
                            debug!(
                                request_id = %self.request_id,
                                len = state.arguments.len(),
                                "tool block stopped, emitting complete arguments"
                            );
                            out.push(self.tool_call_chunk(&state, &state.arguments));
                        }
                    }
                }
            }

            "message_delta" => {
                let stop_reason = data
                    .pointer("/delta/stop_reason")
                    .and_then(Value::as_str);
                if let Some(stop_reason) = stop_reason {
                    let finish_reason = map_stop_reason(Some(stop_reason));
                    out.push(self.chunk(json!({}), Some(finish_reason)));
                }
            }

            "message_stop" => {
                self.persist_signed_thinking(cache);
                return (out, true);
            }

            "error" => {
                let error_value = data.get("error").cloned().unwrap_or_default();
                let payload = match &error_value {
                    Value::String(message) => {
                        json!({ "error": { "message": message, "type": "api_error" } })
                    }
                    Value::Object(obj) => json!({ "error": {
                        "message": obj.get("message").and_then(Value::as_str).unwrap_or("Unknown error"),
                        "type": obj.get("type").and_then(Value::as_str).unwrap_or("api_error"),
                    }}),
                    other => json!({ "error": {
                        "message": other.to_string(),
                        "type": "api_error",
                    }}),
                };
                warn!(request_id = %self.request_id, "upstream stream error event");
                out.push(format!("data: {payload}\n\n"));
                return (out, true);
            }

            _ => {}
        }

        (out, false)
    }

    /// At message_stop: store the first signed thinking block under every
    /// tool_use id of this turn so the next request can restore it.
    fn persist_signed_thinking(&mut self, cache: &ThinkingCache) {
        let signed = self.thinking_accums.values().find_map(|accum| {
            let signature = accum.signature.as_deref()?;
            if accum.thinking.is_empty() || signature.trim().is_empty() {
                return None;
            }
            Some(json!({
                "type": "thinking",
                "thinking": accum.thinking,
                "signature": signature,
            }))
        });

        match (&signed, self.tool_use_ids.is_empty()) {
            (Some(block), false) => {
                for id in &self.tool_use_ids {
                    debug!(request_id = %self.request_id, tool_use_id = %id,
                        "caching signed thinking block");
                    cache.put(id, block);
                }
            }
            (Some(_), true) => {
                debug!(request_id = %self.request_id,
                    "signed thinking present but no tool_use ids to key it with");
            }
            (None, false) => {
                debug!(request_id = %self.request_id,
                    "tool_use ids present but no signed thinking block to cache");
            }
            (None, true) => {}
        }

        self.tool_use_ids.clear();
        self.thinking_accums.clear();
    }
}

/// Convert a raw Anthropic SSE stream into OpenAI chat.completion.chunk
/// frames, terminated by a single `[DONE]`.
///
/// `upstream` carries raw SSE text chunks from the driver (including any
/// synthetic error frames). Emission stops early when the client side of
/// `tx` is dropped.
pub async fn convert_anthropic_stream(
    mut upstream: mpsc::Receiver<String>,
    model: String,
    request_id: String,
    cache: Arc<ThinkingCache>,
    tracer: Option<Arc<StreamTracer>>,
    tx: mpsc::Sender<String>,
) {
    let mut parser = SseParser::new();
    let mut state = StreamState::new(model, request_id);

    'receive: while let Some(chunk) = upstream.recv().await {
        for event in parser.feed(&chunk) {
            let (chunks, finished) = state.handle_event(&event, &cache);
            for converted in chunks {
                if let Some(tracer) = &tracer {
                    tracer.log_converted_chunk(&converted);
                }
                if tx.send(converted).await.is_err() {
                    // Client disconnected; drop the upstream receiver so the
                    // driver stops promptly.
                    return;
                }
            }
            if finished {
                break 'receive;
            }
        }
    }

    if let Some(tracer) = &tracer {
        tracer.log_converted_chunk(DONE_CHUNK);
    }
    let _ = tx.send(DONE_CHUNK.to_string()).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
