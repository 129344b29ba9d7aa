//! OpenAI Chat Completions ↔ OpenAI Responses (ChatGPT Codex backend).
//!
//! The Codex backend only speaks the Responses dialect, always streams, and
//! runs stateless (`store: false`). Chat requests are reshaped into `input`
//! items; Responses events are translated back into chat chunks, or
//! collected into one object when the inbound client asked non-streaming.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::types::{ChatCompletionRequest, ResponsesRequest};

/// Default instructions sent when the client provides none; the Codex
/// backend rejects requests without instructions.
pub const DEFAULT_INSTRUCTIONS: &str = "You are an expert AI assistant specialized in software \
development and coding tasks. Provide clear, accurate, and well-structured code solutions. \
Follow best practices and explain your reasoning when appropriate.";

const EFFORT_LEVELS: &[&str] = &["minimal", "low", "medium", "high"];
const SUMMARY_LEVELS: &[&str] = &["auto", "concise", "detailed", "none"];

/// Convert OpenAI chat messages into Responses `input` items.
///
/// System messages are skipped (they ride separately as `instructions`);
/// tool results become `function_call_output` items and assistant tool calls
/// become `function_call` items.
pub fn chat_messages_to_responses_input(messages: &[Value]) -> Vec<Value> {
    let mut items = Vec::new();

    for message in messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("");

        if role == "system" {
            continue;
        }

        if role == "tool" {
            let call_id = message
                .get("tool_call_id")
                .or_else(|| message.get("id"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if call_id.is_empty() {
                continue;
            }
            let output = flatten_tool_output(message.get("content"));
            items.push(json!({
                "type": "function_call_output",
                "call_id": call_id,
                "output": output,
            }));
            continue;
        }

        if role == "assistant" {
            if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
                for call in tool_calls {
                    if call.get("type").and_then(Value::as_str).unwrap_or("function")
                        != "function"
                    {
                        continue;
                    }
                    let call_id = call
                        .get("id")
                        .or_else(|| call.get("call_id"))
                        .and_then(Value::as_str);
                    let name = call.pointer("/function/name").and_then(Value::as_str);
                    let arguments = call.pointer("/function/arguments").and_then(Value::as_str);
                    if let (Some(call_id), Some(name), Some(arguments)) =
                        (call_id, name, arguments)
                    {
                        items.push(json!({
                            "type": "function_call",
                            "name": name,
                            "arguments": arguments,
                            "call_id": call_id,
                        }));
                    }
                }
            }
        }

        let content_items = message_content_items(message.get("content"), role);
        if content_items.is_empty() {
            continue;
        }

        let role_out = if role == "assistant" { "assistant" } else { "user" };
        items.push(json!({
            "type": "message",
            "role": role_out,
            "content": content_items,
        }));
    }

    items
}

fn message_content_items(content: Option<&Value>, role: &str) -> Vec<Value> {
    let text_kind = if role == "assistant" {
        "output_text"
    } else {
        "input_text"
    };
    let mut items = Vec::new();

    match content {
        Some(Value::String(text)) if !text.is_empty() => {
            items.push(json!({ "type": text_kind, "text": text }));
        }
        Some(Value::Array(parts)) => {
            for part in parts {
                match part.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        let text = part
                            .get("text")
                            .or_else(|| part.get("content"))
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        if !text.is_empty() {
                            items.push(json!({ "type": text_kind, "text": text }));
                        }
                    }
                    Some("image_url") => {
                        let url = match part.get("image_url") {
                            Some(Value::Object(obj)) => {
                                obj.get("url").and_then(Value::as_str).unwrap_or_default()
                            }
                            Some(Value::String(s)) => s.as_str(),
                            _ => "",
                        };
                        if !url.is_empty() {
                            items.push(json!({
                                "type": "input_image",
                                "image_url": normalize_image_data_url(url),
                            }));
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }

    items
}

fn flatten_tool_output(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| {
                    part.get("text")
                        .or_else(|| part.get("content"))
                        .and_then(Value::as_str)
                })
                .filter(|t| !t.is_empty())
                .collect();
            texts.join("\n")
        }
        _ => String::new(),
    }
}

/// Re-pad and clean a base64 image data-URL. Invalid payloads are returned
/// unchanged; the backend produces the real error.
pub fn normalize_image_data_url(url: &str) -> String {
    if !url.starts_with("data:image/") {
        return url.to_string();
    }
    let Some((header, data)) = url.split_once(";base64,") else {
        return url.to_string();
    };

    let mut cleaned: String = data
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while cleaned.len() % 4 != 0 {
        cleaned.push('=');
    }

    if BASE64_STANDARD.decode(cleaned.as_bytes()).is_err() {
        return url.to_string();
    }
    format!("{header};base64,{cleaned}")
}

/// Convert OpenAI tool definitions into the flat Responses tool shape.
pub fn tools_chat_to_responses(tools: &Value) -> Vec<Value> {
    let Some(tools) = tools.as_array() else {
        return Vec::new();
    };

    tools
        .iter()
        .filter_map(|tool| {
            if tool.get("type").and_then(Value::as_str) != Some("function") {
                return None;
            }
            let function = tool.get("function")?;
            let name = function.get("name").and_then(Value::as_str)?;
            if name.is_empty() {
                return None;
            }
            let parameters = function
                .get("parameters")
                .filter(|p| p.is_object())
                .cloned()
                .unwrap_or_else(|| json!({ "type": "object", "properties": {} }));
            Some(json!({
                "type": "function",
                "name": name,
                "description": function
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
                "strict": false,
                "parameters": parameters,
            }))
        })
        .collect()
}

fn validated_reasoning(effort: Option<&str>, summary: Option<&str>) -> Value {
    let effort = effort
        .filter(|e| EFFORT_LEVELS.contains(e))
        .unwrap_or("medium");
    let summary = summary
        .filter(|s| SUMMARY_LEVELS.contains(s))
        .unwrap_or("auto");

    let mut reasoning = Map::new();
    reasoning.insert("effort".to_string(), json!(effort));
    if summary != "none" {
        reasoning.insert("summary".to_string(), json!(summary));
    }
    Value::Object(reasoning)
}

/// Build the Codex payload for an inbound chat-completions request.
///
/// Always `store: false` and `stream: true` on the wire — the backend
/// refuses anything else; non-streaming clients get the collect path.
pub fn build_codex_chat_payload(
    request: &ChatCompletionRequest,
    backend_id: &str,
    effort: Option<&str>,
    session_id: &str,
) -> Value {
    let input_items = chat_messages_to_responses_input(&request.messages);
    let tools = request
        .tools
        .as_ref()
        .map(tools_chat_to_responses)
        .unwrap_or_default();

    let tool_choice = request
        .tool_choice
        .as_ref()
        .and_then(Value::as_str)
        .filter(|c| *c == "auto" || *c == "none")
        .unwrap_or("auto");

    let mut payload = json!({
        "model": backend_id,
        "input": input_items,
        "tools": tools,
        "tool_choice": tool_choice,
        "parallel_tool_calls": request.parallel_tool_calls.unwrap_or(false),
        "store": false,
        "stream": true,
        "prompt_cache_key": session_id,
        "instructions": DEFAULT_INSTRUCTIONS,
    });

    if effort.is_some() || request.reasoning_summary.is_some() {
        payload["reasoning"] =
            validated_reasoning(effort, request.reasoning_summary.as_deref());
        payload["include"] = json!(["reasoning.encrypted_content"]);
    }

    payload
}

/// Build the Codex payload for an inbound Responses-API request
/// (`/v1/responses` front door). Client-provided reasoning/text settings
/// pass through; `store`/`stream` are still forced.
pub fn build_codex_responses_payload(
    request: &ResponsesRequest,
    backend_id: &str,
    effort: Option<&str>,
) -> Value {
    let input_items = match &request.input {
        Some(Value::String(text)) => vec![json!({
            "type": "message",
            "role": "user",
            "content": [{ "type": "input_text", "text": text }],
        })],
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };

    let mut payload = json!({
        "model": backend_id,
        "input": input_items,
        "store": false,
        "stream": true,
    });

    payload["instructions"] = match request.instructions.as_deref() {
        Some(instructions) if !instructions.trim().is_empty() => json!(instructions),
        _ => json!(DEFAULT_INSTRUCTIONS),
    };

    if let Some(tools) = &request.tools {
        payload["tools"] = tools.clone();
    }
    if let Some(tool_choice) = &request.tool_choice {
        payload["tool_choice"] = tool_choice.clone();
    }

    payload["reasoning"] = match &request.reasoning {
        Some(reasoning) => reasoning.clone(),
        None => validated_reasoning(effort, None),
    };
    if let Some(text) = &request.text {
        payload["text"] = text.clone();
    }
    payload["include"] = json!(["reasoning.encrypted_content"]);

    payload
}

/// Translate one Responses event into an OpenAI chat chunk. `None` when the
/// event carries nothing the chat dialect can express.
pub fn translate_response_event(
    event: &Value,
    response_id: &str,
    created: i64,
    model: &str,
) -> Option<Value> {
    let kind = event.get("type").and_then(Value::as_str)?;

    let chunk = |delta: Value, finish_reason: Option<&str>| {
        json!({
            "id": response_id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": model,
            "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }],
        })
    };

    match kind {
        "response.output_text.delta" => {
            let delta = event.get("delta").and_then(Value::as_str).unwrap_or_default();
            Some(chunk(json!({ "content": delta }), None))
        }

        "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => {
            let delta = event.get("delta").and_then(Value::as_str).unwrap_or_default();
            Some(chunk(json!({ "reasoning_content": delta }), None))
        }

        // Function calls surface once, complete, when the item is done —
        // the chat stream never sees partial arguments.
        "response.output_item.done" => {
            let item = event.get("item")?;
            if item.get("type").and_then(Value::as_str) != Some("function_call") {
                return None;
            }
            let arguments = match item.get("arguments") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            Some(chunk(
                json!({
                    "tool_calls": [{
                        "index": 0,
                        "id": item.get("call_id").and_then(Value::as_str).unwrap_or_default(),
                        "type": "function",
                        "function": {
                            "name": item.get("name").and_then(Value::as_str).unwrap_or_default(),
                            "arguments": arguments,
                        },
                    }]
                }),
                None,
            ))
        }

        "response.completed" => Some(chunk(json!({}), Some("stop"))),

        "response.failed" => {
            let message = event
                .pointer("/response/error/message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");
            warn!(message, "Codex response failed");
            Some(json!({ "error": { "message": message } }))
        }

        _ => None,
    }
}

/// Accumulates Responses events into one complete answer for non-streaming
/// clients.
#[derive(Default)]
pub struct ResponseCollector {
    text: String,
    /// item_id → (name, arguments), insertion-ordered.
    function_calls: Vec<(String, String, String)>,
    usage: Option<Value>,
    model: Option<String>,
    error: Option<String>,
}

impl ResponseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one parsed Responses event.
    pub fn feed(&mut self, event: &Value) {
        if self.model.is_none() {
            if let Some(model) = event.pointer("/response/model").and_then(Value::as_str) {
                self.model = Some(model.to_string());
            }
        }

        match event.get("type").and_then(Value::as_str).unwrap_or("") {
            "response.output_text.delta" => {
                if let Some(delta) = event.get("delta").and_then(Value::as_str) {
                    self.text.push_str(delta);
                }
            }
            "response.output_text.done" => {
                if self.text.is_empty() {
                    if let Some(text) = event.get("text").and_then(Value::as_str) {
                        self.text = text.to_string();
                    }
                }
            }
            "response.output_item.added" => {
                if event.pointer("/item/type").and_then(Value::as_str) == Some("function_call") {
                    if let Some(id) = event.pointer("/item/id").and_then(Value::as_str) {
                        let name = event
                            .pointer("/item/name")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        self.function_calls
                            .push((id.to_string(), name.to_string(), String::new()));
                    }
                }
            }
            "response.function_call_arguments.delta" => {
                let item_id = event.get("item_id").and_then(Value::as_str);
                let delta = event.get("delta").and_then(Value::as_str).unwrap_or_default();
                if let Some(call) = self.find_call(item_id) {
                    call.2.push_str(delta);
                }
            }
            "response.function_call_arguments.done" => {
                let item_id = event.get("item_id").and_then(Value::as_str);
                let arguments = event
                    .get("arguments")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Some(call) = self.find_call(item_id) {
                    call.2 = arguments;
                }
            }
            "response.output_item.done" => {
                if event.pointer("/item/type").and_then(Value::as_str) == Some("function_call") {
                    let item_id = event.pointer("/item/id").and_then(Value::as_str);
                    let name = event.pointer("/item/name").and_then(Value::as_str);
                    if let (Some(call), Some(name)) =
                        (self.find_call(item_id), name)
                    {
                        call.1 = name.to_string();
                    }
                }
            }
            "response.completed" => {
                if let Some(usage) = event.pointer("/response/usage") {
                    self.usage = Some(usage.clone());
                }
            }
            "response.failed" => {
                let message = event
                    .pointer("/response/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error");
                self.error = Some(message.to_string());
            }
            _ => {}
        }
    }

    fn find_call(&mut self, item_id: Option<&str>) -> Option<&mut (String, String, String)> {
        let item_id = item_id?;
        self.function_calls.iter_mut().find(|(id, _, _)| id == item_id)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn usage_json(&self) -> Value {
        let get = |key: &str| {
            self.usage
                .as_ref()
                .and_then(|u| u.get(key))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        // the backend reports either prompt/completion or input/output names
        let prompt = get("prompt_tokens").max(get("input_tokens"));
        let completion = get("completion_tokens").max(get("output_tokens"));
        let total = get("total_tokens").max(prompt + completion);
        json!({
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": total,
        })
    }

    /// Shape the collected stream as an OpenAI chat.completion.
    pub fn into_chat_completion(self, request_id: &str, fallback_model: &str) -> Value {
        let tool_calls: Vec<Value> = self
            .function_calls
            .iter()
            .filter(|(_, name, _)| !name.is_empty())
            .map(|(id, name, arguments)| {
                json!({
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": arguments },
                })
            })
            .collect();

        let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };
        let mut message = json!({
            "role": "assistant",
            "content": if self.text.is_empty() { Value::Null } else { json!(self.text) },
        });
        if !tool_calls.is_empty() {
            message["tool_calls"] = Value::Array(tool_calls);
        }

        json!({
            "id": format!("chatcmpl-{request_id}"),
            "object": "chat.completion",
            "created": chrono::Utc::now().timestamp(),
            "model": self.model.as_deref().unwrap_or(fallback_model),
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": finish_reason,
            }],
            "usage": self.usage_json(),
        })
    }

    /// Shape the collected stream as a Responses-API response object.
    pub fn into_response(self, request_id: &str, fallback_model: &str) -> Value {
        let mut output = Vec::new();
        if !self.text.is_empty() {
            output.push(json!({
                "type": "message",
                "role": "assistant",
                "content": [{ "type": "text", "text": self.text }],
            }));
        }
        for (id, name, arguments) in &self.function_calls {
            if name.is_empty() {
                continue;
            }
            output.push(json!({
                "id": id,
                "type": "function_call",
                "name": name,
                "arguments": arguments,
            }));
        }

        json!({
            "id": format!("resp-{request_id}"),
            "object": "response",
            "created_at": chrono::Utc::now().timestamp(),
            "model": self.model.as_deref().unwrap_or(fallback_model),
            "output": output,
            "usage": self.usage_json(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_messages_reshape_into_input_items() {
        let messages = vec![
            json!({ "role": "system", "content": "sys prompt" }),
            json!({ "role": "user", "content": "hello" }),
            json!({ "role": "assistant", "content": "hi", "tool_calls": [{
                "id": "call_1", "type": "function",
                "function": { "name": "f", "arguments": "{}" }
            }]}),
            json!({ "role": "tool", "tool_call_id": "call_1", "content": "result" }),
        ];
        let items = chat_messages_to_responses_input(&messages);

        // system skipped; user message, function_call, assistant message,
        // function_call_output
        let kinds: Vec<&str> = items
            .iter()
            .map(|i| i["type"].as_str().unwrap())
            .collect();
        assert_eq!(
            kinds,
            vec!["message", "function_call", "message", "function_call_output"]
        );
        assert_eq!(items[0]["content"][0]["type"], "input_text");
        assert_eq!(items[2]["content"][0]["type"], "output_text");
        assert_eq!(items[3]["call_id"], "call_1");
        assert_eq!(items[3]["output"], "result");
    }

    #[test]
    fn tools_reshape_to_flat_responses_form() {
        let tools = json!([{
            "type": "function",
            "function": { "name": "f", "description": "d", "parameters": { "type": "object" } }
        }]);
        let reshaped = tools_chat_to_responses(&tools);
        assert_eq!(reshaped.len(), 1);
        assert_eq!(reshaped[0]["name"], "f");
        assert_eq!(reshaped[0]["strict"], false);
        assert!(reshaped[0].get("function").is_none());
    }

    #[test]
    fn codex_chat_payload_is_stateless_and_streaming() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "openai-gpt-5-codex",
            "messages": [{ "role": "user", "content": "write code" }],
            "stream": false,
        }))
        .unwrap();
        let payload = build_codex_chat_payload(&request, "gpt-5-codex", Some("high"), "sess-1");

        assert_eq!(payload["model"], "gpt-5-codex");
        assert_eq!(payload["store"], false);
        // always streams on the wire, even for non-streaming clients
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["prompt_cache_key"], "sess-1");
        assert_eq!(payload["reasoning"]["effort"], "high");
        assert_eq!(payload["reasoning"]["summary"], "auto");
        assert_eq!(payload["include"][0], "reasoning.encrypted_content");
    }

    #[test]
    fn invalid_effort_falls_back_to_medium() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "openai-gpt-5",
            "messages": [{ "role": "user", "content": "q" }],
        }))
        .unwrap();
        let payload = build_codex_chat_payload(&request, "gpt-5", Some("extreme"), "s");
        assert_eq!(payload["reasoning"]["effort"], "medium");
    }

    #[test]
    fn data_url_normalization_pads_and_cleans() {
        let url = "data:image/png;base64,QUJ DRA_-";
        let normalized = normalize_image_data_url(url);
        assert_eq!(normalized, "data:image/png;base64,QUJDRA/+");

        // non-data urls pass through untouched
        assert_eq!(
            normalize_image_data_url("https://example.com/a.png"),
            "https://example.com/a.png"
        );
    }

    #[test]
    fn text_delta_translates_to_content_chunk() {
        let event = json!({ "type": "response.output_text.delta", "delta": "hel" });
        let chunk = translate_response_event(&event, "chatcmpl-1", 0, "gpt-5").unwrap();
        assert_eq!(chunk["choices"][0]["delta"]["content"], "hel");
    }

    #[test]
    fn function_call_translates_once_complete() {
        let event = json!({
            "type": "response.output_item.done",
            "item": {
                "type": "function_call",
                "call_id": "call_9",
                "name": "f",
                "arguments": "{\"a\":1}",
            }
        });
        let chunk = translate_response_event(&event, "chatcmpl-1", 0, "gpt-5").unwrap();
        let call = &chunk["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(call["id"], "call_9");
        assert_eq!(call["function"]["arguments"], "{\"a\":1}");
    }

    #[test]
    fn completed_event_translates_to_finish_chunk() {
        let event = json!({ "type": "response.completed", "response": { "usage": {} } });
        let chunk = translate_response_event(&event, "id", 0, "m").unwrap();
        assert_eq!(chunk["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn collector_assembles_chat_completion() {
        let mut collector = ResponseCollector::new();
        collector.feed(&json!({ "type": "response.output_text.delta", "delta": "par" }));
        collector.feed(&json!({ "type": "response.output_text.delta", "delta": "tial" }));
        collector.feed(&json!({
            "type": "response.output_item.added",
            "item": { "type": "function_call", "id": "item_1", "name": "f" }
        }));
        collector.feed(&json!({
            "type": "response.function_call_arguments.delta",
            "item_id": "item_1", "delta": "{\"x\":"
        }));
        collector.feed(&json!({
            "type": "response.function_call_arguments.done",
            "item_id": "item_1", "arguments": "{\"x\":2}"
        }));
        collector.feed(&json!({
            "type": "response.completed",
            "response": { "usage": { "prompt_tokens": 4, "completion_tokens": 6 } }
        }));

        let response = collector.into_chat_completion("req1", "gpt-5");
        assert_eq!(response["choices"][0]["message"]["content"], "partial");
        let call = &response["choices"][0]["message"]["tool_calls"][0];
        assert_eq!(call["function"]["arguments"], "{\"x\":2}");
        assert_eq!(response["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(response["usage"]["total_tokens"], json!(10));
    }

    #[test]
    fn collector_assembles_responses_object() {
        let mut collector = ResponseCollector::new();
        collector.feed(&json!({ "type": "response.output_text.delta", "delta": "hi" }));
        let response = collector.into_response("req2", "gpt-5-codex");
        assert_eq!(response["object"], "response");
        assert_eq!(response["output"][0]["type"], "message");
        assert_eq!(response["output"][0]["content"][0]["text"], "hi");
    }
}
