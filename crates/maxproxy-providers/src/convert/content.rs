//! Message and content-block conversion between OpenAI and Anthropic.

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// Convert an OpenAI content array into Anthropic content blocks.
///
/// Handles text, tool_result, pass-through tool_use (some clients send
/// Anthropic-style blocks inside OpenAI arrays) and images in both base64
/// data-URI and plain-URL form.
pub fn openai_content_to_anthropic(content: &[Value]) -> Vec<Value> {
    let mut blocks = Vec::new();

    for item in content {
        match item.get("type").and_then(Value::as_str) {
            Some("text") => {
                let text = item.get("text").and_then(Value::as_str).unwrap_or_default();
                blocks.push(json!({ "type": "text", "text": text }));
            }

            Some("tool_result") => {
                let result_content = flatten_tool_result_content(item.get("content"));
                let mut block = Map::new();
                block.insert("type".into(), json!("tool_result"));
                block.insert(
                    "tool_use_id".into(),
                    json!(item
                        .get("tool_use_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()),
                );
                block.insert("content".into(), json!(result_content));
                if let Some(status) = item.get("status") {
                    block.insert("status".into(), status.clone());
                }
                if let Some(is_error) = item.get("is_error") {
                    block.insert("is_error".into(), is_error.clone());
                }
                blocks.push(Value::Object(block));
            }

            Some("tool_use") => {
                // Anthropic-style block arriving directly; keep it, extra
                // fields (cache_control) included.
                let mut block = Map::new();
                block.insert("type".into(), json!("tool_use"));
                block.insert(
                    "id".into(),
                    json!(item.get("id").and_then(Value::as_str).unwrap_or_default()),
                );
                block.insert(
                    "name".into(),
                    json!(item.get("name").and_then(Value::as_str).unwrap_or_default()),
                );
                block.insert(
                    "input".into(),
                    item.get("input").cloned().unwrap_or_else(|| json!({})),
                );
                if let Some(obj) = item.as_object() {
                    for (key, value) in obj {
                        if !block.contains_key(key) {
                            block.insert(key.clone(), value.clone());
                        }
                    }
                }
                blocks.push(Value::Object(block));
            }

            Some("image_url") => {
                let url = match item.get("image_url") {
                    Some(Value::Object(obj)) => {
                        obj.get("url").and_then(Value::as_str).unwrap_or_default()
                    }
                    Some(Value::String(s)) => s.as_str(),
                    _ => "",
                };
                if let Some(block) = image_url_to_anthropic(url) {
                    blocks.push(block);
                }
            }

            _ => {}
        }
    }

    blocks
}

fn image_url_to_anthropic(url: &str) -> Option<Value> {
    if let Some(rest) = url.strip_prefix("data:image/") {
        // data:image/<subtype>;base64,<data>
        let (subtype, data) = rest.split_once(";base64,")?;
        return Some(json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": format!("image/{subtype}"),
                "data": data,
            }
        }));
    }
    if url.is_empty() {
        return None;
    }
    Some(json!({
        "type": "image",
        "source": { "type": "url", "url": url }
    }))
}

/// Flatten a tool_result content value into the single string Anthropic
/// expects. Non-text parts are JSON-encoded and joined with newlines.
fn flatten_tool_result_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => {
            let mut texts = Vec::new();
            for part in parts {
                match part {
                    Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("text") => {
                        texts.push(
                            obj.get("text")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        );
                    }
                    Value::Object(_) => texts.push(part.to_string()),
                    other => texts.push(value_to_plain_string(other)),
                }
            }
            texts.join("\n")
        }
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert OpenAI `tool_calls` into Anthropic `tool_use` blocks.
/// Unparseable argument JSON degrades to an empty input object.
pub fn tool_calls_to_anthropic(tool_calls: &[Value]) -> Vec<Value> {
    tool_calls
        .iter()
        .map(|call| {
            let function = call.get("function");
            let arguments = function
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
                .unwrap_or("{}");
            let input: Value = serde_json::from_str(arguments).unwrap_or_else(|e| {
                warn!(error = %e, "failed to parse tool_call arguments, using empty input");
                json!({})
            });
            json!({
                "type": "tool_use",
                "id": call.get("id").and_then(Value::as_str).unwrap_or_default(),
                "name": function
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
                "input": input,
            })
        })
        .collect()
}

/// Convert a legacy `function_call` into an Anthropic `tool_use` block with
/// a synthesized `func_{name}` id.
pub fn function_call_to_anthropic(function_call: &Value) -> Vec<Value> {
    let name = function_call
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let arguments = function_call
        .get("arguments")
        .and_then(Value::as_str)
        .unwrap_or("{}");
    let input: Value = serde_json::from_str(arguments).unwrap_or_else(|_| json!({}));
    vec![json!({
        "type": "tool_use",
        "id": format!("func_{name}"),
        "name": name,
        "input": input,
    })]
}

/// Convert OpenAI tool definitions into Anthropic tools. Tools already in
/// Anthropic shape pass through; unknown shapes are skipped.
pub fn tools_to_anthropic(tools: &Value) -> Option<Vec<Value>> {
    let tools = tools.as_array()?;
    let mut converted = Vec::new();

    for tool in tools {
        let Some(obj) = tool.as_object() else {
            continue;
        };
        if obj.contains_key("name") && obj.contains_key("description") && !obj.contains_key("type")
        {
            converted.push(tool.clone());
        } else if obj.get("type").and_then(Value::as_str) == Some("function") {
            let function = obj.get("function").cloned().unwrap_or_else(|| json!({}));
            converted.push(json!({
                "name": function.get("name").and_then(Value::as_str).unwrap_or_default(),
                "description": function
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
                "input_schema": function.get("parameters").cloned().unwrap_or_else(|| json!({})),
            }));
        } else {
            warn!("unknown tool format, skipping");
        }
    }

    if converted.is_empty() {
        None
    } else {
        Some(converted)
    }
}

/// Convert legacy OpenAI `functions` into Anthropic tools.
pub fn functions_to_anthropic(functions: &Value) -> Option<Vec<Value>> {
    let functions = functions.as_array()?;
    let converted: Vec<Value> = functions
        .iter()
        .map(|func| {
            json!({
                "name": func.get("name").and_then(Value::as_str).unwrap_or_default(),
                "description": func
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
                "input_schema": func.get("parameters").cloned().unwrap_or_else(|| json!({})),
            })
        })
        .collect();

    if converted.is_empty() {
        None
    } else {
        Some(converted)
    }
}

const USER_CLASS_ROLES: &[&str] = &["user", "tool", "function"];

/// Convert an OpenAI messages array into Anthropic messages plus extracted
/// system blocks.
///
/// Anthropic's Messages API requires strict user/assistant alternation with
/// a leading user turn, so consecutive same-class messages are merged:
/// user/tool/function into one user turn, assistant runs into one assistant
/// turn. System messages come back separately as text blocks (with any
/// cache_control markers preserved).
pub fn convert_messages(messages: &[Value]) -> (Vec<Value>, Option<Vec<Value>>) {
    let mut system_blocks: Vec<Value> = Vec::new();
    let mut non_system: Vec<&Value> = Vec::new();

    for msg in messages {
        if msg.get("role").and_then(Value::as_str) == Some("system") {
            extract_system_blocks(msg, &mut system_blocks);
        } else {
            non_system.push(msg);
        }
    }

    let mut anthropic_messages: Vec<Value> = Vec::new();
    let mut i = 0;

    while i < non_system.len() {
        // Merge a run of user-class messages into one user turn.
        let mut user_content: Vec<Value> = Vec::new();
        while i < non_system.len() && is_user_class(non_system[i]) {
            let msg = non_system[i];
            let role = msg.get("role").and_then(Value::as_str).unwrap_or("user");
            let content = msg.get("content");

            match role {
                "user" => match content {
                    Some(Value::String(text)) => {
                        if !text.is_empty() {
                            user_content.push(json!({ "type": "text", "text": text }));
                        }
                    }
                    Some(Value::Array(items)) => {
                        user_content.extend(openai_content_to_anthropic(items));
                    }
                    _ => {}
                },
                "tool" => {
                    let tool_use_id = msg
                        .get("tool_call_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    user_content.push(json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": stringify_content(content),
                    }));
                }
                "function" => {
                    let name = msg.get("name").and_then(Value::as_str).unwrap_or_default();
                    user_content.push(json!({
                        "type": "tool_result",
                        "tool_use_id": format!("func_{name}"),
                        "content": stringify_content(content),
                    }));
                }
                _ => {}
            }
            i += 1;
        }
        if !user_content.is_empty() {
            anthropic_messages.push(json!({ "role": "user", "content": user_content }));
        }

        // Merge a run of assistant messages into one assistant turn.
        let mut assistant_content: Vec<Value> = Vec::new();
        while i < non_system.len()
            && non_system[i].get("role").and_then(Value::as_str) == Some("assistant")
        {
            let msg = non_system[i];
            match msg.get("content") {
                Some(Value::String(text)) => {
                    if !text.is_empty() {
                        assistant_content.push(json!({ "type": "text", "text": text }));
                    }
                }
                Some(Value::Array(items)) => {
                    assistant_content.extend(items.iter().cloned());
                }
                _ => {}
            }

            if let Some(tool_calls) = msg.get("tool_calls").and_then(Value::as_array) {
                if !tool_calls.is_empty() {
                    debug!(count = tool_calls.len(), "assistant message has tool_calls");
                    assistant_content.extend(tool_calls_to_anthropic(tool_calls));
                }
            }
            if let Some(function_call) = msg.get("function_call") {
                if !function_call.is_null() {
                    assistant_content.extend(function_call_to_anthropic(function_call));
                }
            }
            i += 1;
        }
        if !assistant_content.is_empty() {
            anthropic_messages.push(json!({ "role": "assistant", "content": assistant_content }));
        }

        // Unknown roles belong to neither merge run; skip them so the scan
        // always advances.
        if i < non_system.len()
            && !is_user_class(non_system[i])
            && non_system[i].get("role").and_then(Value::as_str) != Some("assistant")
        {
            warn!(role = ?non_system[i].get("role"), "skipping message with unknown role");
            i += 1;
        }
    }

    // First turn must be a user message.
    let starts_with_user = anthropic_messages
        .first()
        .and_then(|m| m.get("role"))
        .and_then(Value::as_str)
        == Some("user");
    if !anthropic_messages.is_empty() && !starts_with_user {
        debug!("first message was not user role, inserting placeholder user message");
        anthropic_messages.insert(
            0,
            json!({ "role": "user", "content": [{ "type": "text", "text": "." }] }),
        );
    }

    // The final assistant text must not end with whitespace.
    if let Some(last) = anthropic_messages.last_mut() {
        if last.get("role").and_then(Value::as_str) == Some("assistant") {
            if let Some(blocks) = last.get_mut("content").and_then(Value::as_array_mut) {
                for block in blocks {
                    if block.get("type").and_then(Value::as_str) == Some("text") {
                        let text = block.get("text").and_then(Value::as_str).unwrap_or_default();
                        let trimmed = text.trim_end();
                        if trimmed.len() != text.len() {
                            block["text"] = json!(trimmed);
                        }
                    }
                }
            }
        }
    }

    let system = if system_blocks.is_empty() {
        None
    } else {
        Some(system_blocks)
    };
    (anthropic_messages, system)
}

fn is_user_class(msg: &Value) -> bool {
    msg.get("role")
        .and_then(Value::as_str)
        .map(|r| USER_CLASS_ROLES.contains(&r))
        .unwrap_or(false)
}

fn extract_system_blocks(msg: &Value, out: &mut Vec<Value>) {
    match msg.get("content") {
        Some(Value::String(text)) => {
            let mut block = Map::new();
            block.insert("type".into(), json!("text"));
            block.insert("text".into(), json!(text));
            if let Some(cache_control) = msg.get("cache_control") {
                block.insert("cache_control".into(), cache_control.clone());
            }
            out.push(Value::Object(block));
        }
        Some(Value::Array(items)) => {
            for item in items {
                if item.get("type").and_then(Value::as_str) != Some("text") {
                    continue;
                }
                let mut block = Map::new();
                block.insert("type".into(), json!("text"));
                block.insert(
                    "text".into(),
                    json!(item.get("text").and_then(Value::as_str).unwrap_or_default()),
                );
                if let Some(cache_control) = item.get("cache_control") {
                    block.insert("cache_control".into(), cache_control.clone());
                }
                out.push(Value::Object(block));
            }
        }
        _ => {}
    }
}

fn stringify_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Split Anthropic content blocks into OpenAI message parts.
///
/// Returns `(text_content, tool_calls, reasoning_content, thinking_blocks)`.
/// Thinking blocks are kept intact (signatures included) so the response can
/// carry them under `thinking_blocks`.
pub fn anthropic_content_to_openai(
    content: &[Value],
) -> (Option<String>, Vec<Value>, Option<String>, Vec<Value>) {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    let mut reasoning_parts: Vec<&str> = Vec::new();
    let mut thinking_blocks: Vec<Value> = Vec::new();

    for block in content {
        let block_type = block.get("type").and_then(Value::as_str);
        match block_type {
            Some("text") => {
                text_parts.push(block.get("text").and_then(Value::as_str).unwrap_or_default());
            }
            Some("tool_use") => {
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(json!({
                    "id": block.get("id").and_then(Value::as_str).unwrap_or_default(),
                    "type": "function",
                    "function": {
                        "name": block.get("name").and_then(Value::as_str).unwrap_or_default(),
                        "arguments": input.to_string(),
                    }
                }));
            }
            Some("redacted_thinking") => {
                // No readable text, but the block itself is preserved.
                thinking_blocks.push(block.clone());
            }
            _ if block_type == Some("thinking") || block.get("thinking").is_some() => {
                thinking_blocks.push(block.clone());
                if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                    if !text.is_empty() {
                        reasoning_parts.push(text);
                    }
                }
            }
            _ => {}
        }
    }

    let text_content = if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.concat())
    };
    let reasoning_content = if reasoning_parts.is_empty() {
        None
    } else {
        Some(reasoning_parts.concat())
    };

    (text_content, tool_calls, reasoning_content, thinking_blocks)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
