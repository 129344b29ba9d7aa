//! OpenAI Chat Completions → Anthropic Messages request conversion.

use maxproxy_models::{reasoning_budget, Resolved};
use serde_json::{json, Value};
use tracing::debug;

use crate::convert::content::{
    convert_messages, functions_to_anthropic, tools_to_anthropic,
};
use crate::error::ProviderError;
use crate::shape::{self, USE_1M_CONTEXT_KEY};
use crate::thinking::ThinkingCache;
use crate::types::ChatCompletionRequest;

const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Convert an OpenAI request into an Anthropic Messages request body.
///
/// Model resolution has already happened; `resolved` carries the backend id
/// and any reasoning level baked into the advertised name. The thinking
/// cache is consulted to re-prepend signed thinking ahead of the
/// enable-thinking gate.
pub fn openai_to_anthropic(
    request: &ChatCompletionRequest,
    resolved: &Resolved,
    cache: &ThinkingCache,
) -> Result<Value, ProviderError> {
    let (messages, system_blocks) = convert_messages(&request.messages);

    let mut anthropic = json!({
        "model": resolved.backend_id,
        "messages": messages,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "stream": request.stream,
    });

    if resolved.use_1m_context {
        anthropic[USE_1M_CONTEXT_KEY] = json!(true);
    }

    if let Some(system) = system_blocks {
        anthropic["system"] = Value::Array(system);
    }

    if let Some(temperature) = &request.temperature {
        anthropic["temperature"] = temperature.clone();
    }
    if let Some(top_p) = &request.top_p {
        anthropic["top_p"] = top_p.clone();
    }
    if let Some(top_k) = &request.top_k {
        anthropic["top_k"] = top_k.clone();
    }

    match &request.stop {
        Some(Value::String(stop)) => {
            anthropic["stop_sequences"] = json!([stop]);
        }
        Some(Value::Array(stops)) => {
            anthropic["stop_sequences"] = Value::Array(stops.clone());
        }
        _ => {}
    }

    if let Some(tools) = &request.tools {
        if let Some(converted) = tools_to_anthropic(tools) {
            anthropic["tools"] = Value::Array(converted);
        }
    }
    if let Some(functions) = &request.functions {
        if let Some(converted) = functions_to_anthropic(functions) {
            anthropic["tools"] = Value::Array(converted);
        }
    }

    apply_tool_choice(&mut anthropic, request.tool_choice.as_ref());
    apply_function_call(&mut anthropic, request.function_call.as_ref());

    // Try to restore signed thinking before deciding whether thinking can be
    // enabled at all.
    shape::prepend_cached_thinking(&mut anthropic, cache);

    // reasoning_effort parameter wins over the model-name variant.
    let reasoning_level = request
        .reasoning_effort
        .as_deref()
        .filter(|e| !e.is_empty())
        .or(resolved.reasoning_level.as_deref());

    if let Some(level) = reasoning_level {
        if level == "minimal" {
            return Err(ProviderError::InvalidRequest(
                "reasoning effort 'minimal' is not supported for Anthropic models".to_string(),
            ));
        }
        if let Some(budget) = reasoning_budget(level) {
            debug!(level, budget, "reasoning requested");
            shape::apply_reasoning(&mut anthropic, u64::from(budget));
        } else {
            debug!(level, "unknown reasoning level, ignoring");
        }
    }

    Ok(anthropic)
}

fn apply_tool_choice(anthropic: &mut Value, tool_choice: Option<&Value>) {
    match tool_choice {
        Some(Value::String(choice)) if choice == "none" => {
            if let Some(obj) = anthropic.as_object_mut() {
                obj.remove("tools");
            }
        }
        Some(Value::Object(choice)) => {
            match choice.get("type").and_then(Value::as_str) {
                // {"type": "auto"} (and missing type) keep default behavior.
                Some("function") => {
                    let name = choice
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str);
                    if let Some(name) = name {
                        anthropic["tool_choice"] = json!({ "type": "tool", "name": name });
                    }
                }
                _ => {}
            }
        }
        _ => {}
    }
}

fn apply_function_call(anthropic: &mut Value, function_call: Option<&Value>) {
    match function_call {
        Some(Value::String(choice)) if choice == "none" => {
            if let Some(obj) = anthropic.as_object_mut() {
                obj.remove("tools");
            }
        }
        Some(Value::Object(call)) => {
            if let Some(name) = call.get("name").and_then(Value::as_str) {
                anthropic["tool_choice"] = json!({ "type": "tool", "name": name });
            }
        }
        _ => {}
    }
}

/// Full shaping pipeline for an Anthropic-bound OpenAI request: convert,
/// sanitize, spoof-inject, add cache breakpoints.
pub fn prepare_anthropic_request(
    request: &ChatCompletionRequest,
    resolved: &Resolved,
    cache: &ThinkingCache,
) -> Result<Value, ProviderError> {
    let mut anthropic = openai_to_anthropic(request, resolved, cache)?;
    shape::sanitize(&mut anthropic);
    shape::inject_spoof_system(&mut anthropic);
    shape::add_prompt_caching(&mut anthropic);
    Ok(anthropic)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::CLAUDE_CODE_SPOOF_MESSAGE;
    use maxproxy_models::{ModelFamily, ModelRegistry};

    fn chat_request(body: Value) -> ChatCompletionRequest {
        serde_json::from_value(body).unwrap()
    }

    fn resolve(model: &str) -> Resolved {
        ModelRegistry::new(Vec::new()).resolve(model)
    }

    #[test]
    fn simple_chat_request_shapes_for_anthropic() {
        let request = chat_request(json!({
            "model": "sonnet-4-5",
            "messages": [{ "role": "user", "content": "ping" }],
            "stream": false,
        }));
        let cache = ThinkingCache::new();
        let shaped =
            prepare_anthropic_request(&request, &resolve("sonnet-4-5"), &cache).unwrap();

        assert_eq!(shaped["model"], "claude-sonnet-4-5-20250929");
        assert_eq!(shaped["max_tokens"], json!(4096));
        assert!(shaped.get("top_k").is_none());
        assert_eq!(shaped["system"][0]["text"], CLAUDE_CODE_SPOOF_MESSAGE);
        assert_eq!(shaped["messages"][0]["role"], "user");
    }

    #[test]
    fn reasoning_variant_enables_thinking_and_raises_max_tokens() {
        let request = chat_request(json!({
            "model": "sonnet-4-5-reasoning-high",
            "messages": [{ "role": "user", "content": "think hard" }],
            "max_tokens": 1000,
        }));
        let cache = ThinkingCache::new();
        let resolved = resolve("sonnet-4-5-reasoning-high");
        assert_eq!(resolved.family, ModelFamily::Anthropic);

        let shaped = prepare_anthropic_request(&request, &resolved, &cache).unwrap();
        assert_eq!(shaped["model"], "claude-sonnet-4-5-20250929");
        assert_eq!(shaped["thinking"], json!({ "type": "enabled", "budget_tokens": 32000 }));
        assert_eq!(shaped["max_tokens"], json!(33024));
        assert_eq!(shaped["temperature"], json!(1.0));
        assert!(shaped.get("top_k").is_none());
    }

    #[test]
    fn reasoning_effort_parameter_wins_over_model_variant() {
        let request = chat_request(json!({
            "model": "sonnet-4-5-reasoning-low",
            "messages": [{ "role": "user", "content": "q" }],
            "reasoning_effort": "high",
        }));
        let cache = ThinkingCache::new();
        let shaped =
            openai_to_anthropic(&request, &resolve("sonnet-4-5-reasoning-low"), &cache).unwrap();
        assert_eq!(shaped["thinking"]["budget_tokens"], json!(32000));
    }

    #[test]
    fn minimal_effort_is_rejected_on_anthropic_route() {
        let request = chat_request(json!({
            "model": "sonnet-4-5",
            "messages": [{ "role": "user", "content": "q" }],
            "reasoning_effort": "minimal",
        }));
        let cache = ThinkingCache::new();
        let err = openai_to_anthropic(&request, &resolve("sonnet-4-5"), &cache).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[test]
    fn one_m_variant_sets_internal_marker() {
        let request = chat_request(json!({
            "model": "sonnet-4-5-1m",
            "messages": [{ "role": "user", "content": "q" }],
            "stream": true,
        }));
        let cache = ThinkingCache::new();
        let shaped = openai_to_anthropic(&request, &resolve("sonnet-4-5-1m"), &cache).unwrap();
        assert_eq!(shaped[USE_1M_CONTEXT_KEY], json!(true));
    }

    #[test]
    fn stop_string_and_list_become_stop_sequences() {
        let cache = ThinkingCache::new();
        let request = chat_request(json!({
            "model": "sonnet-4-5",
            "messages": [{ "role": "user", "content": "q" }],
            "stop": "END",
        }));
        let shaped = openai_to_anthropic(&request, &resolve("sonnet-4-5"), &cache).unwrap();
        assert_eq!(shaped["stop_sequences"], json!(["END"]));

        let request = chat_request(json!({
            "model": "sonnet-4-5",
            "messages": [{ "role": "user", "content": "q" }],
            "stop": ["a", "b"],
        }));
        let shaped = openai_to_anthropic(&request, &resolve("sonnet-4-5"), &cache).unwrap();
        assert_eq!(shaped["stop_sequences"], json!(["a", "b"]));
    }

    #[test]
    fn tool_choice_none_removes_tools() {
        let cache = ThinkingCache::new();
        let request = chat_request(json!({
            "model": "sonnet-4-5",
            "messages": [{ "role": "user", "content": "q" }],
            "tools": [{ "type": "function", "function": { "name": "f", "parameters": {} } }],
            "tool_choice": "none",
        }));
        let shaped = openai_to_anthropic(&request, &resolve("sonnet-4-5"), &cache).unwrap();
        assert!(shaped.get("tools").is_none());
    }

    #[test]
    fn tool_choice_function_forces_specific_tool() {
        let cache = ThinkingCache::new();
        let request = chat_request(json!({
            "model": "sonnet-4-5",
            "messages": [{ "role": "user", "content": "q" }],
            "tools": [{ "type": "function", "function": { "name": "f", "parameters": {} } }],
            "tool_choice": { "type": "function", "function": { "name": "f" } },
        }));
        let shaped = openai_to_anthropic(&request, &resolve("sonnet-4-5"), &cache).unwrap();
        assert_eq!(shaped["tool_choice"], json!({ "type": "tool", "name": "f" }));
    }

    #[test]
    fn prompt_cache_markers_respect_limit_after_full_pipeline() {
        let cache = ThinkingCache::new();
        let request = chat_request(json!({
            "model": "sonnet-4-5",
            "messages": [
                { "role": "system", "content": "sys" },
                { "role": "user", "content": "one" },
                { "role": "assistant", "content": "r" },
                { "role": "user", "content": "two" },
            ],
            "tools": [{ "type": "function", "function": { "name": "f", "parameters": {} } }],
        }));
        let shaped =
            prepare_anthropic_request(&request, &resolve("sonnet-4-5"), &cache).unwrap();
        assert!(shape::count_cache_controls(&shaped) <= 4);
    }
}
