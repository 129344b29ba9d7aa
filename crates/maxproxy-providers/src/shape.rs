//! Anthropic-bound request shaping.
//!
//! Everything that has to happen between "valid inbound request" and "bytes
//! the subscription-auth upstream will accept": parameter sanitizing, the
//! spoof system block, prompt-cache breakpoints, thinking budgets and the
//! beta-header composition.

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::headers::{
    BETA_1M_CONTEXT, BETA_FINE_GRAINED_TOOLS, BETA_INTERLEAVED_THINKING, BETA_OAUTH,
    CLAUDE_CODE_SPOOF_MESSAGE,
};
use crate::thinking::ThinkingCache;

/// Internal marker recording that the resolved model variant wants the
/// 1M-context beta. Stripped before the request reaches the wire.
pub const USE_1M_CONTEXT_KEY: &str = "_use_1m_context";

/// Upstream allows at most this many cache_control markers per request.
const MAX_CACHE_BLOCKS: usize = 4;

/// Tokens reserved for visible output when a thinking budget raises
/// max_tokens.
const MIN_RESPONSE_TOKENS: u64 = 1024;

/// Drop or clamp parameters the Anthropic API rejects. Idempotent.
///
/// Unconditionally: non-numeric or out-of-range `top_p`, non-numeric
/// `temperature`, non-positive-integer `top_k`, and null/empty `tools` are
/// removed. With thinking enabled: `temperature` is forced to 1.0, `top_p`
/// clamped into [0.95, 1.0] and `top_k` dropped entirely.
pub fn sanitize(request: &mut Value) {
    let Some(obj) = request.as_object_mut() else {
        return;
    };

    let top_p_valid = obj
        .get("top_p")
        .map(|v| v.as_f64().map(|p| (0.0..=1.0).contains(&p)).unwrap_or(false));
    if top_p_valid == Some(false) {
        debug!("removing invalid top_p value");
        obj.remove("top_p");
    }

    let temperature_valid = obj.get("temperature").map(|v| v.as_f64().is_some());
    if temperature_valid == Some(false) {
        debug!("removing invalid temperature value");
        obj.remove("temperature");
    }

    let top_k_valid = obj
        .get("top_k")
        .map(|v| v.as_i64().map(|k| k > 0).unwrap_or(false));
    if top_k_valid == Some(false) {
        debug!("removing invalid top_k value");
        obj.remove("top_k");
    }

    let tools_valid = obj
        .get("tools")
        .map(|v| v.as_array().map(|a| !a.is_empty()).unwrap_or(false));
    if tools_valid == Some(false) {
        debug!("removing null or empty tools parameter");
        obj.remove("tools");
    }

    let thinking_is_null = matches!(obj.get("thinking"), Some(Value::Null));
    if thinking_is_null {
        obj.remove("thinking");
    }

    let thinking_enabled = obj
        .get("thinking")
        .and_then(|t| t.get("type"))
        .and_then(Value::as_str)
        == Some("enabled");
    if thinking_enabled {
        if obj.get("temperature").and_then(Value::as_f64) != Some(1.0) {
            debug!("forcing temperature to 1.0 (thinking enabled)");
            obj.insert("temperature".to_string(), json!(1.0));
        }
        let top_p = obj.get("top_p").and_then(Value::as_f64);
        if let Some(top_p) = top_p {
            if !(0.95..=1.0).contains(&top_p) {
                let clamped = top_p.clamp(0.95, 1.0);
                debug!(top_p, clamped, "clamping top_p for thinking constraints");
                obj.insert("top_p".to_string(), json!(clamped));
            }
        }
        if obj.remove("top_k").is_some() {
            debug!("removed top_k (not allowed with thinking)");
        }
    }
}

/// Prepend the Claude Code spoof block to `system` unless it is already the
/// first block. Required to satisfy upstream subscription-auth detection.
pub fn inject_spoof_system(request: &mut Value) {
    let spoof_block = json!({ "type": "text", "text": CLAUDE_CODE_SPOOF_MESSAGE });

    let system = request.get("system").cloned();
    let new_system = match system {
        Some(Value::Array(blocks)) => {
            let already_first = blocks
                .first()
                .and_then(|b| b.get("text"))
                .and_then(Value::as_str)
                == Some(CLAUDE_CODE_SPOOF_MESSAGE);
            if already_first {
                return;
            }
            let mut out = vec![spoof_block];
            out.extend(blocks);
            Value::Array(out)
        }
        Some(Value::String(text)) => {
            if text.starts_with(CLAUDE_CODE_SPOOF_MESSAGE) {
                return;
            }
            json!([spoof_block, { "type": "text", "text": text }])
        }
        Some(Value::Null) | None => json!([spoof_block]),
        Some(other) => {
            // Unrecognized shape; keep it but make sure the spoof leads.
            json!([spoof_block, other])
        }
    };

    request["system"] = new_system;
    debug!("injected Claude Code system message");
}

/// Count cache_control markers across tools, system and message content.
pub fn count_cache_controls(request: &Value) -> usize {
    let mut count = 0;

    if let Some(tools) = request.get("tools").and_then(Value::as_array) {
        count += tools.iter().filter(|t| t.get("cache_control").is_some()).count();
    }
    if let Some(system) = request.get("system").and_then(Value::as_array) {
        count += system.iter().filter(|b| b.get("cache_control").is_some()).count();
    }
    if let Some(messages) = request.get("messages").and_then(Value::as_array) {
        for message in messages {
            if let Some(blocks) = message.get("content").and_then(Value::as_array) {
                count += blocks.iter().filter(|b| b.get("cache_control").is_some()).count();
            }
        }
    }
    count
}

/// Add prompt-cache breakpoints, hierarchy order tools → system → last two
/// user turns (last content block of each), without exceeding the 4-marker
/// upstream limit. String system/message content is promoted to block arrays
/// when it needs a marker.
pub fn add_prompt_caching(request: &mut Value) {
    let existing = count_cache_controls(request);
    if existing >= MAX_CACHE_BLOCKS {
        debug!(existing, "request already at cache_control limit, skipping");
        return;
    }
    let mut remaining = MAX_CACHE_BLOCKS - existing;

    // Last tool: upstream caches every tool before it automatically.
    if remaining > 0 {
        if let Some(tools) = request.get_mut("tools").and_then(Value::as_array_mut) {
            if let Some(last_tool) = tools.last_mut() {
                if last_tool.is_object() && last_tool.get("cache_control").is_none() {
                    last_tool["cache_control"] = json!({ "type": "ephemeral" });
                    remaining -= 1;
                }
            }
        }
    }

    // Last system block.
    if remaining > 0 {
        match request.get_mut("system") {
            Some(Value::Array(blocks)) => {
                if let Some(last) = blocks.last_mut() {
                    if last.is_object() && last.get("cache_control").is_none() {
                        last["cache_control"] = json!({ "type": "ephemeral" });
                        remaining -= 1;
                    }
                }
            }
            Some(system @ Value::String(_)) => {
                let text = system.as_str().unwrap_or_default().to_string();
                *system = json!([{
                    "type": "text",
                    "text": text,
                    "cache_control": { "type": "ephemeral" }
                }]);
                remaining -= 1;
            }
            _ => {}
        }
    }

    // Last two user turns, last content block of each.
    if remaining > 0 {
        if let Some(messages) = request.get_mut("messages").and_then(Value::as_array_mut) {
            let user_indices: Vec<usize> = messages
                .iter()
                .enumerate()
                .filter(|(_, m)| m.get("role").and_then(Value::as_str) == Some("user"))
                .map(|(i, _)| i)
                .collect();

            let take = user_indices.len().min(2).min(remaining);
            for &idx in &user_indices[user_indices.len() - take..] {
                if remaining == 0 {
                    break;
                }
                let content = &mut messages[idx]["content"];
                match content {
                    Value::Array(blocks) => {
                        if let Some(last) = blocks.last_mut() {
                            if last.is_object() && last.get("cache_control").is_none() {
                                last["cache_control"] = json!({ "type": "ephemeral" });
                                remaining -= 1;
                            }
                        }
                    }
                    Value::String(text) => {
                        let text = text.clone();
                        *content = json!([{
                            "type": "text",
                            "text": text,
                            "cache_control": { "type": "ephemeral" }
                        }]);
                        remaining -= 1;
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Compose the `anthropic-beta` header for a shaped request.
///
/// `oauth-2025-04-20` is always present. The 1M-context beta applies only to
/// streaming requests on a 1M variant; interleaved thinking when the request
/// enables thinking; fine-grained tool streaming for non-streaming tool
/// requests. Client-supplied betas merge (deduped, insertion order) for
/// non-streaming only — on streams they may request tier-gated features the
/// subscription lacks.
pub fn build_beta_headers(
    request: &Value,
    client_betas: Option<&str>,
    for_streaming: bool,
) -> String {
    let mut betas: Vec<String> = vec![BETA_OAUTH.to_string()];

    if for_streaming
        && request
            .get(USE_1M_CONTEXT_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    {
        betas.push(BETA_1M_CONTEXT.to_string());
    }

    if request
        .get("thinking")
        .and_then(|t| t.get("type"))
        .and_then(Value::as_str)
        == Some("enabled")
    {
        betas.push(BETA_INTERLEAVED_THINKING.to_string());
    }

    if !for_streaming && request.get("tools").is_some() {
        betas.push(BETA_FINE_GRAINED_TOOLS.to_string());
    }

    match client_betas {
        Some(client) if !for_streaming => {
            for beta in client.split(',') {
                let beta = beta.trim();
                if !beta.is_empty() && !betas.iter().any(|b| b == beta) {
                    betas.push(beta.to_string());
                }
            }
        }
        Some(client) => {
            debug!(client_betas = client, "ignoring client beta headers on streaming request");
        }
        None => {}
    }

    betas.join(",")
}

/// Raise max_tokens so an enabled thinking budget leaves room for output.
pub fn ensure_thinking_max_tokens(request: &mut Value) {
    let Some(budget) = request
        .get("thinking")
        .filter(|t| t.get("type").and_then(Value::as_str) == Some("enabled"))
        .and_then(|t| t.get("budget_tokens"))
        .and_then(Value::as_u64)
    else {
        return;
    };
    raise_max_tokens_floor(request, budget);
}

fn raise_max_tokens_floor(request: &mut Value, budget: u64) {
    let required = budget + MIN_RESPONSE_TOKENS;
    let current = request.get("max_tokens").and_then(Value::as_u64).unwrap_or(0);
    if current < required {
        debug!(current, required, "raising max_tokens for thinking budget");
        request["max_tokens"] = json!(required);
    }
}

/// Re-prepend a cached signed thinking block to the last assistant turn when
/// it carries tool_use blocks but no leading thinking block.
pub fn prepend_cached_thinking(request: &mut Value, cache: &ThinkingCache) {
    let Some(messages) = request.get_mut("messages").and_then(Value::as_array_mut) else {
        return;
    };
    let Some(last_assistant) = messages
        .iter_mut()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
    else {
        return;
    };
    let Some(content) = last_assistant.get("content").and_then(Value::as_array) else {
        return;
    };
    if content.is_empty() {
        return;
    }

    let starts_with_thinking = content
        .first()
        .and_then(|b| b.get("type"))
        .and_then(Value::as_str)
        .map(|t| t == "thinking" || t == "redacted_thinking")
        .unwrap_or(false);
    if starts_with_thinking {
        return;
    }

    let tool_ids: Vec<String> = content
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
        .filter_map(|b| b.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    if tool_ids.is_empty() {
        return;
    }

    let cached = tool_ids.iter().find_map(|id| cache.get(id));
    match cached {
        Some(block) => {
            debug!(?tool_ids, "reattaching cached signed thinking block");
            let mut new_content = vec![block];
            new_content.extend(content.iter().cloned());
            last_assistant["content"] = Value::Array(new_content);
        }
        None => {
            debug!(?tool_ids, "no cached thinking block for tool_use ids");
        }
    }
}

/// True when the last assistant turn contains a tool_use block.
pub fn last_assistant_has_tool_use(request: &Value) -> bool {
    last_assistant_content(request)
        .map(|content| {
            content
                .iter()
                .any(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
        })
        .unwrap_or(false)
}

/// True when the last assistant turn begins with (redacted) thinking.
pub fn last_assistant_starts_with_thinking(request: &Value) -> bool {
    last_assistant_content(request)
        .and_then(|content| content.first())
        .and_then(|b| b.get("type"))
        .and_then(Value::as_str)
        .map(|t| t == "thinking" || t == "redacted_thinking")
        .unwrap_or(false)
}

fn last_assistant_content(request: &Value) -> Option<&Vec<Value>> {
    request
        .get("messages")?
        .as_array()?
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))?
        .get("content")?
        .as_array()
}

/// Enable thinking for a reasoning level, gated on message-history validity.
///
/// The max-token floor is applied whether or not thinking ends up enabled —
/// reasoning models need the headroom either way. When the last assistant
/// turn has tool_use but no leading thinking block (and the cache could not
/// supply one), thinking is disabled for this turn instead of dropping
/// messages: removing turns would break tool_use ↔ tool_result linkage.
pub fn apply_reasoning(request: &mut Value, budget: u64) {
    raise_max_tokens_floor(request, budget);

    let has_tools = last_assistant_has_tool_use(request);
    let has_thinking = last_assistant_starts_with_thinking(request);

    if has_tools && !has_thinking {
        warn!(
            "thinking requested, but last assistant has tool_use and no thinking; \
             disabling thinking for this turn to preserve tool linkage"
        );
        return;
    }

    request["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
    debug!(budget, "enabled thinking");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
