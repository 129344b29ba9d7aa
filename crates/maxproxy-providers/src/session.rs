//! Stable session ids for ChatGPT prompt caching.
//!
//! The Codex backend keys its prompt cache on a `session_id` header. Two
//! requests sharing the same instructions + first user message should land
//! on the same cache entry, so the id is derived from a fingerprint of that
//! prefix rather than generated fresh per request.

use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

const MAX_ENTRIES: usize = 10_000;

/// fingerprint → session uuid, FIFO-bounded.
pub struct SessionCache {
    map: DashMap<String, String>,
    order: Mutex<VecDeque<String>>,
    max_entries: usize,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCache {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            max_entries: MAX_ENTRIES,
        }
    }

    /// Session id for a request prefix. A client-supplied id always wins.
    pub fn session_id(
        &self,
        instructions: Option<&str>,
        input_items: &[Value],
        client_supplied: Option<&str>,
    ) -> String {
        if let Some(supplied) = client_supplied {
            let supplied = supplied.trim();
            if !supplied.is_empty() {
                return supplied.to_string();
            }
        }

        let fp = fingerprint(&canonical_prefix(instructions, input_items));
        if let Some(existing) = self.map.get(&fp) {
            return existing.clone();
        }

        let sid = uuid::Uuid::new_v4().to_string();
        self.map.insert(fp.clone(), sid.clone());

        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        order.push_back(fp);
        if order.len() > self.max_entries {
            if let Some(oldest) = order.pop_front() {
                self.map.remove(&oldest);
            }
        }
        sid
    }
}

/// Canonical JSON of the cacheable request prefix: instructions plus the
/// first stable user message.
fn canonical_prefix(instructions: Option<&str>, input_items: &[Value]) -> String {
    let mut prefix = serde_json::Map::new();

    if let Some(instructions) = instructions {
        let trimmed = instructions.trim();
        if !trimmed.is_empty() {
            prefix.insert("instructions".to_string(), json!(trimmed));
        }
    }

    if let Some(first_user) = first_user_message(input_items) {
        prefix.insert("first_user_message".to_string(), first_user);
    }

    Value::Object(prefix).to_string()
}

fn first_user_message(input_items: &[Value]) -> Option<Value> {
    for item in input_items {
        if item.get("type").and_then(Value::as_str) != Some("message") {
            continue;
        }
        if item.get("role").and_then(Value::as_str) != Some("user") {
            continue;
        }
        let Some(content) = item.get("content").and_then(Value::as_array) else {
            continue;
        };

        let mut norm = Vec::new();
        for part in content {
            match part.get("type").and_then(Value::as_str) {
                Some("input_text") => {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            norm.push(json!({ "type": "input_text", "text": text }));
                        }
                    }
                }
                Some("input_image") => {
                    if let Some(url) = part.get("image_url").and_then(Value::as_str) {
                        norm.push(json!({ "type": "input_image", "image_url": url }));
                    }
                }
                _ => {}
            }
        }

        if !norm.is_empty() {
            return Some(json!({ "type": "message", "role": "user", "content": norm }));
        }
    }
    None
}

fn fingerprint(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
