//! Ephemeral cache for upstream-signed thinking blocks.
//!
//! Anthropic requires that, when interleaved thinking is combined with tool
//! use, the assistant turn carrying `tool_use` blocks begins with the signed
//! thinking block it was produced with. Clients speaking the OpenAI dialect
//! drop those blocks, so the proxy remembers them keyed by the tool_use ids
//! of the turn that emitted them and re-prepends on the next request.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

const MAX_ENTRIES: usize = 256;
const TTL: Duration = Duration::from_secs(600);

/// Bounded TTL map: tool_use id → signed thinking block.
pub struct ThinkingCache {
    inner: Mutex<HashMap<String, (Value, Instant)>>,
    max_entries: usize,
    ttl: Duration,
}

impl Default for ThinkingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ThinkingCache {
    pub fn new() -> Self {
        Self::with_limits(MAX_ENTRIES, TTL)
    }

    pub fn with_limits(max_entries: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            max_entries,
            ttl,
        }
    }

    /// Store a signed thinking block. Blocks without a non-empty signature
    /// are rejected silently — they cannot be replayed upstream.
    pub fn put(&self, tool_use_id: &str, block: &Value) {
        if tool_use_id.is_empty() {
            return;
        }
        let Some(obj) = block.as_object() else {
            return;
        };
        if !obj.contains_key("thinking") {
            return;
        }
        let has_signature = obj
            .get("signature")
            .and_then(Value::as_str)
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        if !has_signature {
            return;
        }

        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.insert(tool_use_id.to_string(), (block.clone(), now));

        // Drop expired entries, then oldest-first down to capacity.
        inner.retain(|_, (_, at)| now.duration_since(*at) <= self.ttl);
        while inner.len() > self.max_entries {
            let oldest = inner
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    inner.remove(&k);
                }
                None => break,
            }
        }
    }

    /// Fetch a live block for the id; expired entries are deleted on read.
    pub fn get(&self, tool_use_id: &str) -> Option<Value> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (block, at) = inner.get(tool_use_id)?;
        if at.elapsed() > self.ttl {
            inner.remove(tool_use_id);
            return None;
        }
        Some(block.clone())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
