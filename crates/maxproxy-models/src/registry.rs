//! Model registry: advertised id → backend id + feature flags.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::debug;

use crate::catalog::CustomModel;
use crate::spec::{
    reasoning_budget, ANTHROPIC_BASE_MODELS, CHATGPT_BASE_MODELS, CHATGPT_EFFORT_LEVELS,
    REASONING_LEVELS,
};

/// Which driver family serves a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Anthropic,
    ChatGpt,
    Custom,
}

#[derive(Debug, Clone)]
struct ModelEntry {
    id: String,
    backend_id: String,
    created: i64,
    owned_by: String,
    context_length: u32,
    max_completion_tokens: u32,
    reasoning_level: Option<String>,
    supports_reasoning: bool,
    supports_vision: bool,
    use_1m_context: bool,
    include_in_listing: bool,
    family: ModelFamily,
}

impl ModelEntry {
    fn to_listing(&self) -> Value {
        let mut data = json!({
            "id": self.id,
            "object": "model",
            "type": "model",
            "created": self.created,
            "owned_by": self.owned_by,
            "context_length": self.context_length,
            "max_completion_tokens": self.max_completion_tokens,
            "supports_vision": self.supports_vision,
        });
        if self.supports_reasoning {
            data["reasoning_capable"] = json!(true);
            if let Some(level) = &self.reasoning_level {
                data["reasoning_effort"] = json!(level);
            }
        }
        data
    }
}

/// Result of resolving an advertised model name.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Backend id sent upstream.
    pub backend_id: String,
    /// Reasoning level baked into the advertised name, when any.
    pub reasoning_level: Option<String>,
    /// Whether the 1M-context beta applies.
    pub use_1m_context: bool,
    pub family: ModelFamily,
}

/// Immutable-after-startup model catalog.
pub struct ModelRegistry {
    entries: HashMap<String, ModelEntry>,
    custom: HashMap<String, CustomModel>,
    listing: Vec<Value>,
}

impl ModelRegistry {
    /// Build the registry from the static seed tables plus the user catalog.
    pub fn new(custom_models: Vec<CustomModel>) -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
            custom: HashMap::new(),
            listing: Vec::new(),
        };

        registry.register_anthropic_models();
        registry.register_chatgpt_models();
        for model in custom_models {
            registry.register_custom_model(model);
        }

        // Deterministic listing order.
        registry.listing.sort_by(|a, b| {
            let a = a.get("id").and_then(Value::as_str).unwrap_or_default();
            let b = b.get("id").and_then(Value::as_str).unwrap_or_default();
            a.cmp(b)
        });
        registry
    }

    fn register(&mut self, entry: ModelEntry) {
        if entry.include_in_listing {
            self.listing.push(entry.to_listing());
        }
        if self.entries.insert(entry.id.clone(), entry).is_some() {
            debug!("overwrote duplicate model registry entry");
        }
    }

    fn register_anthropic_models(&mut self) {
        for base in ANTHROPIC_BASE_MODELS {
            // Listed ids: the short advertised name, plus reasoning variants.
            // Hidden aliases: the backend id and its reasoning variants, so
            // clients already speaking backend names keep resolving.
            for (name, listed) in [(base.advertised_id, true), (base.backend_id, false)] {
                self.register(ModelEntry {
                    id: name.to_string(),
                    backend_id: base.backend_id.to_string(),
                    created: base.created,
                    owned_by: base.owned_by.to_string(),
                    context_length: base.context_length,
                    max_completion_tokens: base.max_completion_tokens,
                    reasoning_level: None,
                    supports_reasoning: base.supports_reasoning,
                    supports_vision: base.supports_vision,
                    use_1m_context: base.use_1m_context,
                    include_in_listing: listed,
                    family: ModelFamily::Anthropic,
                });

                if base.supports_reasoning {
                    for level in REASONING_LEVELS {
                        self.register(ModelEntry {
                            id: format!("{name}-reasoning-{level}"),
                            backend_id: base.backend_id.to_string(),
                            created: base.created,
                            owned_by: base.owned_by.to_string(),
                            context_length: base.context_length,
                            max_completion_tokens: base.max_completion_tokens,
                            reasoning_level: Some(level.to_string()),
                            supports_reasoning: true,
                            supports_vision: base.supports_vision,
                            use_1m_context: base.use_1m_context,
                            include_in_listing: listed,
                            family: ModelFamily::Anthropic,
                        });
                    }
                }
            }
        }
    }

    fn register_chatgpt_models(&mut self) {
        for base in CHATGPT_BASE_MODELS {
            // The prefixed id is listed; the bare backend id resolves but is
            // hidden from listings.
            for (name, listed) in [(base.advertised_id, true), (base.backend_id, false)] {
                self.register(ModelEntry {
                    id: name.to_string(),
                    backend_id: base.backend_id.to_string(),
                    created: 0,
                    owned_by: base.owned_by.to_string(),
                    context_length: base.context_length,
                    max_completion_tokens: base.max_completion_tokens,
                    reasoning_level: None,
                    supports_reasoning: base.supports_reasoning,
                    supports_vision: base.supports_vision,
                    use_1m_context: false,
                    include_in_listing: listed,
                    family: ModelFamily::ChatGpt,
                });

                if base.supports_reasoning {
                    for effort in CHATGPT_EFFORT_LEVELS {
                        self.register(ModelEntry {
                            id: format!("{name}-{effort}"),
                            backend_id: base.backend_id.to_string(),
                            created: 0,
                            owned_by: base.owned_by.to_string(),
                            context_length: base.context_length,
                            max_completion_tokens: base.max_completion_tokens,
                            reasoning_level: Some(effort.to_string()),
                            supports_reasoning: true,
                            supports_vision: base.supports_vision,
                            use_1m_context: false,
                            include_in_listing: listed,
                            family: ModelFamily::ChatGpt,
                        });
                    }
                }
            }
        }
    }

    fn register_custom_model(&mut self, model: CustomModel) {
        let entry = ModelEntry {
            id: model.id.clone(),
            backend_id: model.id.clone(),
            created: 0,
            owned_by: model.owned_by.clone(),
            context_length: model.context_length,
            max_completion_tokens: model.max_completion_tokens,
            reasoning_level: None,
            supports_reasoning: false,
            supports_vision: model.supports_vision,
            use_1m_context: false,
            include_in_listing: true,
            family: ModelFamily::Custom,
        };
        // Case-insensitive lookups go through a hidden lowercase alias.
        let lower = model.id.to_lowercase();
        if lower != entry.id {
            self.register(ModelEntry {
                id: lower.clone(),
                include_in_listing: false,
                ..entry.clone()
            });
        }
        self.register(entry);
        self.custom.insert(lower, model);
    }

    /// Resolve an advertised name to backend id + flags.
    ///
    /// Total on its domain: a leading `provider/` handle is stripped, exact
    /// ids and `-reasoning-{level}` suffixes resolve through the registry,
    /// and unknown names come back unchanged with neutral defaults.
    pub fn resolve(&self, name: &str) -> Resolved {
        // Handle format "provider/model" (e.g. "openai-proxy/gpt-5-codex").
        let name = name.split_once('/').map(|(_, rest)| rest).unwrap_or(name);

        if let Some(entry) = self.lookup(name) {
            return Resolved {
                backend_id: entry.backend_id.clone(),
                reasoning_level: entry.reasoning_level.clone(),
                use_1m_context: entry.use_1m_context,
                family: entry.family,
            };
        }

        // "-reasoning-{level}" suffix on a known base id.
        if let Some((base, level)) = name.rsplit_once("-reasoning-") {
            if reasoning_budget(level).is_some() {
                if let Some(entry) = self.lookup(base) {
                    return Resolved {
                        backend_id: entry.backend_id.clone(),
                        reasoning_level: Some(level.to_string()),
                        use_1m_context: entry.use_1m_context,
                        family: entry.family,
                    };
                }
            }
        }

        debug!(model = name, "unknown model, using as-is with neutral defaults");
        Resolved {
            backend_id: name.to_string(),
            reasoning_level: None,
            use_1m_context: false,
            family: ModelFamily::Anthropic,
        }
    }

    fn lookup(&self, name: &str) -> Option<&ModelEntry> {
        self.entries
            .get(name)
            .or_else(|| self.entries.get(&name.to_lowercase()))
    }

    /// Endpoint config for a custom model, when the name maps to one.
    pub fn custom_config(&self, name: &str) -> Option<&CustomModel> {
        let name = name.split_once('/').map(|(_, rest)| rest).unwrap_or(name);
        self.custom.get(&name.to_lowercase())
    }

    /// OpenAI-style model listing, sorted by id.
    pub fn listing(&self) -> &[Value] {
        &self.listing
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModelRegistry {
        ModelRegistry::new(Vec::new())
    }

    #[test]
    fn short_alias_resolves_to_backend_id() {
        let resolved = registry().resolve("sonnet-4-5");
        assert_eq!(resolved.backend_id, "claude-sonnet-4-5-20250929");
        assert!(resolved.reasoning_level.is_none());
        assert!(!resolved.use_1m_context);
        assert_eq!(resolved.family, ModelFamily::Anthropic);
    }

    #[test]
    fn backend_id_resolves_to_itself() {
        let resolved = registry().resolve("claude-sonnet-4-5-20250929");
        assert_eq!(resolved.backend_id, "claude-sonnet-4-5-20250929");
    }

    #[test]
    fn reasoning_variant_carries_level() {
        let resolved = registry().resolve("sonnet-4-5-reasoning-high");
        assert_eq!(resolved.backend_id, "claude-sonnet-4-5-20250929");
        assert_eq!(resolved.reasoning_level.as_deref(), Some("high"));
    }

    #[test]
    fn one_m_variant_sets_context_flag() {
        let resolved = registry().resolve("sonnet-4-5-1m");
        assert_eq!(resolved.backend_id, "claude-sonnet-4-5-20250929");
        assert!(resolved.use_1m_context);
    }

    #[test]
    fn provider_handle_prefix_is_stripped() {
        let resolved = registry().resolve("openai-proxy/gpt-5-codex");
        assert_eq!(resolved.backend_id, "gpt-5-codex");
        assert_eq!(resolved.family, ModelFamily::ChatGpt);
    }

    #[test]
    fn openai_prefix_strips_on_resolve_but_stays_in_listing() {
        let registry = registry();
        let resolved = registry.resolve("openai-gpt-5-codex");
        assert_eq!(resolved.backend_id, "gpt-5-codex");

        let ids: Vec<&str> = registry
            .listing()
            .iter()
            .filter_map(|m| m.get("id").and_then(Value::as_str))
            .collect();
        assert!(ids.contains(&"openai-gpt-5-codex"));
        assert!(!ids.contains(&"gpt-5-codex"));
    }

    #[test]
    fn chatgpt_effort_variant_resolves() {
        let resolved = registry().resolve("openai-gpt-5-high");
        assert_eq!(resolved.backend_id, "gpt-5");
        assert_eq!(resolved.reasoning_level.as_deref(), Some("high"));
        assert_eq!(resolved.family, ModelFamily::ChatGpt);

        // bare alias also resolves
        let resolved = registry().resolve("gpt-5-minimal");
        assert_eq!(resolved.backend_id, "gpt-5");
        assert_eq!(resolved.reasoning_level.as_deref(), Some("minimal"));
    }

    #[test]
    fn unknown_model_resolves_to_itself_with_neutral_defaults() {
        let resolved = registry().resolve("some-model-nobody-knows");
        assert_eq!(resolved.backend_id, "some-model-nobody-knows");
        assert!(resolved.reasoning_level.is_none());
        assert!(!resolved.use_1m_context);
        assert_eq!(resolved.family, ModelFamily::Anthropic);
    }

    #[test]
    fn listing_is_sorted_and_hides_aliases() {
        let registry = registry();
        let ids: Vec<&str> = registry
            .listing()
            .iter()
            .filter_map(|m| m.get("id").and_then(Value::as_str))
            .collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        // backend ids are resolvable but never listed
        assert!(!ids.contains(&"claude-sonnet-4-5-20250929"));
        assert!(ids.contains(&"sonnet-4-5"));
        assert!(ids.contains(&"sonnet-4-5-reasoning-medium"));
    }

    #[test]
    fn custom_models_overlay_registry() {
        let registry = ModelRegistry::new(vec![CustomModel {
            id: "Llama-Local".to_string(),
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: "none".to_string(),
            owned_by: "custom".to_string(),
            context_length: 8_192,
            max_completion_tokens: 2_048,
            supports_vision: false,
        }]);

        let resolved = registry.resolve("Llama-Local");
        assert_eq!(resolved.family, ModelFamily::Custom);

        // case-insensitive config lookup
        let config = registry.custom_config("llama-local").unwrap();
        assert_eq!(config.base_url, "http://localhost:11434/v1");
    }
}
