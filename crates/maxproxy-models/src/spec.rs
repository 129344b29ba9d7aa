//! Static seed tables for the model registry.

/// Reasoning levels accepted on the Anthropic route, in budget order.
pub const REASONING_LEVELS: &[&str] = &["low", "medium", "high"];

/// Effort levels accepted by the ChatGPT Responses backend.
/// `minimal` exists here but has no Anthropic thinking budget.
pub const CHATGPT_EFFORT_LEVELS: &[&str] = &["minimal", "low", "medium", "high"];

/// Thinking budget (tokens) for a reasoning level. `None` for levels the
/// Anthropic budget map does not define (notably `minimal`).
pub fn reasoning_budget(level: &str) -> Option<u32> {
    match level {
        "low" => Some(8_000),
        "medium" => Some(16_000),
        "high" => Some(32_000),
        _ => None,
    }
}

/// An Anthropic base model advertised by the proxy.
pub struct AnthropicBaseSpec {
    /// Short advertised id (e.g. "sonnet-4-5").
    pub advertised_id: &'static str,
    /// Backend id the upstream understands.
    pub backend_id: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
    pub context_length: u32,
    pub max_completion_tokens: u32,
    pub supports_reasoning: bool,
    pub supports_vision: bool,
    /// Variant that requests the 1M-context beta.
    pub use_1m_context: bool,
}

pub const ANTHROPIC_BASE_MODELS: &[AnthropicBaseSpec] = &[
    AnthropicBaseSpec {
        advertised_id: "opus-4-1",
        backend_id: "claude-opus-4-1-20250805",
        created: 1_754_265_600,
        owned_by: "anthropic",
        context_length: 200_000,
        max_completion_tokens: 32_000,
        supports_reasoning: true,
        supports_vision: true,
        use_1m_context: false,
    },
    AnthropicBaseSpec {
        advertised_id: "sonnet-4-5",
        backend_id: "claude-sonnet-4-5-20250929",
        created: 1_759_104_000,
        owned_by: "anthropic",
        context_length: 200_000,
        max_completion_tokens: 64_000,
        supports_reasoning: true,
        supports_vision: true,
        use_1m_context: false,
    },
    AnthropicBaseSpec {
        advertised_id: "sonnet-4-5-1m",
        backend_id: "claude-sonnet-4-5-20250929",
        created: 1_759_104_000,
        owned_by: "anthropic",
        context_length: 1_000_000,
        max_completion_tokens: 64_000,
        supports_reasoning: true,
        supports_vision: true,
        use_1m_context: true,
    },
    AnthropicBaseSpec {
        advertised_id: "sonnet-4",
        backend_id: "claude-sonnet-4-20250514",
        created: 1_747_180_800,
        owned_by: "anthropic",
        context_length: 200_000,
        max_completion_tokens: 64_000,
        supports_reasoning: true,
        supports_vision: true,
        use_1m_context: false,
    },
    AnthropicBaseSpec {
        advertised_id: "sonnet-4-1m",
        backend_id: "claude-sonnet-4-20250514",
        created: 1_747_180_800,
        owned_by: "anthropic",
        context_length: 1_000_000,
        max_completion_tokens: 64_000,
        supports_reasoning: true,
        supports_vision: true,
        use_1m_context: true,
    },
    AnthropicBaseSpec {
        advertised_id: "haiku-3-5",
        backend_id: "claude-3-5-haiku-20241022",
        created: 1_729_555_200,
        owned_by: "anthropic",
        context_length: 200_000,
        max_completion_tokens: 8_192,
        supports_reasoning: false,
        supports_vision: true,
        use_1m_context: false,
    },
];

/// A ChatGPT subscription model served through the Codex Responses backend.
pub struct ChatGptBaseSpec {
    /// Advertised id, carrying the `openai-` prefix in listings.
    pub advertised_id: &'static str,
    /// Backend id sent to the Codex API (no prefix).
    pub backend_id: &'static str,
    pub owned_by: &'static str,
    pub context_length: u32,
    pub max_completion_tokens: u32,
    pub supports_reasoning: bool,
    pub supports_vision: bool,
}

pub const CHATGPT_BASE_MODELS: &[ChatGptBaseSpec] = &[
    ChatGptBaseSpec {
        advertised_id: "openai-gpt-5",
        backend_id: "gpt-5",
        owned_by: "openai-chatgpt",
        context_length: 400_000,
        max_completion_tokens: 128_000,
        supports_reasoning: true,
        supports_vision: true,
    },
    ChatGptBaseSpec {
        advertised_id: "openai-gpt-5-codex",
        backend_id: "gpt-5-codex",
        owned_by: "openai-chatgpt",
        context_length: 400_000,
        max_completion_tokens: 128_000,
        supports_reasoning: true,
        supports_vision: true,
    },
    ChatGptBaseSpec {
        advertised_id: "openai-codex-mini-latest",
        backend_id: "codex-mini-latest",
        owned_by: "openai-chatgpt",
        context_length: 128_000,
        max_completion_tokens: 16_000,
        supports_reasoning: false,
        supports_vision: false,
    },
];
