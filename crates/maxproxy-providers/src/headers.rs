//! Outbound header constants for subscription-auth requests.
//!
//! Upstream gates Bearer-token traffic on looking like the official CLI;
//! these values must match what the CLI actually sends.

/// Leading system block required for subscription-auth detection.
pub const CLAUDE_CODE_SPOOF_MESSAGE: &str =
    "You are Claude Code, Anthropic's official CLI for Claude.";

pub const USER_AGENT: &str = "claude-cli/1.0.113 (external, cli)";

pub const X_APP: &str = "cli";

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// SDK identification headers sent with every Anthropic request.
pub const STAINLESS_HEADERS: &[(&str, &str)] = &[
    ("X-Stainless-Retry-Count", "0"),
    ("X-Stainless-Timeout", "600"),
    ("X-Stainless-Lang", "js"),
    ("X-Stainless-Package-Version", "0.60.0"),
    ("X-Stainless-OS", "Windows"),
    ("X-Stainless-Arch", "x64"),
    ("X-Stainless-Runtime", "node"),
    ("X-Stainless-Runtime-Version", "v22.19.0"),
    ("x-stainless-helper-method", "stream"),
];

/// Beta tokens composed into the `anthropic-beta` header.
pub const BETA_OAUTH: &str = "oauth-2025-04-20";
pub const BETA_1M_CONTEXT: &str = "context-1m-2025-08-07";
pub const BETA_INTERLEAVED_THINKING: &str = "interleaved-thinking-2025-05-14";
pub const BETA_FINE_GRAINED_TOOLS: &str = "fine-grained-tool-streaming-2025-05-14";
