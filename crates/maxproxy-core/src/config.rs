use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Environment variables recognised as config overrides.
/// Flat names, no prefix — matches what operators already export for the
/// proxy (`PORT=8081 maxproxy serve`).
const ENV_KEYS: &[&str] = &[
    "port",
    "log_level",
    "bind_address",
    "default_model",
    "connect_timeout",
    "read_timeout",
    "request_timeout",
    "stream_timeout",
    "stream_trace_enabled",
    "stream_trace_dir",
    "stream_trace_max_bytes",
    "token_file",
    "models_file",
];

/// Top-level config (maxproxy.toml + flat env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Listener port.
    pub port: u16,
    /// Listener bind address.
    pub bind_address: String,
    /// Log level passed to the tracing filter when RUST_LOG is unset.
    pub log_level: String,
    /// Model used when a request omits one.
    pub default_model: String,

    /// Seconds to establish a TCP connection upstream.
    pub connect_timeout: f64,
    /// Seconds allowed between received stream chunks.
    pub read_timeout: f64,
    /// Total seconds for a non-streaming upstream request.
    pub request_timeout: f64,
    /// Total seconds for a streaming upstream request.
    pub stream_timeout: f64,

    /// Write raw + converted stream chunks to per-request trace files.
    pub stream_trace_enabled: bool,
    pub stream_trace_dir: String,
    /// Per-request trace cap; the file is truncated once exceeded.
    pub stream_trace_max_bytes: u64,

    /// Override for the Anthropic token file path.
    pub token_file: Option<String>,
    /// Override for the custom-model catalog path.
    pub models_file: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND.to_string(),
            log_level: "info".to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            connect_timeout: 10.0,
            read_timeout: 60.0,
            request_timeout: 120.0,
            stream_timeout: 600.0,
            stream_trace_enabled: false,
            stream_trace_dir: "stream_traces".to_string(),
            stream_trace_max_bytes: 262_144,
            token_file: None,
            models_file: None,
        }
    }
}

impl ProxyConfig {
    /// Load config: defaults < maxproxy.toml (or explicit path) < environment.
    pub fn load(path: Option<&str>) -> Result<Self, CoreError> {
        let toml_path = path.unwrap_or("maxproxy.toml");
        let config = Figment::from(Serialized::defaults(ProxyConfig::default()))
            .merge(Toml::file(toml_path))
            .merge(Env::raw().only(ENV_KEYS))
            .extract()?;
        Ok(config)
    }
}
