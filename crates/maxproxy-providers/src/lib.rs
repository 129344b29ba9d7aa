//! Protocol and streaming machinery: dialect converters, the SSE state
//! machine, request shaping and the upstream drivers.

pub mod anthropic;
pub mod chatgpt;
pub mod convert;
pub mod error;
pub mod headers;
pub mod openai_compat;
pub mod session;
pub mod shape;
pub mod sse;
pub mod thinking;
pub mod trace;
pub mod types;

pub use anthropic::AnthropicDriver;
pub use chatgpt::ChatGptDriver;
pub use error::ProviderError;
pub use openai_compat::OpenAiCompatDriver;
pub use session::SessionCache;
pub use sse::{SseEvent, SseParser};
pub use thinking::ThinkingCache;
pub use trace::StreamTracer;
pub use types::{ChatCompletionRequest, ResponsesRequest};

use std::time::Duration;

/// Upstream connection budget, seconds.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// TCP connect.
    pub connect: f64,
    /// Gap between received stream chunks.
    pub read: f64,
    /// Whole non-streaming request.
    pub request: f64,
    /// Whole streaming request.
    pub stream: f64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: 10.0,
            read: 60.0,
            request: 120.0,
            stream: 600.0,
        }
    }
}

impl Timeouts {
    /// Client for non-streaming calls: total timeout = `request`.
    pub fn request_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs_f64(self.connect))
            .timeout(Duration::from_secs_f64(self.request))
            .build()
    }

    /// Client for streaming calls: total timeout = `stream`, with a
    /// between-chunk read timeout.
    pub fn stream_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs_f64(self.connect))
            .read_timeout(Duration::from_secs_f64(self.read))
            .timeout(Duration::from_secs_f64(self.stream))
            .build()
    }
}
