use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use maxproxy_auth::{AnthropicOauth, ChatGptOauth, TokenStore};
use maxproxy_core::ProxyConfig;
use maxproxy_models::{load_custom_models, ModelRegistry};
use maxproxy_providers::{
    AnthropicDriver, ChatGptDriver, OpenAiCompatDriver, ThinkingCache, Timeouts,
};
use tracing::info;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
///
/// Everything here is constructed once at startup; the registry is immutable
/// afterwards and the thinking cache carries its own interior lock.
pub struct AppState {
    pub config: ProxyConfig,
    pub registry: ModelRegistry,
    pub anthropic_oauth: AnthropicOauth,
    pub chatgpt_oauth: ChatGptOauth,
    pub thinking_cache: Arc<ThinkingCache>,
    pub anthropic: AnthropicDriver,
    pub openai_compat: OpenAiCompatDriver,
    pub chatgpt: ChatGptDriver,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> anyhow::Result<Self> {
        let timeouts = Timeouts {
            connect: config.connect_timeout,
            read: config.read_timeout,
            request: config.request_timeout,
            stream: config.stream_timeout,
        };

        let models_path = config
            .models_file
            .clone()
            .unwrap_or_else(|| "models.json".to_string());
        let registry = ModelRegistry::new(load_custom_models(Path::new(&models_path)));

        let anthropic_store = match &config.token_file {
            Some(path) => TokenStore::new(PathBuf::from(path)),
            None => TokenStore::anthropic_default(),
        };

        Ok(Self {
            registry,
            anthropic_oauth: AnthropicOauth::new(anthropic_store),
            chatgpt_oauth: ChatGptOauth::new(TokenStore::chatgpt_default()),
            thinking_cache: Arc::new(ThinkingCache::new()),
            anthropic: AnthropicDriver::new(timeouts)?,
            openai_compat: OpenAiCompatDriver::new(timeouts)?,
            chatgpt: ChatGptDriver::new(timeouts)?,
            config,
        })
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/healthz", get(crate::http::health::healthz_handler))
        .route("/auth/status", get(crate::http::health::auth_status_handler))
        .route("/models", get(crate::http::models::list_models))
        .route("/v1/models", get(crate::http::models::list_models))
        .route("/v1/messages", post(crate::http::messages::messages_handler))
        .route(
            "/v1/messages/count_tokens",
            post(crate::http::count_tokens::count_tokens_handler),
        )
        .route(
            "/v1/beta/messages/count_tokens",
            post(crate::http::count_tokens::count_tokens_handler),
        )
        .route(
            "/v1/chat/completions",
            post(crate::http::chat_completions::chat_completions),
        )
        .route(
            "/v1/responses",
            post(crate::http::responses::responses_handler),
        )
        .with_state(state)
        .layer(axum::middleware::from_fn(log_requests))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Duration + status logging for API paths (static probes stay quiet).
async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    if path.starts_with("/v1/") {
        info!(
            "{} {} - {} - {:.3}s",
            method,
            path,
            response.status().as_u16(),
            start.elapsed().as_secs_f64()
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_builds_with_default_config() {
        let state = AppState::new(ProxyConfig::default()).unwrap();
        let _router = build_router(Arc::new(state));
    }
}
