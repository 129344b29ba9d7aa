//! Command-line surface: auth management plus the server bootstrap.
//!
//! Exit codes: 0 success, 1 generic failure, 2 authentication failure.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use maxproxy_auth::AuthError;
use maxproxy_core::ProxyConfig;
use tracing::{info, warn};

use crate::app::{build_router, AppState};

#[derive(Parser)]
#[command(name = "maxproxy", version, about = "Local multi-provider LLM API gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start an OAuth login flow and exchange the pasted code
    Login {
        /// Authenticate against ChatGPT instead of Anthropic
        #[arg(long)]
        chatgpt: bool,
        /// Request a one-year Anthropic token (no refresh token)
        #[arg(long)]
        long_term: bool,
    },
    /// Refresh the stored tokens
    Refresh {
        #[arg(long)]
        chatgpt: bool,
    },
    /// Delete stored tokens
    Logout {
        #[arg(long)]
        chatgpt: bool,
    },
    /// Show token status for both providers
    Status,
    /// Generate a long-term Anthropic token (alias for login --long-term)
    SetupToken,
    /// Run the HTTP gateway
    Serve {
        /// Skip interactive hints; rely on stored or env-seeded tokens
        #[arg(long)]
        headless: bool,
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub async fn run(cli: Cli, config: ProxyConfig) -> Result<(), CliError> {
    match cli.command {
        Command::Login { chatgpt, long_term } => login(&config, chatgpt, long_term).await,
        Command::SetupToken => login(&config, false, true).await,
        Command::Refresh { chatgpt } => refresh(&config, chatgpt).await,
        Command::Logout { chatgpt } => logout(&config, chatgpt),
        Command::Status => status(&config),
        Command::Serve {
            headless,
            bind,
            port,
        } => serve(config, headless, bind, port).await,
    }
}

fn state_for(config: &ProxyConfig) -> Result<AppState, CliError> {
    AppState::new(config.clone()).map_err(CliError::Other)
}

async fn login(config: &ProxyConfig, chatgpt: bool, long_term: bool) -> Result<(), CliError> {
    let state = state_for(config)?;

    let url = if chatgpt {
        state.chatgpt_oauth.authorize_url()?
    } else {
        state.anthropic_oauth.authorize_url(long_term)?
    };

    println!("Open this URL in your browser and authorize:");
    println!("\n  {url}\n");
    print!("Paste the authorization code: ");
    let _ = std::io::stdout().flush();

    let mut code = String::new();
    std::io::stdin()
        .read_line(&mut code)
        .map_err(|e| CliError::Other(e.into()))?;
    let code = code.trim();
    if code.is_empty() {
        return Err(CliError::Auth(AuthError::MissingPkce));
    }

    if chatgpt {
        let bundle = state.chatgpt_oauth.exchange(code).await?;
        println!(
            "Authenticated with ChatGPT{}",
            bundle
                .account_id
                .map(|id| format!(" (account {id})"))
                .unwrap_or_default()
        );
    } else {
        state.anthropic_oauth.exchange(code, long_term).await?;
        if long_term {
            println!("Long-term token stored (valid ~1 year; cannot be refreshed).");
        } else {
            println!("Authenticated with Anthropic.");
        }
    }
    Ok(())
}

async fn refresh(config: &ProxyConfig, chatgpt: bool) -> Result<(), CliError> {
    let state = state_for(config)?;
    if chatgpt {
        state.chatgpt_oauth.refresh().await?;
    } else {
        state.anthropic_oauth.refresh().await?;
    }
    println!("Tokens refreshed.");
    Ok(())
}

fn logout(config: &ProxyConfig, chatgpt: bool) -> Result<(), CliError> {
    let state = state_for(config)?;
    if chatgpt {
        state.chatgpt_oauth.store().clear()?;
        println!("ChatGPT tokens cleared.");
    } else {
        state.anthropic_oauth.store().clear()?;
        println!("Anthropic tokens cleared.");
    }
    Ok(())
}

fn status(config: &ProxyConfig) -> Result<(), CliError> {
    let state = state_for(config)?;
    let status = serde_json::json!({
        "anthropic": state.anthropic_oauth.store().status(),
        "chatgpt": state.chatgpt_oauth.store().status(),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&status).unwrap_or_else(|_| status.to_string())
    );
    Ok(())
}

async fn serve(
    mut config: ProxyConfig,
    headless: bool,
    bind: Option<String>,
    port: Option<u16>,
) -> Result<(), CliError> {
    if let Some(bind) = bind {
        config.bind_address = bind;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let state = state_for(&config)?;

    // Headless deployments seed a long-term token from the environment
    // (e.g. the output of an interactive setup-token run elsewhere).
    if let Ok(token) = std::env::var("ANTHROPIC_OAUTH_TOKEN") {
        if !token.is_empty() {
            info!("seeding Anthropic token store from ANTHROPIC_OAUTH_TOKEN");
            state.anthropic_oauth.seed_long_term(&token)?;
        }
    }

    if !headless && !state.anthropic_oauth.store().status().has_tokens {
        warn!("no Anthropic tokens stored; run `maxproxy login` first");
    }
    if config.stream_trace_enabled {
        warn!(
            dir = %config.stream_trace_dir,
            "stream tracing is ENABLED - raw SSE chunks will be written to disk"
        );
    }

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .map_err(|e: std::net::AddrParseError| CliError::Other(e.into()))?;

    let router = build_router(Arc::new(state));
    info!("maxproxy listening on {addr}");
    info!("endpoints: /v1/messages (Anthropic), /v1/chat/completions (OpenAI), /v1/responses (Codex)");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| CliError::Other(e.into()))?;
    axum::serve(listener, router)
        .await
        .map_err(|e| CliError::Other(e.into()))?;
    Ok(())
}
