use std::process::ExitCode;

use clap::Parser;
use tracing::error;

mod app;
mod cli;
mod http;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Cli::parse();

    let config = maxproxy_core::ProxyConfig::load(None).unwrap_or_else(|e| {
        eprintln!("Config load failed ({e}), using defaults");
        maxproxy_core::ProxyConfig::default()
    });

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!("maxproxy={}", config.log_level))
            }),
        )
        .init();

    match cli::run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(cli::CliError::Auth(e)) => {
            error!("authentication failed: {e}");
            ExitCode::from(2)
        }
        Err(cli::CliError::Other(e)) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
