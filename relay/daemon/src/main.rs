//! Relay Daemon
//!
//! HTTP server relaying LLM conversations to live viewers, sentence by
//! sentence.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default address (127.0.0.1:3000)
//! OPENAI_API_KEY=sk-... relay-daemon
//!
//! # Custom port, model and config file
//! relay-daemon --port 8080 --model gpt-4o-mini --config ./relay.toml
//!
//! # With verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `PORT`, `RELAY_HOST`, `RELAY_CONFIG`: same as the matching flags
//! - `OPENAI_API_KEY`, `RELAY_PROVIDER_URL`, `RELAY_MODEL`,
//!   `RELAY_SYSTEM_PROMPT`, `RELAY_VIEWER_CAPACITY`: see `relay_core::config`
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Graceful shutdown (in-flight submissions finish, viewer
//!   streams are closed)

mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_core::{
    load_config, CompletionProvider, ConfigOverrides, OpenAiProvider, RelayConfig,
    SessionRegistry, SessionSettings,
};

use crate::server::AppState;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "relay-daemon", version, about = "Sentence-by-sentence LLM conversation relay")]
struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Address to bind
    #[arg(long, env = "RELAY_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Config file (defaults to <config dir>/sentence-relay/config.toml)
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Model name, overriding config and environment
    #[arg(long)]
    model: Option<String>,
}

impl Args {
    /// Socket address to bind
    fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    /// Overrides given on the command line
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            model: self.model.clone(),
            ..ConfigOverrides::default()
        }
    }
}

/// Load configuration with CLI flags applied last
fn resolve_config(args: &Args) -> anyhow::Result<RelayConfig> {
    let (mut config, source) =
        load_config(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply(&args.overrides());
    config.validate()?;

    info!(
        source = %source,
        base_url = %config.provider.base_url,
        model = %config.provider.model,
        "Configuration resolved"
    );
    Ok(config)
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay_daemon=info".parse()?)
                .add_directive("relay_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    info!("Starting Relay Daemon");
    info!("PID: {}", std::process::id());

    let config = resolve_config(&args)?;
    let addr = args.listen_addr()?;

    let provider = Arc::new(OpenAiProvider::from_config(&config.provider)?);

    // Probe the provider without delaying startup
    let probe = Arc::clone(&provider);
    tokio::spawn(async move {
        if probe.health_check().await {
            info!(base_url = %probe.base_url(), "Provider reachable");
        } else {
            warn!(base_url = %probe.base_url(), "Provider health check failed");
        }
    });

    let registry = SessionRegistry::new(provider, SessionSettings::from_config(&config));
    let shutdown = CancellationToken::new();
    let app = server::router(AppState::new(registry, shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Viewer streams never end on their own
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    info!("Relay daemon stopped cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_explicit_flags() {
        let args = Args::try_parse_from([
            "relay-daemon",
            "--port",
            "8080",
            "--host",
            "0.0.0.0",
            "--model",
            "gpt-4o-mini",
            "--config",
            "/tmp/relay.toml",
        ])
        .unwrap();

        assert_eq!(args.listen_addr().unwrap(), "0.0.0.0:8080".parse().unwrap());
        assert_eq!(args.config, Some(PathBuf::from("/tmp/relay.toml")));
        assert_eq!(args.overrides().model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn test_invalid_host_rejected() {
        let args =
            Args::try_parse_from(["relay-daemon", "--host", "not a host", "--port", "1"]).unwrap();
        assert!(args.listen_addr().is_err());
    }

    #[test]
    fn test_model_flag_wins_over_file() {
        let mut config = RelayConfig::default();
        config.provider.model = "from-file".into();
        let args = Args::try_parse_from(["relay-daemon", "--model", "from-cli"]).unwrap();

        config.apply(&args.overrides());

        assert_eq!(config.provider.model, "from-cli");
    }
}
