//! dual-router
//!
//! Dual-mode HTTP/HTTPS router built with Tokio, hyper and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────┐
//!                    │                    ROUTER                        │
//!   Client           │  ┌─────────┐   ┌───────────┐                     │
//!   ─────────────────┼─▶│   net   │──▶│  routing  │                     │
//!                    │  │listener │   │ (method,  │                     │
//!                    │  └─────────┘   │   host)   │                     │
//!                    │                └─────┬─────┘                     │
//!                    │       ┌──────────────┼───────────────┐           │
//!                    │       ▼              ▼               ▼           │
//!                    │  ┌─────────┐   ┌───────────┐   ┌───────────┐     │
//!                    │  │ direct  │   │  forward  │   │  tunnel   │     │
//!                    │  │ (https) │   │ (upstream)│   │ (CONNECT) │     │
//!                    │  └────┬────┘   └─────┬─────┘   └─────┬─────┘     │
//!                    └───────┼──────────────┼───────────────┼───────────┘
//!                            ▼              ▼               ▼
//!                         Backend     Upstream proxy   Backend / Upstream
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use dual_router::config::{load_config, ConfigError, ProxyConfig};
use dual_router::config::validation::validate_config;
use dual_router::lifecycle::startup;
use dual_router::observability::logging;

#[derive(Parser)]
#[command(name = "dual-router")]
#[command(about = "Dual-mode HTTP/HTTPS router with CONNECT tunneling", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Validate the configuration, print a summary and exit.
    #[arg(long)]
    check: bool,
}

fn load(cli: &Cli) -> Result<ProxyConfig, String> {
    let mut config = match &cli.config {
        Some(path) => load_config(path).map_err(|e| format!("{}: {e}", path.display()))?,
        None => ProxyConfig::default(),
    };

    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
        validate_config(&config).map_err(|errors| ConfigError::Validation(errors).to_string())?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        println!("Configuration OK");
        println!("  listen:          {}", config.listener.bind_address);
        println!("  designated host: {}", config.routing.designated_host);
        println!("  backend:         {}", config.backend.address);
        println!("  upstream proxy:  {}", config.upstream.address);
        return ExitCode::SUCCESS;
    }

    if let Err(err) = logging::init(&config.observability) {
        eprintln!("Failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dual-router starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        designated_host = %config.routing.designated_host,
        "Configuration loaded"
    );

    match startup::run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "Router failed");
            ExitCode::FAILURE
        }
    }
}
