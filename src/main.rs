//! WebSocket gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────┐
//!                       │                    GATEWAY                       │
//!                       │                                                  │
//!   Client connection   │  ┌──────────┐   ┌───────────┐   ┌─────────────┐  │
//!   ────────────────────┼─▶│ listener │──▶│ admission │──▶│  upgrade    │  │
//!                       │  │          │   │  limiter  │   │  pipeline   │  │
//!                       │  └──────────┘   └───────────┘   └──────┬──────┘  │
//!                       │                                        │         │
//!                       │              ┌──────────┐   ┌──────────▼──────┐  │
//!                       │              │ session  │◀──│ auth + deflate  │  │
//!                       │              │  store   │   │  negotiation    │  │
//!                       │              └──────────┘   └──────────┬──────┘  │
//!                       │                                        │         │
//!   Messages            │  ┌──────────────┐   ┌──────────────────▼──────┐  │
//!   ◀───────────────────┼──│ frame codec  │◀─▶│ link + message handler  │  │
//!                       │  └──────────────┘   └─────────────────────────┘  │
//!                       │                                                  │
//!                       │  config · observability · lifecycle              │
//!                       └──────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use ws_gateway::config::{load_config, GatewayConfig};
use ws_gateway::lifecycle::signals::spawn_signal_listener;
use ws_gateway::observability::{logging, metrics};
use ws_gateway::{build_gateway, connect_backend, EchoHandler, Shutdown};

#[derive(Parser)]
#[command(name = "ws-gateway")]
#[command(about = "Session-bound WebSocket gateway", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ws-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        compression = config.compression.enabled,
        initial_capacity = config.limiter.initial_capacity,
        max_capacity = config.limiter.max_capacity,
        session_backend = ?config.session.backend,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let backend = connect_backend(&config.session).await?;
    let gateway = build_gateway(config, backend)?;

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    gateway.run(EchoHandler, shutdown).await?;
    Ok(())
}
