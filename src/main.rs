//! Reverse tunnel service (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!                      │                TUNNEL SERVICE                │
//!                      │                                              │
//!   Public client      │  ┌──────────┐   ┌─────────────┐              │
//!   ───────────────────┼─▶│ proxy    │──▶│ listener    │─┐            │
//!                      │  │ (accept) │   │ task        │ │            │
//!                      │  └──────────┘   └─────────────┘ │            │
//!                      │                                 ▼            │
//!                      │                        ┌────────────────┐    │
//!                      │                        │  coordinator   │    │
//!                      │                        │  event loop    │    │
//!                      │                        └───────┬────────┘    │
//!                      │                                ▼             │
//!                      │  ┌──────────┐   ┌─────────────────────┐      │
//!                      │  │ dialer   │◀──│ dispatcher task     │      │
//!                      │  │ backend  │   │ Proxy::handle       │      │
//!                      │  └────┬─────┘   └─────────────────────┘      │
//!                      └───────┼──────────────────────────────────────┘
//!                              ▼
//!                           Backend
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use tunnel_service::config::{load_config, watcher::ConfigWatcher};
use tunnel_service::lifecycle::signals::spawn_signal_handler;
use tunnel_service::observability::{logging, metrics, traffic::TrafficCounter};
use tunnel_service::service::{Reloader, Service};

#[derive(Parser)]
#[command(name = "tunnel-service")]
#[command(about = "Reverse-tunnel proxy service", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "tunnel.toml")]
    config: PathBuf,

    /// Pick up new proxies and backend changes when the file changes.
    #[arg(long)]
    watch: bool,

    /// Override the configured log level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init(cli.log_level.as_deref().unwrap_or(&config.observability.log_level));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tunnel-service starting");

    tracing::info!(
        proxies = config.proxies.len(),
        backends = config.backends.len(),
        connection_queue_capacity = config.service.connection_queue_capacity,
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

    let traffic = Arc::new(TrafficCounter::new());
    let service = Arc::new(Service::new(&config.service, traffic.clone()));

    let reloader = Reloader::new(service.clone());
    let report = reloader.apply(config).await;
    if !report.is_clean() {
        return Err(format!("startup failed: {}", report.errors.join("; ")).into());
    }

    spawn_signal_handler(service.shutdown_signal());

    // Keep the watcher alive for as long as the service runs.
    let _watcher = if cli.watch {
        let (watcher, updates) = ConfigWatcher::new(&cli.config);
        let handle = watcher.run()?;
        tokio::spawn(reloader.run(updates, service.shutdown_signal()));
        Some(handle)
    } else {
        None
    };

    let result = service.start().await;

    tracing::info!(totals = %serde_json::to_string(&traffic.snapshot())?, "Traffic totals");
    result?;

    tracing::info!("Shutdown complete");
    Ok(())
}
