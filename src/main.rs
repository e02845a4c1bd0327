//! HTTP API gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::BoundedListener ──▶ http::server (request id, limits, trace)
//!                                              │
//!                                              ▼
//!                                  routing::Router (longest prefix + predicates)
//!                                              │
//!                                              ▼
//!                                  admission (in-flight bound + FIFO queue)
//!                                              │
//!                                              ▼
//!                        load_balancer::Selector over healthy upstreams
//!                                              │
//!                                              ▼
//!                                  pool::PoolManager ──▶ Upstream
//!
//!     Background: health::HealthChecker, pool reaper, config::ConfigWatcher,
//!                 admin endpoint, Prometheus exporter
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use api_gateway::config::watcher::ConfigWatcher;
use api_gateway::config::{load_config, GatewayConfig};
use api_gateway::http::HttpServer;
use api_gateway::lifecycle::{wait_for_signal, Shutdown};
use api_gateway::observability::{init_logging, metrics};

#[derive(Parser)]
#[command(name = "api-gateway", version, about = "HTTP API gateway")]
struct Args {
    /// Path to the TOML configuration file. Built-in defaults are used when absent.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    if args.check {
        println!("configuration is valid");
        return Ok(());
    }

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "api-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        routes = config.routes.len(),
        upstreams = config.upstreams.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
        tracing::info!(address = %addr, "Metrics exporter listening");
    }

    // The watcher must outlive the server.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let admin_listener = if config.admin.enabled {
        Some(TcpListener::bind(&config.admin.bind_address).await?)
    } else {
        None
    };

    let shutdown = Shutdown::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            shutdown.trigger();
        }
    });

    let server = HttpServer::new(config)?;
    server
        .run(listener, admin_listener, config_updates, shutdown)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
