//! Mnemon MCP Server
//!
//! Long-term memory for AI agents over a line-delimited JSON-RPC stdio
//! transport. The engine (storage, hybrid search, forgetting, spaced
//! repetition, batch maintenance) lives in `mnemon-core`; this binary
//! wires configuration, logging, the tool dispatcher, and the background
//! scheduler together.
//!
//! Exit codes: 0 success, 1 configuration error, 2 storage fatal.

mod protocol;
mod server;
mod tools;

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mnemon_core::{BatchConfig, BatchScheduler, Config, Engine};

use crate::protocol::stdio::StdioTransport;
use crate::server::Dispatcher;

fn init_tracing(config: &Config) {
    // LOG_LEVEL wins; RUST_LOG still works for per-module filters.
    let filter = std::env::var("RUST_LOG")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| config.log_level.clone());

    // Logs go to stderr; stdout carries the protocol.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config);
    info!(version = env!("CARGO_PKG_VERSION"), "starting mnemon-mcp");

    let batch_config = BatchConfig {
        cleanup_interval: config.cleanup_interval,
        monitor_interval: config.monitor_interval,
        ..Default::default()
    };

    let engine = match Engine::open(config) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!("failed to open memory engine: {}", e);
            std::process::exit(2);
        }
    };

    let scheduler = BatchScheduler::start(engine.clone(), batch_config);
    let dispatcher = Dispatcher::new(engine);

    let transport = StdioTransport::new();
    if let Err(e) = transport.run(dispatcher).await {
        error!("transport error: {}", e);
    }

    info!("shutting down");
    scheduler.stop().await;
}
