//! Gated agents server.

use std::sync::Arc;

use dotenvy::dotenv;
use mimalloc::MiMalloc;

use gated_agents::config::AppConfig;
use gated_agents::{server, telemetry};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    // Load .env (if present)
    let _ = dotenv();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {err}");
            std::process::exit(1);
        }
    };

    telemetry::init(config.log.format);

    if let Err(err) = server::start_server(Arc::new(config)).await {
        tracing::error!(error = %err, "Server stopped");
        std::process::exit(1);
    }
}
