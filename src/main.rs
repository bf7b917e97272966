//! Claims notification server.
//!
//! Entry point for the customer-portal claims WebSocket service.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use claims_realtime::{config::AppConfig, server, telemetry};
use dotenvy::dotenv;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present) before config reads the environment
    let _ = dotenv();

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry);

    server::start_server(Arc::new(config)).await
}
