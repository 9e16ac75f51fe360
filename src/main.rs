//! # Pawchat
//!
//! Real-time room chat server.
//!
//! This is the application entry point that initializes:
//! - Configuration loading
//! - Tracing/logging subsystem
//! - Database connection pool
//! - Chat gateway (with startup room reconciliation)
//! - HTTP/WebSocket server

use anyhow::Result;
use tracing::info;

use pawchat::config::Settings;
use pawchat::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;

    pawchat::telemetry::init_tracing(&settings.log_format);

    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
