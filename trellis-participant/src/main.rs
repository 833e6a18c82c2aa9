//! The Trellis participant process.

mod app;
mod config;
mod handlers;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true).with_ansi(true))
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    tracing::info!(
        cluster = %cfg.cluster_id,
        participant = %cfg.participant_id(),
        host = %cfg.host,
        port = %cfg.port,
        storage_data_path = %cfg.storage_data_path,
        auto_join = %cfg.auto_join,
        "starting Trellis participant",
    );
    match App::new(cfg).await?.spawn().await {
        Ok(Err(err)) => tracing::error!(error = ?err),
        Err(err) => tracing::error!(error = ?err, "error joining participant app task"),
        Ok(Ok(())) => (),
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    Ok(())
}
