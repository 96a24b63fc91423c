//! # stockd
//!
//! Long-running host for the reservation engine.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. tracing (RUST_LOG, default info)                                   │
//! │  2. EngineConfig: defaults → stockline.toml → STOCKLINE_* env          │
//! │  3. InventoryService::open (pool + migrations)                         │
//! │  4. ExpiryReaper, if [reaper] enabled                                  │
//! │  5. Stock change events → stdout, one JSON object per line             │
//! │  6. Ctrl+C / SIGTERM → stop reaper → close pool                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `stockd [path/to/stockline.toml]`

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stockline_engine::{EngineConfig, InventoryService, StockSubscription};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting stockd...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = EngineConfig::load_or_default(config_path);
    info!(
        db_path = %config.database.path.display(),
        reaper_enabled = config.reaper.enabled,
        reaper_interval_secs = config.reaper.interval_secs,
        default_ttl_minutes = config.reservations.default_ttl_minutes,
        "Configuration loaded"
    );

    prepare_data_dir(&config)?;

    let service = InventoryService::open(&config)
        .await
        .context("failed to open inventory database")?;
    info!("Inventory engine ready");

    let reaper = if config.reaper.enabled {
        Some(service.spawn_reaper())
    } else {
        warn!("Expiry reaper disabled; abandoned holds stay reserved");
        None
    };

    let events = tokio::spawn(stream_events(service.subscribe()));

    shutdown_signal().await;

    if let Some((handle, task)) = reaper {
        if let Err(e) = handle.shutdown().await {
            warn!(error = %e, "Reaper already stopped");
        }
        if let Err(e) = task.await {
            error!(error = %e, "Reaper task panicked");
        }
    }

    events.abort();
    service.manager().database().close().await;

    info!("Shutdown complete");
    Ok(())
}

/// Creates the database's parent directory for file-backed databases.
fn prepare_data_dir(config: &EngineConfig) -> anyhow::Result<()> {
    let path = &config.database.path;
    if path.as_os_str() == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Writes every stock change event to stdout as a JSON line.
async fn stream_events(mut events: StockSubscription) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => {
                let mut stdout = std::io::stdout().lock();
                if writeln!(stdout, "{line}").and_then(|_| stdout.flush()).is_err() {
                    warn!("stdout closed, no longer streaming stock events");
                    return;
                }
            }
            Err(e) => error!(error = %e, "Failed to encode stock event"),
        }
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
