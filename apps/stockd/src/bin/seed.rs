//! # Seed Data
//!
//! Restocks a handful of demo products into the configured database.
//!
//! ## Usage
//! ```bash
//! cargo run -p stockd --bin seed
//!
//! # Use a specific config file
//! cargo run -p stockd --bin seed -- ./stockline.toml
//! ```
//!
//! Running it twice adds the quantities again; restock is additive.

use std::path::PathBuf;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stockline_core::StockKey;
use stockline_engine::{AdminContext, EngineConfig, InventoryService};

const DEMO_STOCK: &[(&str, &str, i64)] = &[
    ("SNEAKER-001", "9", 4),
    ("SNEAKER-001", "10", 5),
    ("SNEAKER-001", "11", 2),
    ("TEE-BASIC", "S", 12),
    ("TEE-BASIC", "M", 20),
    ("TEE-BASIC", "L", 8),
    ("CAP-LOGO", "OS", 1),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")))
        .init();

    let config = EngineConfig::load_or_default(std::env::args().nth(1).map(PathBuf::from));
    if let Some(parent) = config.database.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let service = InventoryService::open(&config)
        .await
        .context("failed to open inventory database")?;
    let admin = service.admin(AdminContext::new("seed")?);

    for &(product_id, size, quantity) in DEMO_STOCK {
        let key = StockKey::new(product_id, size);
        let record = admin
            .restock(&key, quantity, Some("demo seed"))
            .await
            .with_context(|| format!("failed to restock {key}"))?;
        info!(
            %key,
            on_hand = record.quantity,
            available = record.available_quantity(),
            "Seeded"
        );
    }

    service.manager().database().close().await;
    Ok(())
}
