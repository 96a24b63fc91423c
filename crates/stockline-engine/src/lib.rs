//! # stockline-engine: Reservation Engine for Stockline
//!
//! Turns the guarded ledger statements in `stockline-db` into the operations a
//! storefront calls, and guarantees that units sold never exceed units on
//! hand, however many shoppers reach for the last pair at once.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Reservation Engine                               │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │         InventoryService / AdminService  (service.rs)            │  │
//! │  │  reserve_stock · reserve_all · commit · release · payment signal │  │
//! │  └────────────┬──────────────────────┬──────────────────┬───────────┘  │
//! │               ▼                      ▼                  ▼               │
//! │  ┌────────────────────┐  ┌────────────────────┐  ┌──────────────────┐  │
//! │  │ ReservationManager │◄─│   ExpiryReaper     │  │ CartStock-       │  │
//! │  │                    │  │                    │  │ Validator        │  │
//! │  │ one transaction    │  │ interval sweep,    │  │ read-only,       │  │
//! │  │ per operation,     │  │ held + past TTL    │  │ advisory         │  │
//! │  │ bounded retry      │  │ → expired          │  │                  │  │
//! │  └─────────┬──────────┘  └────────────────────┘  └──────────────────┘  │
//! │            │ after COMMIT                                               │
//! │            ▼                                                            │
//! │  ┌────────────────────┐  ┌────────────────────┐  ┌──────────────────┐  │
//! │  │ StockChange-       │─►│ AvailabilityCache  │  │ StockAuditor     │  │
//! │  │ Notifier           │  │ (tentative holds)  │  │ ledger vs moves  │  │
//! │  │ broadcast, per-key │  │                    │  │ vs held          │  │
//! │  └────────────────────┘  └────────────────────┘  └──────────────────┘  │
//! │                                                                         │
//! │  Shared mutable state lives only in SQLite: stock_levels,              │
//! │  reservations, stock_moves.                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`service`] - `InventoryService` and `AdminService` facades
//! - [`reservation`] - `ReservationManager`, `AdminContext`
//! - [`reaper`] - `ExpiryReaper` and its handle
//! - [`notifier`] - Stock change broadcast
//! - [`validator`] - Cart availability check
//! - [`audit`] - Reconciliation
//! - [`cache`] - Client-side availability cache with tentative holds
//! - [`clock`] - Injectable time source
//! - [`retry`] - Bounded retry on lock contention
//! - [`config`] - Engine configuration
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockline_engine::{EngineConfig, InventoryService};
//! use stockline_core::{CartLine, Holder};
//!
//! let config = EngineConfig::load_or_default(None);
//! let service = InventoryService::open(&config).await?;
//! let (reaper, _task) = service.spawn_reaper();
//!
//! let held = service
//!     .reserve_all(&[CartLine::new("SNEAKER-001", "10", 2)], &Holder::session("S1"), None)
//!     .await?;
//! service.commit_reservation(&held[0].id, "ORD-1001").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod audit;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod notifier;
pub mod reaper;
pub mod reservation;
pub mod retry;
pub mod service;
pub mod validator;

// =============================================================================
// Re-exports
// =============================================================================

pub use audit::{ReconciliationReport, StockAuditor};
pub use cache::{AvailabilityCache, TentativeToken};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use notifier::{StockChangeNotifier, StockSubscription};
pub use reaper::{ExpiryReaper, ReaperHandle, SweepReport};
pub use reservation::{AdminContext, ReservationManager};
pub use retry::RetryPolicy;
pub use service::{AdminService, InventoryService, PaymentOutcome};
pub use validator::CartStockValidator;

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;
    use std::sync::Arc;

    use stockline_core::StockKey;
    use stockline_db::{Database, DbConfig};
    use uuid::Uuid;

    use crate::clock::{ManualClock, SystemClock};
    use crate::config::ReservationSettings;
    use crate::notifier::StockChangeNotifier;
    use crate::reservation::{AdminContext, ReservationManager};
    use crate::retry::RetryPolicy;

    pub fn sneaker_ten() -> StockKey {
        StockKey::new("SNEAKER-001", "10")
    }

    pub fn admin() -> AdminContext {
        AdminContext::new("ops@test").unwrap()
    }

    /// In-memory manager on a manual clock, with `quantity` units of
    /// SNEAKER-001/10 when non-zero.
    pub async fn manager_with_stock(quantity: i64) -> (ReservationManager, Arc<ManualClock>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let manager = ReservationManager::new(
            Arc::new(db),
            clock.clone(),
            StockChangeNotifier::new(256, 0),
            RetryPolicy::default(),
            ReservationSettings::default(),
        );

        if quantity > 0 {
            manager
                .restock(&admin(), &sneaker_ten(), quantity, Some("opening stock"))
                .await
                .unwrap();
        }
        (manager, clock)
    }

    /// Manager over a temp-file database with a real pool, for races that
    /// need more than one connection.
    pub async fn file_manager(quantity: i64) -> (ReservationManager, PathBuf) {
        let path = std::env::temp_dir().join(format!("stockline-race-{}.db", Uuid::new_v4()));
        let db = Database::new(DbConfig::new(path.clone()).max_connections(8))
            .await
            .unwrap();
        let manager = ReservationManager::new(
            Arc::new(db),
            Arc::new(SystemClock),
            StockChangeNotifier::new(256, 0),
            RetryPolicy::default(),
            ReservationSettings::default(),
        );
        manager
            .restock(&admin(), &sneaker_ten(), quantity, None)
            .await
            .unwrap();
        (manager, path)
    }

    pub async fn remove_file_db(manager: ReservationManager, path: PathBuf) {
        manager.database().close().await;
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}
