//! # Inventory Service
//!
//! The operation set the storefront and back office call.
//!
//! ## Surface
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  InventoryService (shopper-facing)                                     │
//! │  ├── reserve_stock(items, holder, ttl)   per-item results              │
//! │  ├── reserve_all(items, holder, ttl)     all or nothing                │
//! │  ├── reserve_line(item, holder, ttl)     hold + committed level        │
//! │  ├── commit_reservation(id, order_id)                                  │
//! │  ├── release_reservation(id, reason)                                   │
//! │  ├── release_session(session_id, reason)                               │
//! │  ├── apply_payment_outcome(outcome)      payment webhook signal        │
//! │  ├── check_availability(items)           advisory                      │
//! │  ├── subscribe() / subscribe_key(key)    StockChangeEvent stream       │
//! │  ├── spawn_reaper()                                                    │
//! │  └── reconcile(key)                                                    │
//! │                                                                         │
//! │  AdminService (back office, needs AdminContext)                        │
//! │  ├── adjust_stock(key, delta, reason)                                  │
//! │  └── restock(key, quantity, reason)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use stockline_core::validation::{validate_cart_line, validate_cart_size};
use stockline_core::{CartAvailability, CartLine, Holder, Reservation, StockKey, StockRecord};
use stockline_db::Database;

use crate::audit::{ReconciliationReport, StockAuditor};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, ReaperSettings};
use crate::error::EngineResult;
use crate::notifier::{StockChangeNotifier, StockSubscription};
use crate::reaper::{ExpiryReaper, ReaperHandle};
use crate::reservation::{AdminContext, ReservationManager};
use crate::validator::CartStockValidator;

/// Reason recorded when `reserve_all` backs out earlier lines.
pub const INCOMPLETE_CART_REASON: &str = "cart could not be fully reserved";

/// Payment result delivered by the checkout flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Charge captured: commit every reservation to the order.
    Succeeded {
        order_id: String,
        reservation_ids: Vec<String>,
    },
    /// Charge declined or cancelled: release every reservation.
    Failed {
        reservation_ids: Vec<String>,
        reason: String,
    },
}

// =============================================================================
// Inventory Service
// =============================================================================

/// Shopper-facing entry point. Cheap to clone.
#[derive(Debug, Clone)]
pub struct InventoryService {
    manager: ReservationManager,
    validator: CartStockValidator,
    auditor: StockAuditor,
    reaper: ReaperSettings,
}

impl InventoryService {
    /// Opens the configured database and wires the engine on the system
    /// clock.
    pub async fn open(config: &EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let db = Database::new(config.database.to_db_config()).await?;
        Ok(Self::new(Arc::new(db), config))
    }

    pub fn new(db: Arc<Database>, config: &EngineConfig) -> Self {
        Self::with_clock(db, config, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Arc<Database>, config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let notifier = StockChangeNotifier::new(
            config.notifier.channel_capacity,
            config.notifier.low_stock_threshold,
        );
        let manager = ReservationManager::new(
            db.clone(),
            clock,
            notifier,
            config.retry_policy(),
            config.reservations.clone(),
        );

        InventoryService {
            manager,
            validator: CartStockValidator::new(db.clone()),
            auditor: StockAuditor::new(db),
            reaper: config.reaper.clone(),
        }
    }

    pub fn manager(&self) -> &ReservationManager {
        &self.manager
    }

    /// Back-office operations for a trusted actor.
    pub fn admin(&self, context: AdminContext) -> AdminService {
        AdminService {
            manager: self.manager.clone(),
            context,
        }
    }

    // =========================================================================
    // Reservations
    // =========================================================================

    /// Reserves each line independently.
    ///
    /// The outer error covers the cart as a whole (empty, too many lines);
    /// each line then gets its own result in input order.
    pub async fn reserve_stock(
        &self,
        items: &[CartLine],
        holder: &Holder,
        ttl_minutes: Option<i64>,
    ) -> EngineResult<Vec<EngineResult<Reservation>>> {
        validate_cart_size(items.len())?;

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let result = self
                .manager
                .reserve(&item.key(), item.requested_quantity, holder, ttl_minutes)
                .await;
            results.push(result);
        }
        Ok(results)
    }

    /// Reserves one line and returns the level it left behind, for
    /// confirming a tentative hold in an [`AvailabilityCache`].
    ///
    /// [`AvailabilityCache`]: crate::cache::AvailabilityCache
    pub async fn reserve_line(
        &self,
        item: &CartLine,
        holder: &Holder,
        ttl_minutes: Option<i64>,
    ) -> EngineResult<(Reservation, StockRecord)> {
        validate_cart_line(item)?;
        self.manager
            .reserve_with_level(&item.key(), item.requested_quantity, holder, ttl_minutes)
            .await
    }

    /// Reserves every line or none of them.
    ///
    /// On the first failing line, holds already taken are released and
    /// that line's error is returned.
    pub async fn reserve_all(
        &self,
        items: &[CartLine],
        holder: &Holder,
        ttl_minutes: Option<i64>,
    ) -> EngineResult<Vec<Reservation>> {
        validate_cart_size(items.len())?;
        for item in items {
            validate_cart_line(item)?;
        }

        let mut held: Vec<Reservation> = Vec::with_capacity(items.len());
        for item in items {
            match self
                .manager
                .reserve(&item.key(), item.requested_quantity, holder, ttl_minutes)
                .await
            {
                Ok(reservation) => held.push(reservation),
                Err(e) => {
                    info!(
                        product_id = %item.product_id,
                        size = %item.size,
                        rolled_back = held.len(),
                        error = %e,
                        "Cart reservation incomplete, releasing earlier lines"
                    );
                    self.release_all(&held, INCOMPLETE_CART_REASON).await;
                    return Err(e);
                }
            }
        }
        Ok(held)
    }

    async fn release_all(&self, reservations: &[Reservation], reason: &str) {
        for reservation in reservations {
            if let Err(e) = self.manager.release(&reservation.id, reason).await {
                // Left held; the reaper returns it at TTL.
                warn!(
                    reservation_id = %reservation.id,
                    error = %e,
                    "Failed to release reservation"
                );
            }
        }
    }

    pub async fn commit_reservation(
        &self,
        reservation_id: &str,
        order_id: &str,
    ) -> EngineResult<Reservation> {
        self.manager.commit(reservation_id, order_id).await
    }

    pub async fn release_reservation(
        &self,
        reservation_id: &str,
        reason: &str,
    ) -> EngineResult<Reservation> {
        self.manager.release(reservation_id, reason).await
    }

    /// Releases every hold a session still has open. Returns how many were
    /// released; holds resolved concurrently are skipped.
    pub async fn release_session(&self, session_id: &str, reason: &str) -> EngineResult<usize> {
        let held = self
            .manager
            .database()
            .reservations()
            .list_held_for_session(session_id)
            .await?;

        let mut released = 0;
        for reservation in &held {
            match self.manager.release(&reservation.id, reason).await {
                Ok(_) => released += 1,
                Err(e) if e.is_expected() => {}
                Err(e) => return Err(e),
            }
        }

        info!(session_id, released, "Session holds released");
        Ok(released)
    }

    /// Commits or releases every reservation named by a payment result.
    ///
    /// Results come back in the order the ids were given.
    pub async fn apply_payment_outcome(
        &self,
        outcome: &PaymentOutcome,
    ) -> Vec<EngineResult<Reservation>> {
        match outcome {
            PaymentOutcome::Succeeded {
                order_id,
                reservation_ids,
            } => {
                let mut results = Vec::with_capacity(reservation_ids.len());
                for id in reservation_ids {
                    results.push(self.manager.commit(id, order_id).await);
                }
                info!(order_id = %order_id, lines = results.len(), "Payment succeeded");
                results
            }
            PaymentOutcome::Failed {
                reservation_ids,
                reason,
            } => {
                let mut results = Vec::with_capacity(reservation_ids.len());
                for id in reservation_ids {
                    results.push(self.manager.release(id, reason).await);
                }
                info!(reason = %reason, lines = results.len(), "Payment failed");
                results
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Advisory per-line availability; reserves nothing.
    pub async fn check_availability(&self, items: &[CartLine]) -> EngineResult<CartAvailability> {
        self.validator.check(items).await
    }

    pub async fn get_level(&self, key: &StockKey) -> EngineResult<Option<StockRecord>> {
        self.manager.get_level(key).await
    }

    pub async fn get_reservation(&self, reservation_id: &str) -> EngineResult<Option<Reservation>> {
        self.manager.get_reservation(reservation_id).await
    }

    pub async fn reconcile(&self, key: &StockKey) -> EngineResult<ReconciliationReport> {
        self.auditor.reconcile(key).await
    }

    // =========================================================================
    // Streams and Background Work
    // =========================================================================

    pub fn subscribe(&self) -> StockSubscription {
        self.manager.notifier().subscribe()
    }

    pub fn subscribe_key(&self, key: StockKey) -> StockSubscription {
        self.manager.notifier().subscribe_key(key)
    }

    /// Starts the expiry reaper with the configured interval and batch size.
    pub fn spawn_reaper(&self) -> (ReaperHandle, JoinHandle<()>) {
        ExpiryReaper::spawn(self.manager.clone(), &self.reaper)
    }
}

// =============================================================================
// Admin Service
// =============================================================================

/// Back-office mutations. Only reachable through
/// [`InventoryService::admin`] with an [`AdminContext`].
#[derive(Debug, Clone)]
pub struct AdminService {
    manager: ReservationManager,
    context: AdminContext,
}

impl AdminService {
    pub async fn adjust_stock(
        &self,
        key: &StockKey,
        delta: i64,
        reason: &str,
    ) -> EngineResult<StockRecord> {
        self.manager.adjust(&self.context, key, delta, reason).await
    }

    pub async fn restock(
        &self,
        key: &StockKey,
        quantity: i64,
        reason: Option<&str>,
    ) -> EngineResult<StockRecord> {
        self.manager
            .restock(&self.context, key, quantity, reason)
            .await
    }
}
