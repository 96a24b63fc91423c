//! # Stock Auditor
//!
//! Cross-checks the ledger against the two records that explain it.
//!
//! ```text
//! stock_levels.quantity           == Σ stock_moves.on_hand_delta
//! stock_levels.reserved_quantity  == Σ stock_moves.reserved_delta
//!                                 == Σ reservations.quantity WHERE status = 'held'
//! 0 <= reserved_quantity <= quantity
//! ```
//!
//! All three sides are read inside one transaction, so concurrent
//! reservations never show up as a mismatch. A mismatch is never repaired
//! automatically; it means a write bypassed the manager or serialization
//! broke, and it is logged at ERROR.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

use stockline_core::{StockDelta, StockKey, StockRecord};
use stockline_db::Database;

use crate::error::EngineResult;

/// Everything known about one key, side by side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub key: StockKey,
    /// `None` when the key was never stocked.
    pub ledger: Option<StockRecord>,
    /// Sum of every move recorded for the key.
    pub move_totals: StockDelta,
    /// Sum of quantities on `held` reservations.
    pub held_total: i64,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies().is_empty()
    }

    /// Human-readable list of every rule the key breaks.
    pub fn discrepancies(&self) -> Vec<String> {
        let mut found = Vec::new();
        let (quantity, reserved) = self
            .ledger
            .as_ref()
            .map_or((0, 0), |r| (r.quantity, r.reserved_quantity));

        if let Some(record) = &self.ledger {
            if !record.is_consistent() {
                found.push(format!("ledger out of bounds: quantity {quantity}, reserved {reserved}"));
            }
        }
        if self.move_totals.on_hand != quantity {
            found.push(format!(
                "on-hand {quantity} but moves sum to {}",
                self.move_totals.on_hand
            ));
        }
        if self.move_totals.reserved != reserved {
            found.push(format!(
                "reserved {reserved} but moves sum to {}",
                self.move_totals.reserved
            ));
        }
        if self.held_total != reserved {
            found.push(format!(
                "reserved {reserved} but held reservations total {}",
                self.held_total
            ));
        }
        found
    }
}

/// Read-only reconciliation over the ledger, move log and reservations.
#[derive(Debug, Clone)]
pub struct StockAuditor {
    db: Arc<Database>,
}

impl StockAuditor {
    pub fn new(db: Arc<Database>) -> Self {
        StockAuditor { db }
    }

    /// Reads the three sides of `key` from one snapshot.
    ///
    /// The reads share a transaction, so writers committing meanwhile show
    /// up in all three sides or in none.
    pub async fn reconcile(&self, key: &StockKey) -> EngineResult<ReconciliationReport> {
        let mut tx = self.db.begin().await?;
        let ledger = self.db.stock().get_level_in(&mut *tx, key).await?;
        let move_totals = self.db.moves().totals_for_key_in(&mut *tx, key).await?;
        let held_total = self.db.reservations().held_total_in(&mut *tx, key).await?;
        // Read-only; committing just ends the snapshot.
        self.db.commit(tx).await?;

        let report = ReconciliationReport {
            key: key.clone(),
            ledger,
            move_totals,
            held_total,
        };

        if report.is_consistent() {
            debug!(product_id = %key.product_id, size = %key.size, "Stock reconciled");
        } else {
            error!(
                product_id = %key.product_id,
                size = %key.size,
                discrepancies = ?report.discrepancies(),
                "Stock reconciliation failed"
            );
        }

        Ok(report)
    }

    /// Reconciles up to `limit` stocked keys and returns the broken ones.
    pub async fn reconcile_all(&self, limit: i64) -> EngineResult<Vec<ReconciliationReport>> {
        let mut broken = Vec::new();
        for record in self.db.stock().list_levels(limit).await? {
            let report = self.reconcile(&record.key()).await?;
            if !report.is_consistent() {
                broken.push(report);
            }
        }
        Ok(broken)
    }
}
