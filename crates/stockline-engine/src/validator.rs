//! # Cart Stock Validator
//!
//! Answers "can this cart still be reserved?" without reserving anything.
//!
//! The answer is advisory. Another shopper can take the last unit a moment
//! later; only [`ReservationManager::reserve`] decides.
//!
//! [`ReservationManager::reserve`]: crate::reservation::ReservationManager::reserve

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use stockline_core::validation::{validate_cart_line, validate_cart_size};
use stockline_core::{CartAvailability, CartLine, LineAvailability, StockKey};
use stockline_db::Database;

use crate::error::EngineResult;

/// Read-only view of the ledger for cart checks.
#[derive(Debug, Clone)]
pub struct CartStockValidator {
    db: Arc<Database>,
}

impl CartStockValidator {
    pub fn new(db: Arc<Database>) -> Self {
        CartStockValidator { db }
    }

    /// Checks every line against current availability.
    ///
    /// Lines for the same key are judged on their combined quantity, since
    /// reserving them all would need that many units. Keys that were never
    /// stocked report nothing available.
    pub async fn check(&self, lines: &[CartLine]) -> EngineResult<CartAvailability> {
        validate_cart_size(lines.len())?;
        for line in lines {
            validate_cart_line(line)?;
        }

        let mut wanted: HashMap<StockKey, i64> = HashMap::new();
        for line in lines {
            *wanted.entry(line.key()).or_default() += line.requested_quantity;
        }

        let stock = self.db.stock();
        let mut available: HashMap<StockKey, i64> = HashMap::with_capacity(wanted.len());
        for key in wanted.keys() {
            let level = stock
                .get_level(key)
                .await?
                .map_or(0, |record| record.available_quantity());
            available.insert(key.clone(), level);
        }

        let lines: Vec<LineAvailability> = lines
            .iter()
            .map(|line| {
                let key = line.key();
                let available_quantity = available.get(&key).copied().unwrap_or(0);
                let total = wanted.get(&key).copied().unwrap_or(line.requested_quantity);
                LineAvailability {
                    product_id: line.product_id.clone(),
                    size: line.size.clone(),
                    requested_quantity: line.requested_quantity,
                    available: total <= available_quantity,
                    available_quantity,
                }
            })
            .collect();

        let result = CartAvailability { lines };
        debug!(
            lines = result.lines.len(),
            all_available = result.all_available(),
            "Cart availability checked"
        );
        Ok(result)
    }
}
