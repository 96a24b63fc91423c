//! # Stock Deltas
//!
//! Every ledger mutation is expressed as a [`StockDelta`]: a signed change to
//! on-hand units paired with a signed change to reserved units.
//!
//! ## Delta Table
//! ```text
//! Operation     on_hand   reserved   available
//! ─────────     ───────   ────────   ─────────
//! reserve(q)       0         +q         -q
//! commit(q)       -q         -q          0
//! release(q)       0         -q         +q
//! adjust(d)       ±d          0         ±d
//! restock(q)      +q          0         +q
//! ```
//!
//! ## Acceptance Rule
//! A delta is accepted only when the resulting record still satisfies
//! `0 <= reserved <= quantity`. The same rule is enforced by the SQL guard in
//! stockline-db; [`StockRecord::checked_apply`] exists so that the rejection
//! can be classified into a caller-facing error.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{MoveType, StockRecord};

/// A signed change to one stock record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockDelta {
    pub on_hand: i64,
    pub reserved: i64,
}

impl StockDelta {
    pub const fn new(on_hand: i64, reserved: i64) -> Self {
        StockDelta { on_hand, reserved }
    }

    /// Hold `quantity` units for a shopper.
    pub const fn reserve(quantity: i64) -> Self {
        StockDelta::new(0, quantity)
    }

    /// Convert held units into a sale.
    pub const fn commit(quantity: i64) -> Self {
        StockDelta::new(-quantity, -quantity)
    }

    /// Return held units to availability.
    pub const fn release(quantity: i64) -> Self {
        StockDelta::new(0, -quantity)
    }

    /// Manual correction of on-hand units (damage, recount, ...).
    pub const fn adjust(delta: i64) -> Self {
        StockDelta::new(delta, 0)
    }

    /// New units received.
    pub const fn restock(quantity: i64) -> Self {
        StockDelta::new(quantity, 0)
    }

    /// The delta a move of `move_type` with `quantity` applies.
    ///
    /// For `Adjustment` the sign of `quantity` is kept; every other kind uses
    /// its magnitude.
    pub fn for_move(move_type: MoveType, quantity: i64) -> Self {
        match move_type {
            MoveType::Reserve => StockDelta::reserve(quantity.abs()),
            MoveType::Commit => StockDelta::commit(quantity.abs()),
            MoveType::Release => StockDelta::release(quantity.abs()),
            MoveType::Adjustment => StockDelta::adjust(quantity),
            MoveType::Restock => StockDelta::restock(quantity.abs()),
        }
    }

    /// Signed change to available units.
    #[inline]
    pub const fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }

    /// Returns true if the delta changes nothing.
    pub const fn is_zero(&self) -> bool {
        self.on_hand == 0 && self.reserved == 0
    }
}

impl std::ops::Add for StockDelta {
    type Output = StockDelta;

    fn add(self, rhs: StockDelta) -> StockDelta {
        StockDelta::new(self.on_hand + rhs.on_hand, self.reserved + rhs.reserved)
    }
}

impl std::iter::Sum for StockDelta {
    fn sum<I: Iterator<Item = StockDelta>>(iter: I) -> StockDelta {
        iter.fold(StockDelta::default(), |acc, d| acc + d)
    }
}

impl Default for StockDelta {
    fn default() -> Self {
        StockDelta::new(0, 0)
    }
}

// =============================================================================
// Applying Deltas
// =============================================================================

impl StockRecord {
    /// Applies `delta` if the result keeps `0 <= reserved <= quantity`.
    ///
    /// Returns the updated record with `version` bumped. `updated_at` is left
    /// for the caller to stamp.
    ///
    /// ## Errors
    /// - [`CoreError::InvariantViolation`] when reserved would go negative
    ///   (a release or commit larger than what is held)
    /// - [`CoreError::InsufficientStock`] when reserved would exceed on-hand
    pub fn checked_apply(&self, delta: StockDelta) -> CoreResult<StockRecord> {
        let quantity = self.quantity + delta.on_hand;
        let reserved = self.reserved_quantity + delta.reserved;

        if reserved < 0 {
            return Err(CoreError::InvariantViolation {
                product_id: self.product_id.clone(),
                size: self.size.clone(),
                quantity: self.quantity,
                reserved: self.reserved_quantity,
                on_hand_delta: delta.on_hand,
                reserved_delta: delta.reserved,
            });
        }

        if reserved > quantity {
            return Err(CoreError::InsufficientStock {
                product_id: self.product_id.clone(),
                size: self.size.clone(),
                available: self.available_quantity().max(0),
                requested: (-delta.available()).max(0),
            });
        }

        Ok(StockRecord {
            quantity,
            reserved_quantity: reserved,
            version: self.version + 1,
            ..self.clone()
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
