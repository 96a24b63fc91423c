//! # Repository Module
//!
//! Database repository implementations for the stock engine.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  ReservationManager                                                    │
//! │       │                                                                 │
//! │       │  let mut tx = db.begin().await?;                               │
//! │       │  db.stock().apply_delta_in(&mut tx, &key, delta, now)          │
//! │       │  db.reservations().insert_in(&mut tx, &reservation)            │
//! │       │  db.moves().append_in(&mut tx, &stock_move)                    │
//! │       │  tx.commit().await?;                                            │
//! │       ▼                                                                 │
//! │  StockLedger / ReservationRepository / MoveLog                         │
//! │       │                                                                 │
//! │       │  SQL                                                            │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  `*_in` methods run on a caller-supplied connection so several         │
//! │  repositories can share one transaction. The rest use the pool.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`StockLedger`](stock::StockLedger) - Guarded deltas on stock levels
//! - [`ReservationRepository`](reservation::ReservationRepository) - Reservation rows and transitions
//! - [`MoveLog`](moves::MoveLog) - Append-only audit trail

pub mod moves;
pub mod reservation;
pub mod stock;

use chrono::{DateTime, SubsecRound, Utc};

/// Truncates a timestamp to millisecond precision before it is stored.
///
/// Keeps every stored value in the same text shape so `<` on the column
/// compares chronologically.
pub(crate) fn db_time(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{Database, DbConfig};

    pub async fn memory_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }
}
