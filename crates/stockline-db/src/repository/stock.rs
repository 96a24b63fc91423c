//! # Stock Ledger
//!
//! The durable `(product_id, size) → {quantity, reserved_quantity}` table and
//! its single mutation primitive.
//!
//! ## Guarded Delta
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  apply_delta(key, {on_hand: a, reserved: r})                           │
//! │                                                                         │
//! │  UPDATE stock_levels                                                   │
//! │     SET quantity = quantity + a,                                       │
//! │         reserved_quantity = reserved_quantity + r,                     │
//! │         version = version + 1                                          │
//! │   WHERE key matches                                                    │
//! │     AND reserved_quantity + r >= 0              ◄── invariant checked   │
//! │     AND reserved_quantity + r <= quantity + a   ◄── by the same stmt    │
//! │  RETURNING *                                                           │
//! │       │                                                                 │
//! │       ├── 1 row  → new StockRecord                                     │
//! │       │                                                                 │
//! │       └── 0 rows → re-read in the same transaction                     │
//! │                     ├── no row  → DbError::NotFound                    │
//! │                     └── row     → DbError::DeltaRejected { current }   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The check and the write are one statement executed under SQLite's write
//! lock, so there is no window in which a concurrent writer on the same key
//! can observe or change the row between them. Nothing in this crate reads a
//! level, computes a new value and writes it back.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::db_time;
use crate::error::{DbError, DbResult};
use stockline_core::{StockDelta, StockKey, StockRecord};

const RECORD_COLUMNS: &str =
    "product_id, size, quantity, reserved_quantity, version, created_at, updated_at";

/// Repository for stock levels.
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
}

impl StockLedger {
    /// Creates a new StockLedger.
    pub fn new(pool: SqlitePool) -> Self {
        StockLedger { pool }
    }

    /// Gets the current level for a key.
    pub async fn get_level(&self, key: &StockKey) -> DbResult<Option<StockRecord>> {
        let record = sqlx::query_as::<_, StockRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM stock_levels WHERE product_id = ?1 AND size = ?2"
        ))
        .bind(&key.product_id)
        .bind(&key.size)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Same as [`StockLedger::get_level`] on a caller-supplied connection.
    pub async fn get_level_in(
        &self,
        conn: &mut SqliteConnection,
        key: &StockKey,
    ) -> DbResult<Option<StockRecord>> {
        let record = sqlx::query_as::<_, StockRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM stock_levels WHERE product_id = ?1 AND size = ?2"
        ))
        .bind(&key.product_id)
        .bind(&key.size)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(record)
    }

    /// Lists levels ordered by product then size.
    pub async fn list_levels(&self, limit: i64) -> DbResult<Vec<StockRecord>> {
        let records = sqlx::query_as::<_, StockRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM stock_levels ORDER BY product_id, size LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Lists every size of one product.
    pub async fn list_for_product(&self, product_id: &str) -> DbResult<Vec<StockRecord>> {
        let records = sqlx::query_as::<_, StockRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM stock_levels WHERE product_id = ?1 ORDER BY size"
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Applies a delta in its own transaction.
    pub async fn apply_delta(
        &self,
        key: &StockKey,
        delta: StockDelta,
        at: DateTime<Utc>,
    ) -> DbResult<StockRecord> {
        let mut tx = self.pool.begin().await?;
        let record = self.apply_delta_in(&mut tx, key, delta, at).await?;
        tx.commit().await?;
        Ok(record)
    }

    /// Applies a delta on the caller's connection, usually inside a
    /// transaction that also writes a reservation and a move.
    ///
    /// ## Errors
    /// - [`DbError::NotFound`] if the key has no stock row
    /// - [`DbError::DeltaRejected`] if the result would break the invariant;
    ///   nothing was written
    pub async fn apply_delta_in(
        &self,
        conn: &mut SqliteConnection,
        key: &StockKey,
        delta: StockDelta,
        at: DateTime<Utc>,
    ) -> DbResult<StockRecord> {
        debug!(
            product_id = %key.product_id,
            size = %key.size,
            on_hand = delta.on_hand,
            reserved = delta.reserved,
            "Applying stock delta"
        );

        let updated = sqlx::query_as::<_, StockRecord>(&format!(
            r#"
            UPDATE stock_levels
               SET quantity = quantity + ?3,
                   reserved_quantity = reserved_quantity + ?4,
                   version = version + 1,
                   updated_at = ?5
             WHERE product_id = ?1
               AND size = ?2
               AND reserved_quantity + ?4 >= 0
               AND reserved_quantity + ?4 <= quantity + ?3
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(&key.product_id)
        .bind(&key.size)
        .bind(delta.on_hand)
        .bind(delta.reserved)
        .bind(db_time(at))
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(record) = updated {
            return Ok(record);
        }

        match self.get_level_in(conn, key).await? {
            None => Err(DbError::not_found("StockRecord", key.to_string())),
            Some(current) => Err(DbError::DeltaRejected {
                current: Box::new(current),
                delta,
            }),
        }
    }

    /// Adds on-hand units, creating the row with nothing reserved if the key
    /// is new.
    pub async fn restock_in(
        &self,
        conn: &mut SqliteConnection,
        key: &StockKey,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> DbResult<StockRecord> {
        debug!(
            product_id = %key.product_id,
            size = %key.size,
            quantity,
            "Restocking"
        );

        let record = sqlx::query_as::<_, StockRecord>(&format!(
            r#"
            INSERT INTO stock_levels (
                product_id, size, quantity, reserved_quantity, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, 0, 1, ?4, ?4)
            ON CONFLICT (product_id, size) DO UPDATE
               SET quantity = quantity + excluded.quantity,
                   version = version + 1,
                   updated_at = excluded.updated_at
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(&key.product_id)
        .bind(&key.size)
        .bind(quantity)
        .bind(db_time(at))
        .fetch_one(&mut *conn)
        .await?;

        Ok(record)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::memory_db;

    async fn seeded(quantity: i64) -> (crate::Database, StockKey) {
        let db = memory_db().await;
        let key = StockKey::new("SNEAKER-001", "10");
        let mut conn = db.pool().acquire().await.unwrap();
        db.stock()
            .restock_in(&mut conn, &key, quantity, Utc::now())
            .await
            .unwrap();
        (db, key)
    }

    #[tokio::test]
    async fn test_restock_creates_then_increments() {
        let (db, key) = seeded(5).await;
        let level = db.stock().get_level(&key).await.unwrap().unwrap();
        assert_eq!((level.quantity, level.reserved_quantity, level.version), (5, 0, 1));

        let mut conn = db.pool().acquire().await.unwrap();
        let level = db
            .stock()
            .restock_in(&mut conn, &key, 3, Utc::now())
            .await
            .unwrap();
        assert_eq!((level.quantity, level.version), (8, 2));
    }

    #[tokio::test]
    async fn test_apply_delta_moves_both_columns() {
        let (db, key) = seeded(5).await;
        let ledger = db.stock();

        let held = ledger
            .apply_delta(&key, StockDelta::reserve(2), Utc::now())
            .await
            .unwrap();
        assert_eq!((held.quantity, held.reserved_quantity), (5, 2));
        assert_eq!(held.available_quantity(), 3);

        let sold = ledger
            .apply_delta(&key, StockDelta::commit(2), Utc::now())
            .await
            .unwrap();
        assert_eq!((sold.quantity, sold.reserved_quantity), (3, 0));
        assert_eq!(sold.version, 3);
    }

    #[tokio::test]
    async fn test_rejected_delta_changes_nothing() {
        let (db, key) = seeded(3).await;
        let ledger = db.stock();

        let err = ledger
            .apply_delta(&key, StockDelta::reserve(4), Utc::now())
            .await
            .unwrap_err();
        match err {
            DbError::DeltaRejected { current, delta } => {
                assert_eq!(current.quantity, 3);
                assert_eq!(delta, StockDelta::reserve(4));
            }
            other => panic!("expected DeltaRejected, got {other:?}"),
        }

        let err = ledger
            .apply_delta(&key, StockDelta::release(1), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::DeltaRejected { .. }));

        let level = ledger.get_level(&key).await.unwrap().unwrap();
        assert_eq!((level.quantity, level.reserved_quantity, level.version), (3, 0, 1));
    }

    #[tokio::test]
    async fn test_unknown_key_is_not_found() {
        let db = memory_db().await;
        let err = db
            .stock()
            .apply_delta(&StockKey::new("NOPE", "1"), StockDelta::adjust(1), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_check_constraint_backs_the_guard() {
        let (db, key) = seeded(1).await;
        let err = sqlx::query(
            "UPDATE stock_levels SET reserved_quantity = 2 WHERE product_id = ?1 AND size = ?2",
        )
        .bind(&key.product_id)
        .bind(&key.size)
        .execute(db.pool())
        .await
        .map_err(DbError::from)
        .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_list_levels() {
        let (db, _) = seeded(1).await;
        let mut conn = db.pool().acquire().await.unwrap();
        db.stock()
            .restock_in(&mut conn, &StockKey::new("SNEAKER-001", "11"), 2, Utc::now())
            .await
            .unwrap();
        drop(conn);

        let levels = db.stock().list_levels(10).await.unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].size, "10");

        let sizes = db.stock().list_for_product("SNEAKER-001").await.unwrap();
        assert_eq!(sizes.len(), 2);
    }
}
