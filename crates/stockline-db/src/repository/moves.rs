//! # Move Log
//!
//! Append-only audit trail: one row per ledger mutation, written in the same
//! transaction as the mutation itself. Triggers abort any UPDATE or DELETE on
//! `stock_moves`, so this repository only ever inserts and reads.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::db_time;
use crate::error::DbResult;
use stockline_core::{StockDelta, StockKey, StockMove};

const MOVE_COLUMNS: &str = "id, product_id, size, move_type, on_hand_delta, reserved_delta, \
     reference_id, reference_type, reason, actor, created_at";

/// Repository for stock moves.
#[derive(Debug, Clone)]
pub struct MoveLog {
    pool: SqlitePool,
}

impl MoveLog {
    pub fn new(pool: SqlitePool) -> Self {
        MoveLog { pool }
    }

    /// Appends a move on the caller's transaction.
    pub async fn append_in(&self, conn: &mut SqliteConnection, mv: &StockMove) -> DbResult<()> {
        debug!(
            move_id = %mv.id,
            product_id = %mv.product_id,
            size = %mv.size,
            move_type = %mv.move_type,
            "Appending stock move"
        );

        sqlx::query(
            r#"
            INSERT INTO stock_moves (
                id, product_id, size, move_type,
                on_hand_delta, reserved_delta,
                reference_id, reference_type, reason, actor, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&mv.id)
        .bind(&mv.product_id)
        .bind(&mv.size)
        .bind(mv.move_type)
        .bind(mv.on_hand_delta)
        .bind(mv.reserved_delta)
        .bind(&mv.reference_id)
        .bind(mv.reference_type)
        .bind(&mv.reason)
        .bind(&mv.actor)
        .bind(db_time(mv.created_at))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Most recent moves for a key, newest first.
    pub async fn list_for_key(&self, key: &StockKey, limit: i64) -> DbResult<Vec<StockMove>> {
        let moves = sqlx::query_as::<_, StockMove>(&format!(
            r#"
            SELECT {MOVE_COLUMNS}
              FROM stock_moves
             WHERE product_id = ?1 AND size = ?2
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3
            "#
        ))
        .bind(&key.product_id)
        .bind(&key.size)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(moves)
    }

    /// Every move recorded against a reservation or order, oldest first.
    pub async fn list_for_reference(&self, reference_id: &str) -> DbResult<Vec<StockMove>> {
        let moves = sqlx::query_as::<_, StockMove>(&format!(
            r#"
            SELECT {MOVE_COLUMNS}
              FROM stock_moves
             WHERE reference_id = ?1
             ORDER BY created_at, rowid
            "#
        ))
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(moves)
    }

    /// Sum of every delta ever logged for a key.
    ///
    /// Replaying the log from zero must land on the ledger's current
    /// quantity and reserved quantity.
    pub async fn totals_for_key(&self, key: &StockKey) -> DbResult<StockDelta> {
        let mut conn = self.pool.acquire().await?;
        self.totals_for_key_in(&mut conn, key).await
    }

    /// [`MoveLog::totals_for_key`] on the caller's connection or transaction.
    pub async fn totals_for_key_in(
        &self,
        conn: &mut SqliteConnection,
        key: &StockKey,
    ) -> DbResult<StockDelta> {
        let (on_hand, reserved): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(on_hand_delta), 0), COALESCE(SUM(reserved_delta), 0)
              FROM stock_moves
             WHERE product_id = ?1 AND size = ?2
            "#,
        )
        .bind(&key.product_id)
        .bind(&key.size)
        .fetch_one(&mut *conn)
        .await?;

        Ok(StockDelta::new(on_hand, reserved))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
