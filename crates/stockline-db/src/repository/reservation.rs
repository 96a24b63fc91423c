//! # Reservation Repository
//!
//! Rows for temporary holds and their one-way status transitions.
//!
//! ## First Transition Wins
//! ```text
//! Checkout commit ──┐                         ┌── 1 row  → Committed
//!                   ├─► UPDATE ... WHERE      │
//! Reaper expire  ───┘   id = ? AND            └── 0 rows → lost the race,
//!                       status = 'held'                    caller re-reads
//! ```
//!
//! The status guard sits in the UPDATE itself, so whichever transaction
//! takes the write lock first moves the row out of `held` and the other
//! matches nothing.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::db_time;
use crate::error::{DbError, DbResult};
use stockline_core::{Reservation, ReservationStatus, StockKey};

const RESERVATION_COLUMNS: &str = "id, product_id, size, quantity, session_id, user_id, order_id, \
     status, resolution_reason, created_at, expires_at, resolved_at";

/// Repository for reservation rows.
#[derive(Debug, Clone)]
pub struct ReservationRepository {
    pool: SqlitePool,
}

impl ReservationRepository {
    /// Creates a new ReservationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReservationRepository { pool }
    }

    /// Inserts a new `held` reservation.
    pub async fn insert_in(
        &self,
        conn: &mut SqliteConnection,
        reservation: &Reservation,
    ) -> DbResult<()> {
        debug!(
            reservation_id = %reservation.id,
            product_id = %reservation.product_id,
            size = %reservation.size,
            quantity = reservation.quantity,
            "Inserting reservation"
        );

        sqlx::query(
            r#"
            INSERT INTO reservations (
                id, product_id, size, quantity,
                session_id, user_id, order_id,
                status, resolution_reason,
                created_at, expires_at, resolved_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&reservation.id)
        .bind(&reservation.product_id)
        .bind(&reservation.size)
        .bind(reservation.quantity)
        .bind(&reservation.session_id)
        .bind(&reservation.user_id)
        .bind(&reservation.order_id)
        .bind(reservation.status)
        .bind(&reservation.resolution_reason)
        .bind(db_time(reservation.created_at))
        .bind(db_time(reservation.expires_at))
        .bind(reservation.resolved_at.map(db_time))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Gets a reservation by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Reservation>> {
        let reservation = sqlx::query_as::<_, Reservation>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(reservation)
    }

    /// Gets a reservation by ID on a caller-supplied connection.
    pub async fn get_by_id_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Reservation>> {
        let reservation = sqlx::query_as::<_, Reservation>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(reservation)
    }

    /// Moves a `held` reservation to a terminal status.
    ///
    /// Returns `None` when the row is missing or no longer `held`; the caller
    /// tells those apart with [`ReservationRepository::get_by_id_in`].
    /// `order_id`, when given, overwrites the stored one.
    pub async fn transition_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        to: ReservationStatus,
        order_id: Option<&str>,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> DbResult<Option<Reservation>> {
        if !to.is_terminal() {
            return Err(DbError::Internal(format!(
                "reservation {id} cannot transition back to {to}"
            )));
        }

        debug!(reservation_id = %id, to = %to, "Transitioning reservation");

        let reservation = sqlx::query_as::<_, Reservation>(&format!(
            r#"
            UPDATE reservations
               SET status = ?2,
                   order_id = COALESCE(?3, order_id),
                   resolution_reason = ?4,
                   resolved_at = ?5
             WHERE id = ?1
               AND status = 'held'
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(to)
        .bind(order_id)
        .bind(reason)
        .bind(db_time(at))
        .fetch_optional(&mut *conn)
        .await?;

        Ok(reservation)
    }

    /// Finds `held` reservations whose TTL passed before `now`, oldest first.
    ///
    /// Served by the `(status, expires_at)` index.
    pub async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS}
              FROM reservations
             WHERE status = 'held'
               AND expires_at < ?1
             ORDER BY expires_at
             LIMIT ?2
            "#
        ))
        .bind(db_time(now))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(reservations)
    }

    /// Sum of quantities still `held` against a key.
    pub async fn held_total(&self, key: &StockKey) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        self.held_total_in(&mut conn, key).await
    }

    pub async fn held_total_in(&self, conn: &mut SqliteConnection, key: &StockKey) -> DbResult<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)
              FROM reservations
             WHERE product_id = ?1 AND size = ?2 AND status = 'held'
            "#,
        )
        .bind(&key.product_id)
        .bind(&key.size)
        .fetch_one(&mut *conn)
        .await?;

        Ok(total)
    }

    /// Open holds for one browser session, newest first.
    pub async fn list_held_for_session(&self, session_id: &str) -> DbResult<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS}
              FROM reservations
             WHERE session_id = ?1 AND status = 'held'
             ORDER BY created_at DESC
            "#
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(reservations)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::memory_db;
    use chrono::Duration;
    use stockline_core::{Holder, ReservationStatus};

    fn held(key: &StockKey, quantity: i64, holder: Holder, expires_at: DateTime<Utc>) -> Reservation {
        Reservation {
            id: uuid::Uuid::new_v4().to_string(),
            product_id: key.product_id.clone(),
            size: key.size.clone(),
            quantity,
            session_id: holder.session_id,
            user_id: holder.user_id,
            order_id: holder.order_id,
            status: ReservationStatus::Held,
            resolution_reason: None,
            created_at: Utc::now(),
            expires_at,
            resolved_at: None,
        }
    }

    async fn setup() -> (crate::Database, StockKey) {
        let db = memory_db().await;
        let key = StockKey::new("TEE-BASIC", "M");
        let mut conn = db.pool().acquire().await.unwrap();
        db.stock().restock_in(&mut conn, &key, 10, Utc::now()).await.unwrap();
        (db, key)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (db, key) = setup().await;
        let repo = db.reservations();
        let r = held(&key, 2, Holder::session("sess-1"), Utc::now() + Duration::minutes(15));

        let mut conn = db.pool().acquire().await.unwrap();
        repo.insert_in(&mut conn, &r).await.unwrap();
        drop(conn);

        let loaded = repo.get_by_id(&r.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ReservationStatus::Held);
        assert_eq!(loaded.session_id.as_deref(), Some("sess-1"));
        assert_eq!(loaded.quantity, 2);
        assert!(repo.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_is_first_wins() {
        let (db, key) = setup().await;
        let repo = db.reservations();
        let r = held(&key, 1, Holder::user("user-1"), Utc::now() + Duration::minutes(15));

        let mut conn = db.pool().acquire().await.unwrap();
        repo.insert_in(&mut conn, &r).await.unwrap();

        let committed = repo
            .transition_in(&mut conn, &r.id, ReservationStatus::Committed, Some("order-1"), None, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(committed.status, ReservationStatus::Committed);
        assert_eq!(committed.order_id.as_deref(), Some("order-1"));
        assert!(committed.resolved_at.is_some());

        let second = repo
            .transition_in(&mut conn, &r.id, ReservationStatus::Expired, None, Some("expired"), Utc::now())
            .await
            .unwrap();
        assert!(second.is_none());

        let current = repo.get_by_id_in(&mut conn, &r.id).await.unwrap().unwrap();
        assert_eq!(current.status, ReservationStatus::Committed);
    }

    #[tokio::test]
    async fn test_transition_to_held_is_refused() {
        let (db, _) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let err = db
            .reservations()
            .transition_in(&mut conn, "any", ReservationStatus::Held, None, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Internal(_)));
    }

    #[tokio::test]
    async fn test_find_expired_and_totals() {
        let (db, key) = setup().await;
        let repo = db.reservations();
        let now = Utc::now();

        let stale = held(&key, 2, Holder::session("sess-1"), now - Duration::seconds(1));
        let fresh = held(&key, 3, Holder::session("sess-1"), now + Duration::minutes(15));

        let mut conn = db.pool().acquire().await.unwrap();
        repo.insert_in(&mut conn, &stale).await.unwrap();
        repo.insert_in(&mut conn, &fresh).await.unwrap();
        drop(conn);

        let expired = repo.find_expired(now, 10).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);

        assert_eq!(repo.held_total(&key).await.unwrap(), 5);
        assert_eq!(repo.list_held_for_session("sess-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reservation_requires_stock_row() {
        let db = memory_db().await;
        let r = held(
            &StockKey::new("GHOST", "1"),
            1,
            Holder::session("s"),
            Utc::now() + Duration::minutes(1),
        );
        let mut conn = db.pool().acquire().await.unwrap();
        let err = db.reservations().insert_in(&mut conn, &r).await.unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
    }
}
