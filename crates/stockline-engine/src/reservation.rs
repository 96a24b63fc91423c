//! # Reservation Manager
//!
//! Reserve, commit, release and expire holds against the stock ledger, plus
//! the two administrative mutations (adjust, restock).
//!
//! ## One Operation, One Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  reserve(key, q, holder, ttl)                                           │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │   ├── UPDATE stock_levels ... WHERE invariant holds after +q reserved  │
//! │   │     └── 0 rows → re-read → InsufficientStock (ROLLBACK)            │
//! │   ├── INSERT reservations (status = held, expires_at = now + ttl)      │
//! │   └── INSERT stock_moves (reserve)                                     │
//! │  COMMIT ──► publish StockChangeEvent                                   │
//! │                                                                         │
//! │  commit / release / expire(reservation_id)                             │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │   ├── UPDATE reservations SET status = ... WHERE status = 'held'       │
//! │   │     └── 0 rows → NotFound or AlreadyTerminal (ROLLBACK)            │
//! │   ├── UPDATE stock_levels (commit: -q/-q, release/expire: 0/-q)        │
//! │   └── INSERT stock_moves                                               │
//! │  COMMIT ──► publish StockChangeEvent                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every transaction opens with a write, so SQLite hands out the write lock
//! before anything is read and writers on the same key run one at a time.
//! The compare-and-set on `status = 'held'` is what makes commit, release and
//! the reaper race safely: the first transition wins, the rest observe
//! `AlreadyTerminal` and change nothing.
//!
//! Lock contention is retried through [`RetryPolicy`]; each retry replays the
//! whole transaction.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use stockline_core::validation::{
    validate_adjustment, validate_holder, validate_order_id, validate_product_id,
    validate_quantity, validate_reason, validate_reservation_id, validate_restock_quantity,
    validate_size, validate_ttl_minutes,
};
use stockline_core::{
    Holder, MoveType, ReferenceType, Reservation, ReservationStatus, StockChangeEvent, StockDelta,
    StockKey, StockMove, StockRecord, ValidationError,
};
use stockline_db::{Database, DbError};

use crate::clock::Clock;
use crate::config::ReservationSettings;
use crate::error::{EngineError, EngineResult};
use crate::notifier::StockChangeNotifier;
use crate::retry::RetryPolicy;

/// Actor and reason recorded on expiry moves.
pub const REAPER_ACTOR: &str = "reaper";
pub const EXPIRED_REASON: &str = "expired";

// =============================================================================
// Admin Context
// =============================================================================

/// Proof that the caller is a trusted back-office actor.
///
/// Required by [`ReservationManager::adjust`] and
/// [`ReservationManager::restock`]; storefront code never holds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminContext {
    actor: String,
}

impl AdminContext {
    pub fn new(actor: impl Into<String>) -> EngineResult<Self> {
        let actor = actor.into();
        if actor.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "actor".to_string(),
            }
            .into());
        }
        Ok(AdminContext { actor })
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }
}

/// One terminal transition of a held reservation.
#[derive(Debug)]
struct Resolution<'a> {
    operation: &'static str,
    reservation_id: &'a str,
    to: ReservationStatus,
    order_id: Option<&'a str>,
    reason: Option<&'a str>,
    /// Overrides the holder as the move's actor.
    actor: Option<&'a str>,
}

impl Resolution<'_> {
    fn move_type(&self) -> MoveType {
        match self.to {
            ReservationStatus::Committed => MoveType::Commit,
            _ => MoveType::Release,
        }
    }

    fn delta(&self, quantity: i64) -> StockDelta {
        match self.to {
            ReservationStatus::Committed => StockDelta::commit(quantity),
            _ => StockDelta::release(quantity),
        }
    }
}

// =============================================================================
// Reservation Manager
// =============================================================================

/// Orchestrates every ledger mutation.
///
/// Cheap to clone; clones share the pool, clock and notifier.
#[derive(Debug, Clone)]
pub struct ReservationManager {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    notifier: StockChangeNotifier,
    retry: RetryPolicy,
    settings: ReservationSettings,
}

impl ReservationManager {
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        notifier: StockChangeNotifier,
        retry: RetryPolicy,
        settings: ReservationSettings,
    ) -> Self {
        ReservationManager {
            db,
            clock,
            notifier,
            retry,
            settings,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn notifier(&self) -> &StockChangeNotifier {
        &self.notifier
    }

    pub fn settings(&self) -> &ReservationSettings {
        &self.settings
    }

    /// Current time at the precision the database stores.
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(3)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current ledger row for a key, if it was ever stocked.
    pub async fn get_level(&self, key: &StockKey) -> EngineResult<Option<StockRecord>> {
        Ok(self.db.stock().get_level(key).await?)
    }

    pub async fn get_reservation(&self, reservation_id: &str) -> EngineResult<Option<Reservation>> {
        validate_reservation_id(reservation_id)?;
        Ok(self.db.reservations().get_by_id(reservation_id).await?)
    }

    // =========================================================================
    // Reserve
    // =========================================================================

    /// Holds `quantity` units of `key` for `holder`.
    ///
    /// `ttl_minutes` falls back to the configured default. An unknown key
    /// has nothing available and fails with `InsufficientStock`.
    ///
    /// ## Errors
    /// - `Validation` for bad input; nothing touched
    /// - `InsufficientStock` with the current available quantity
    /// - `StorageFailure` when contention outlasted the retry policy
    pub async fn reserve(
        &self,
        key: &StockKey,
        quantity: i64,
        holder: &Holder,
        ttl_minutes: Option<i64>,
    ) -> EngineResult<Reservation> {
        self.reserve_with_level(key, quantity, holder, ttl_minutes)
            .await
            .map(|(reservation, _)| reservation)
    }

    /// [`ReservationManager::reserve`], also returning the ledger row as
    /// this transaction committed it.
    pub async fn reserve_with_level(
        &self,
        key: &StockKey,
        quantity: i64,
        holder: &Holder,
        ttl_minutes: Option<i64>,
    ) -> EngineResult<(Reservation, StockRecord)> {
        validate_product_id(&key.product_id)?;
        validate_size(&key.size)?;
        validate_quantity(quantity)?;
        validate_holder(holder)?;
        let ttl = ttl_minutes.unwrap_or(self.settings.default_ttl_minutes);
        validate_ttl_minutes(ttl, self.settings.max_ttl_minutes)?;

        let now = self.now();
        let reservation = Reservation {
            id: Uuid::new_v4().to_string(),
            product_id: key.product_id.clone(),
            size: key.size.clone(),
            quantity,
            session_id: non_blank(&holder.session_id),
            user_id: non_blank(&holder.user_id),
            order_id: non_blank(&holder.order_id),
            status: ReservationStatus::Held,
            resolution_reason: None,
            created_at: now,
            expires_at: now + Duration::minutes(ttl),
            resolved_at: None,
        };

        let result = self
            .retry
            .run("reserve", || self.reserve_once(&reservation, now))
            .await;

        match result {
            Ok(record) => {
                info!(
                    reservation_id = %reservation.id,
                    product_id = %key.product_id,
                    size = %key.size,
                    quantity,
                    available = record.available_quantity(),
                    expires_at = %reservation.expires_at,
                    "Stock reserved"
                );
                self.publish(&record, MoveType::Reserve, now);
                Ok((reservation, record))
            }
            Err(e) => {
                report("reserve", Some(key), Some(&reservation.id), &e);
                Err(e)
            }
        }
    }

    async fn reserve_once(
        &self,
        reservation: &Reservation,
        now: DateTime<Utc>,
    ) -> EngineResult<StockRecord> {
        let key = reservation.key();
        let delta = StockDelta::reserve(reservation.quantity);
        let mut tx = self.db.begin().await?;

        let applied = self.db.stock().apply_delta_in(&mut *tx, &key, delta, now).await;
        let record = match applied {
            Ok(record) => record,
            Err(DbError::NotFound { .. }) => {
                return Err(EngineError::InsufficientStock {
                    product_id: key.product_id,
                    size: key.size,
                    available: 0,
                    requested: reservation.quantity,
                })
            }
            Err(e) => return Err(e.into()),
        };

        self.db.reservations().insert_in(&mut *tx, reservation).await?;

        let holder = reservation.holder();
        let mv = StockMove::new(&key, MoveType::Reserve, delta, now)
            .referencing(&reservation.id, ReferenceType::Reservation)
            .with_actor(holder.actor());
        self.db.moves().append_in(&mut *tx, &mv).await?;

        self.db.commit(tx).await?;
        Ok(record)
    }

    // =========================================================================
    // Terminal Transitions
    // =========================================================================

    /// Turns a held reservation into a sale for `order_id`.
    ///
    /// A reservation past its TTL that the reaper has not reached yet still
    /// commits; whichever transition lands first wins.
    ///
    /// ## Errors
    /// - `ReservationNotFound` for an unknown id
    /// - `AlreadyTerminal` if it was committed, released or expired already;
    ///   the ledger is not touched
    pub async fn commit(&self, reservation_id: &str, order_id: &str) -> EngineResult<Reservation> {
        validate_reservation_id(reservation_id)?;
        validate_order_id(order_id)?;

        self.resolve(Resolution {
            operation: "commit",
            reservation_id,
            to: ReservationStatus::Committed,
            order_id: Some(order_id),
            reason: None,
            actor: None,
        })
        .await
    }

    /// Returns a held reservation's units to availability.
    ///
    /// Same idempotency guard as [`ReservationManager::commit`].
    pub async fn release(&self, reservation_id: &str, reason: &str) -> EngineResult<Reservation> {
        validate_reservation_id(reservation_id)?;
        validate_reason(reason)?;

        self.resolve(Resolution {
            operation: "release",
            reservation_id,
            to: ReservationStatus::Released,
            order_id: None,
            reason: Some(reason),
            actor: None,
        })
        .await
    }

    /// Releases a reservation on behalf of the reaper, marking it `expired`.
    ///
    /// Does not check the TTL itself; the reaper only passes ids it found
    /// past their `expires_at`.
    pub async fn expire(&self, reservation_id: &str) -> EngineResult<Reservation> {
        validate_reservation_id(reservation_id)?;

        self.resolve(Resolution {
            operation: "expire",
            reservation_id,
            to: ReservationStatus::Expired,
            order_id: None,
            reason: Some(EXPIRED_REASON),
            actor: Some(REAPER_ACTOR),
        })
        .await
    }

    async fn resolve(&self, resolution: Resolution<'_>) -> EngineResult<Reservation> {
        let now = self.now();
        let result = self
            .retry
            .run(resolution.operation, || self.resolve_once(&resolution, now))
            .await;

        match result {
            Ok((reservation, record)) => {
                info!(
                    operation = resolution.operation,
                    reservation_id = %reservation.id,
                    product_id = %reservation.product_id,
                    size = %reservation.size,
                    quantity = reservation.quantity,
                    status = %reservation.status,
                    available = record.available_quantity(),
                    "Reservation resolved"
                );
                self.publish(&record, resolution.move_type(), now);
                Ok(reservation)
            }
            Err(e) => {
                report(resolution.operation, None, Some(resolution.reservation_id), &e);
                Err(e)
            }
        }
    }

    async fn resolve_once(
        &self,
        resolution: &Resolution<'_>,
        now: DateTime<Utc>,
    ) -> EngineResult<(Reservation, StockRecord)> {
        let reservations = self.db.reservations();
        let mut tx = self.db.begin().await?;

        let transitioned = reservations
            .transition_in(
                &mut *tx,
                resolution.reservation_id,
                resolution.to,
                resolution.order_id,
                resolution.reason,
                now,
            )
            .await?;

        let Some(reservation) = transitioned else {
            return Err(
                match reservations.get_by_id_in(&mut *tx, resolution.reservation_id).await? {
                    None => EngineError::ReservationNotFound {
                        reservation_id: resolution.reservation_id.to_string(),
                    },
                    Some(existing) => EngineError::AlreadyTerminal {
                        reservation_id: existing.id,
                        status: existing.status,
                    },
                },
            );
        };

        let key = reservation.key();
        let delta = resolution.delta(reservation.quantity);
        let record = self
            .db
            .stock()
            .apply_delta_in(&mut *tx, &key, delta, now)
            .await
            .map_err(|e| match e {
                DbError::NotFound { .. } => EngineError::InvariantViolation(format!(
                    "reservation {} holds {key} but the stock row is gone",
                    reservation.id
                )),
                other => other.into(),
            })?;

        let (reference_id, reference_type) = match resolution.order_id {
            Some(order_id) => (order_id, ReferenceType::Order),
            None => (resolution.reservation_id, ReferenceType::Reservation),
        };
        let holder = reservation.holder();
        let mv = StockMove::new(&key, resolution.move_type(), delta, now)
            .referencing(reference_id, reference_type)
            .with_reason(resolution.reason)
            .with_actor(resolution.actor.or(holder.actor()));
        self.db.moves().append_in(&mut *tx, &mv).await?;

        self.db.commit(tx).await?;
        Ok((reservation, record))
    }

    // =========================================================================
    // Administrative Mutations
    // =========================================================================

    /// Manual on-hand correction (write-off, recount). Reservations are not
    /// consulted; the invariant still is.
    ///
    /// ## Errors
    /// - `StockRecordNotFound` for a key that was never stocked
    /// - `InsufficientStock` if the write-off would cut into reserved units
    pub async fn adjust(
        &self,
        admin: &AdminContext,
        key: &StockKey,
        delta: i64,
        reason: &str,
    ) -> EngineResult<StockRecord> {
        validate_product_id(&key.product_id)?;
        validate_size(&key.size)?;
        validate_adjustment(delta)?;
        if reason.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "reason".to_string(),
            }
            .into());
        }
        validate_reason(reason)?;

        let now = self.now();
        let result = self
            .retry
            .run("adjust", || self.adjust_once(admin, key, delta, reason, now))
            .await;

        match result {
            Ok(record) => {
                info!(
                    actor = admin.actor(),
                    product_id = %key.product_id,
                    size = %key.size,
                    delta,
                    quantity = record.quantity,
                    reason,
                    "Stock adjusted"
                );
                self.publish(&record, MoveType::Adjustment, now);
                Ok(record)
            }
            Err(e) => {
                report("adjust", Some(key), None, &e);
                Err(e)
            }
        }
    }

    /// Adds delivered units, creating the stock row if the key is new.
    pub async fn restock(
        &self,
        admin: &AdminContext,
        key: &StockKey,
        quantity: i64,
        reason: Option<&str>,
    ) -> EngineResult<StockRecord> {
        validate_product_id(&key.product_id)?;
        validate_size(&key.size)?;
        validate_restock_quantity(quantity)?;
        if let Some(reason) = reason {
            validate_reason(reason)?;
        }

        let now = self.now();
        let result = self
            .retry
            .run("restock", || self.restock_once(admin, key, quantity, reason, now))
            .await;

        match result {
            Ok(record) => {
                info!(
                    actor = admin.actor(),
                    product_id = %key.product_id,
                    size = %key.size,
                    quantity,
                    on_hand = record.quantity,
                    "Stock restocked"
                );
                self.publish(&record, MoveType::Restock, now);
                Ok(record)
            }
            Err(e) => {
                report("restock", Some(key), None, &e);
                Err(e)
            }
        }
    }

    async fn adjust_once(
        &self,
        admin: &AdminContext,
        key: &StockKey,
        delta: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<StockRecord> {
        let stock_delta = StockDelta::adjust(delta);
        let mut tx = self.db.begin().await?;

        let record = self
            .db
            .stock()
            .apply_delta_in(&mut *tx, key, stock_delta, now)
            .await
            .map_err(|e| match e {
                DbError::NotFound { .. } => EngineError::StockRecordNotFound {
                    product_id: key.product_id.clone(),
                    size: key.size.clone(),
                },
                other => other.into(),
            })?;

        let mv = StockMove::new(key, MoveType::Adjustment, stock_delta, now)
            .with_reason(Some(reason))
            .with_actor(Some(admin.actor()));
        self.db.moves().append_in(&mut *tx, &mv).await?;

        self.db.commit(tx).await?;
        Ok(record)
    }

    async fn restock_once(
        &self,
        admin: &AdminContext,
        key: &StockKey,
        quantity: i64,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<StockRecord> {
        let mut tx = self.db.begin().await?;
        let record = self.db.stock().restock_in(&mut *tx, key, quantity, now).await?;

        let mv = StockMove::new(key, MoveType::Restock, StockDelta::restock(quantity), now)
            .with_reason(reason)
            .with_actor(Some(admin.actor()));
        self.db.moves().append_in(&mut *tx, &mv).await?;

        self.db.commit(tx).await?;
        Ok(record)
    }

    fn publish(&self, record: &StockRecord, cause: MoveType, at: DateTime<Utc>) {
        self.notifier
            .publish(StockChangeEvent::from_record(record, cause, at));
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Logs a failed operation at a level matching how surprising it is.
fn report(
    operation: &str,
    key: Option<&StockKey>,
    reservation_id: Option<&str>,
    err: &EngineError,
) {
    let product_id = key.map(|k| k.product_id.as_str());
    let size = key.map(|k| k.size.as_str());

    match err {
        EngineError::InvariantViolation(_) => error!(
            operation,
            ?product_id,
            ?size,
            ?reservation_id,
            error = %err,
            "Ledger invariant violation"
        ),
        e if e.is_expected() => debug!(
            operation,
            ?product_id,
            ?size,
            ?reservation_id,
            error = %err,
            "Operation rejected"
        ),
        _ => error!(
            operation,
            ?product_id,
            ?size,
            ?reservation_id,
            error = %err,
            "Operation failed"
        ),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{admin, file_manager, manager_with_stock, remove_file_db, sneaker_ten};

    async fn move_count(manager: &ReservationManager, key: &StockKey) -> usize {
        manager
            .database()
            .moves()
            .list_for_key(key, 1000)
            .await
            .unwrap()
            .len()
    }

    async fn level(manager: &ReservationManager, key: &StockKey) -> StockRecord {
        manager.get_level(key).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_basic_flow() {
        let (manager, _clock) = manager_with_stock(5).await;
        let key = sneaker_ten();

        let r1 = manager
            .reserve(&key, 2, &Holder::session("S1"), Some(15))
            .await
            .unwrap();
        assert_eq!(r1.status, ReservationStatus::Held);
        assert_eq!(r1.expires_at - r1.created_at, Duration::minutes(15));
        assert_eq!(level(&manager, &key).await.available_quantity(), 3);

        let committed = manager.commit(&r1.id, "O1").await.unwrap();
        assert_eq!(committed.status, ReservationStatus::Committed);
        assert_eq!(committed.order_id.as_deref(), Some("O1"));

        let record = level(&manager, &key).await;
        assert_eq!((record.quantity, record.reserved_quantity), (3, 0));

        let err = manager
            .reserve(&key, 4, &Holder::session("S2"), None)
            .await
            .unwrap_err();
        match err {
            EngineError::InsufficientStock {
                available,
                requested,
                ..
            } => assert_eq!((available, requested), (3, 4)),
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_release_on_cancel() {
        let (manager, _clock) = manager_with_stock(5).await;
        let key = sneaker_ten();

        let r2 = manager
            .reserve(&key, 3, &Holder::user("U1"), None)
            .await
            .unwrap();
        assert_eq!(level(&manager, &key).await.available_quantity(), 2);

        let released = manager.release(&r2.id, "user cancelled").await.unwrap();
        assert_eq!(released.status, ReservationStatus::Released);
        assert_eq!(released.resolution_reason.as_deref(), Some("user cancelled"));

        let record = level(&manager, &key).await;
        assert_eq!((record.quantity, record.reserved_quantity), (5, 0));
        assert_eq!(record.available_quantity(), 5);
    }

    #[tokio::test]
    async fn test_commit_twice_applies_once() {
        let (manager, _clock) = manager_with_stock(5).await;
        let key = sneaker_ten();
        let r = manager
            .reserve(&key, 2, &Holder::session("S1"), None)
            .await
            .unwrap();

        manager.commit(&r.id, "O1").await.unwrap();
        let after_first = level(&manager, &key).await;
        let moves_after_first = move_count(&manager, &key).await;

        let err = manager.commit(&r.id, "O1").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::AlreadyTerminal {
                status: ReservationStatus::Committed,
                ..
            }
        ));
        assert_eq!(level(&manager, &key).await, after_first);
        assert_eq!(move_count(&manager, &key).await, moves_after_first);

        let err = manager.release(&r.id, "too late").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyTerminal { .. }));
        assert_eq!(level(&manager, &key).await, after_first);
    }

    #[tokio::test]
    async fn test_release_twice_applies_once() {
        let (manager, _clock) = manager_with_stock(5).await;
        let key = sneaker_ten();
        let r = manager
            .reserve(&key, 1, &Holder::session("S1"), None)
            .await
            .unwrap();

        manager.release(&r.id, "payment declined").await.unwrap();
        let after_first = level(&manager, &key).await;

        let err = manager.release(&r.id, "payment declined").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::AlreadyTerminal {
                status: ReservationStatus::Released,
                ..
            }
        ));
        assert_eq!(level(&manager, &key).await, after_first);
    }

    #[tokio::test]
    async fn test_unknown_reservation_is_not_found() {
        let (manager, _clock) = manager_with_stock(5).await;
        let id = Uuid::new_v4().to_string();

        let err = manager.commit(&id, "O1").await.unwrap_err();
        assert!(matches!(err, EngineError::ReservationNotFound { .. }));

        let err = manager.release(&id, "cancel").await.unwrap_err();
        assert!(matches!(err, EngineError::ReservationNotFound { .. }));
    }

    #[tokio::test]
    async fn test_rejected_reserve_changes_nothing() {
        let (manager, _clock) = manager_with_stock(2).await;
        let key = sneaker_ten();
        let before = level(&manager, &key).await;
        let moves_before = move_count(&manager, &key).await;

        let err = manager
            .reserve(&key, 3, &Holder::session("S1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { .. }));

        assert_eq!(level(&manager, &key).await, before);
        assert_eq!(move_count(&manager, &key).await, moves_before);
        assert_eq!(
            manager.database().reservations().held_total(&key).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_reserve_unknown_key_has_nothing_available() {
        let (manager, _clock) = manager_with_stock(5).await;
        let key = StockKey::new("BOOT-404", "9");

        let err = manager
            .reserve(&key, 1, &Holder::session("S1"), None)
            .await
            .unwrap_err();
        match err {
            EngineError::InsufficientStock { available, .. } => assert_eq!(available, 0),
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert!(manager.get_level(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reserve_validates_input() {
        let (manager, _clock) = manager_with_stock(5).await;
        let key = sneaker_ten();

        let err = manager
            .reserve(&key, 0, &Holder::session("S1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = manager
            .reserve(&key, 1, &Holder::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = manager
            .reserve(&key, 1, &Holder::session("S1"), Some(60 * 24 + 1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = manager.commit("not-a-uuid", "O1").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_expire_marks_expired_and_blocks_commit() {
        let (manager, clock) = manager_with_stock(5).await;
        let key = sneaker_ten();
        let r3 = manager
            .reserve(&key, 2, &Holder::session("S3"), Some(1))
            .await
            .unwrap();

        clock.advance(Duration::minutes(1) + Duration::seconds(1));
        let expired = manager.expire(&r3.id).await.unwrap();
        assert_eq!(expired.status, ReservationStatus::Expired);
        assert_eq!(expired.resolution_reason.as_deref(), Some(EXPIRED_REASON));

        let record = level(&manager, &key).await;
        assert_eq!((record.quantity, record.reserved_quantity), (5, 0));

        let moves = manager
            .database()
            .moves()
            .list_for_reference(&r3.id)
            .await
            .unwrap();
        let expiry = moves
            .iter()
            .find(|m| m.reason.as_deref() == Some(EXPIRED_REASON))
            .unwrap();
        assert_eq!(expiry.move_type, MoveType::Release);
        assert_eq!(expiry.actor.as_deref(), Some(REAPER_ACTOR));

        let err = manager.commit(&r3.id, "O3").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::AlreadyTerminal {
                status: ReservationStatus::Expired,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_commit_past_ttl_before_reaper_succeeds() {
        let (manager, clock) = manager_with_stock(5).await;
        let key = sneaker_ten();
        let r = manager
            .reserve(&key, 1, &Holder::session("S1"), Some(1))
            .await
            .unwrap();

        clock.advance(Duration::minutes(5));
        manager.commit(&r.id, "O1").await.unwrap();

        let err = manager.expire(&r.id).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyTerminal { .. }));
        assert_eq!(level(&manager, &key).await.quantity, 4);
    }

    #[tokio::test]
    async fn test_commit_move_references_order() {
        let (manager, _clock) = manager_with_stock(5).await;
        let key = sneaker_ten();
        let r = manager
            .reserve(&key, 2, &Holder::user("U9"), None)
            .await
            .unwrap();
        manager.commit(&r.id, "ORD-77").await.unwrap();

        let moves = manager
            .database()
            .moves()
            .list_for_reference("ORD-77")
            .await
            .unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].move_type, MoveType::Commit);
        assert_eq!(moves[0].reference_type, ReferenceType::Order);
        assert_eq!(moves[0].delta(), StockDelta::commit(2));
        assert_eq!(moves[0].actor.as_deref(), Some("U9"));
    }

    #[tokio::test]
    async fn test_adjust_changes_on_hand_only() {
        let (manager, _clock) = manager_with_stock(5).await;
        let key = sneaker_ten();
        manager
            .reserve(&key, 2, &Holder::session("S1"), None)
            .await
            .unwrap();

        let record = manager
            .adjust(&admin(), &key, -2, "water damage")
            .await
            .unwrap();
        assert_eq!((record.quantity, record.reserved_quantity), (3, 2));

        let err = manager
            .adjust(&admin(), &key, -2, "recount")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { .. }));
        assert_eq!(level(&manager, &key).await.quantity, 3);

        let err = manager
            .adjust(&admin(), &StockKey::new("BOOT-404", "9"), 1, "recount")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StockRecordNotFound { .. }));

        let err = manager.adjust(&admin(), &key, 1, " ").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_restock_creates_record() {
        let (manager, _clock) = manager_with_stock(0).await;
        let key = StockKey::new("TEE-BASIC", "M");

        let record = manager
            .restock(&admin(), &key, 12, Some("delivery"))
            .await
            .unwrap();
        assert_eq!((record.quantity, record.reserved_quantity), (12, 0));

        let record = manager.restock(&admin(), &key, 3, None).await.unwrap();
        assert_eq!(record.quantity, 15);
        assert_eq!(record.version, 2);
    }

    #[test]
    fn test_admin_context_requires_actor() {
        assert!(AdminContext::new("ops@store").is_ok());
        assert!(matches!(
            AdminContext::new("  "),
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_events_follow_version_order() {
        let (manager, _clock) = manager_with_stock(5).await;
        let key = sneaker_ten();
        let mut events = manager.notifier().subscribe_key(key.clone());

        let r = manager
            .reserve(&key, 2, &Holder::session("S1"), None)
            .await
            .unwrap();
        manager.commit(&r.id, "O1").await.unwrap();

        let reserved = events.recv().await.unwrap();
        assert_eq!(reserved.cause, MoveType::Reserve);
        assert_eq!(reserved.available_quantity, 3);

        let committed = events.recv().await.unwrap();
        assert_eq!(committed.cause, MoveType::Commit);
        assert_eq!(committed.available_quantity, 3);
        assert_eq!(committed.quantity, 3);
        assert!(committed.version > reserved.version);
    }

    #[tokio::test]
    async fn test_failed_operation_publishes_nothing() {
        let (manager, _clock) = manager_with_stock(1).await;
        let key = sneaker_ten();
        let mut events = manager.notifier().subscribe();

        let _ = manager.reserve(&key, 2, &Holder::session("S1"), None).await;
        assert!(events.try_recv().is_none());
    }

    // =========================================================================
    // Concurrency
    // =========================================================================

    async fn race(manager: &ReservationManager, shoppers: usize) -> Vec<EngineResult<Reservation>> {
        let barrier = Arc::new(tokio::sync::Barrier::new(shoppers));
        let tasks: Vec<_> = (0..shoppers)
            .map(|i| {
                let manager = manager.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    manager
                        .reserve(&sneaker_ten(), 1, &Holder::session(format!("S{i}")), None)
                        .await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(shoppers);
        for task in tasks {
            results.push(task.await.unwrap());
        }
        results
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_shoppers_last_unit() {
        let (manager, path) = file_manager(1).await;

        let results = race(&manager, 2).await;
        let won = results.iter().filter(|r| r.is_ok()).count();
        let lost = results
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Err(EngineError::InsufficientStock { available: 0, .. })
                )
            })
            .count();
        assert_eq!((won, lost), (1, 1));

        let record = level(&manager, &sneaker_ten()).await;
        assert_eq!((record.quantity, record.reserved_quantity), (1, 1));

        remove_file_db(manager, path).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_crowd_never_oversells() {
        let (manager, path) = file_manager(3).await;

        let results = race(&manager, 12).await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
        assert!(results.iter().all(|r| match r {
            Ok(_) => true,
            Err(e) => matches!(e, EngineError::InsufficientStock { .. }),
        }));

        let key = sneaker_ten();
        let record = level(&manager, &key).await;
        assert!(record.is_consistent());
        assert_eq!(record.reserved_quantity, 3);
        assert_eq!(
            manager.database().reservations().held_total(&key).await.unwrap(),
            3
        );

        remove_file_db(manager, path).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_crowd_events_never_go_backwards() {
        let (manager, path) = file_manager(200).await;
        let key = sneaker_ten();
        let mut events = manager.notifier().subscribe_key(key.clone());

        let results = race(&manager, 200).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let versions: Vec<i64> = std::iter::from_fn(|| events.try_recv())
            .map(|e| e.version)
            .collect();
        assert!(versions.windows(2).all(|w| w[0] < w[1]), "{versions:?}");
        assert_eq!(versions.len() as u64 + events.stale_events(), 200);

        let record = level(&manager, &key).await;
        assert_eq!(versions.last().copied(), Some(record.version));
        assert_eq!(record.reserved_quantity, 200);

        remove_file_db(manager, path).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_commit_and_expiry_race_one_wins() {
        let (manager, path) = file_manager(40).await;
        let key = sneaker_ten();

        let mut committed = 0;
        for round in 0..20 {
            let r = manager
                .reserve(&key, 2, &Holder::session(format!("S{round}")), None)
                .await
                .unwrap();

            let barrier = Arc::new(tokio::sync::Barrier::new(2));
            let checkout = {
                let (manager, barrier, id) = (manager.clone(), barrier.clone(), r.id.clone());
                tokio::spawn(async move {
                    barrier.wait().await;
                    manager.commit(&id, &format!("O{round}")).await
                })
            };
            let reaper = {
                let (manager, barrier, id) = (manager.clone(), barrier.clone(), r.id.clone());
                tokio::spawn(async move {
                    barrier.wait().await;
                    manager.expire(&id).await
                })
            };
            let commit = checkout.await.unwrap();
            let expire = reaper.await.unwrap();

            match (&commit, &expire) {
                (Ok(won), Err(EngineError::AlreadyTerminal { .. })) => {
                    assert_eq!(won.status, ReservationStatus::Committed);
                    committed += 1;
                }
                (Err(EngineError::AlreadyTerminal { .. }), Ok(won)) => {
                    assert_eq!(won.status, ReservationStatus::Expired);
                }
                other => panic!("expected exactly one winner, got {other:?}"),
            }

            let stored = manager.get_reservation(&r.id).await.unwrap().unwrap();
            assert!(stored.resolved_at.is_some());
            assert_eq!(
                manager
                    .database()
                    .moves()
                    .list_for_key(&key, 1000)
                    .await
                    .unwrap()
                    .iter()
                    .filter(|mv| matches!(mv.move_type, MoveType::Commit | MoveType::Release))
                    .count(),
                round + 1
            );
        }

        let record = level(&manager, &key).await;
        assert_eq!(record.reserved_quantity, 0);
        assert_eq!(record.quantity, 40 - 2 * committed);

        remove_file_db(manager, path).await;
    }

    // =========================================================================
    // Properties
    // =========================================================================

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Reserve(i64),
            Commit(usize),
            Release(usize),
            Expire(usize),
            Adjust(i64),
            Restock(i64),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                3 => (1i64..4).prop_map(Op::Reserve),
                2 => any::<usize>().prop_map(Op::Commit),
                2 => any::<usize>().prop_map(Op::Release),
                1 => any::<usize>().prop_map(Op::Expire),
                1 => (-3i64..=3).prop_filter("non-zero", |d| *d != 0).prop_map(Op::Adjust),
                1 => (1i64..5).prop_map(Op::Restock),
            ]
        }

        fn pick(ids: &[String], i: usize) -> Option<&str> {
            (!ids.is_empty()).then(|| ids[i % ids.len()].as_str())
        }

        async fn check(ops: Vec<Op>) {
            let (manager, _clock) = manager_with_stock(4).await;
            let key = sneaker_ten();
            let admin = admin();
            let mut ids: Vec<String> = Vec::new();

            for op in ops {
                let outcome = match op {
                    Op::Reserve(q) => manager
                        .reserve(&key, q, &Holder::session("S"), None)
                        .await
                        .map(|r| ids.push(r.id)),
                    Op::Commit(i) => match pick(&ids, i) {
                        Some(id) => manager.commit(id, "O").await.map(drop),
                        None => Ok(()),
                    },
                    Op::Release(i) => match pick(&ids, i) {
                        Some(id) => manager.release(id, "cancel").await.map(drop),
                        None => Ok(()),
                    },
                    Op::Expire(i) => match pick(&ids, i) {
                        Some(id) => manager.expire(id).await.map(drop),
                        None => Ok(()),
                    },
                    Op::Adjust(d) => manager.adjust(&admin, &key, d, "recount").await.map(drop),
                    Op::Restock(q) => manager.restock(&admin, &key, q, None).await.map(drop),
                };

                if let Err(e) = outcome {
                    assert!(e.is_expected(), "unexpected error: {e}");
                }

                let record = level(&manager, &key).await;
                assert!(record.is_consistent(), "inconsistent: {record:?}");

                let held = manager.database().reservations().held_total(&key).await.unwrap();
                assert_eq!(held, record.reserved_quantity);

                let totals = manager.database().moves().totals_for_key(&key).await.unwrap();
                assert_eq!(totals.on_hand, record.quantity);
                assert_eq!(totals.reserved, record.reserved_quantity);
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(24))]

            #[test]
            fn ledger_never_oversells(ops in proptest::collection::vec(op(), 1..40)) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                rt.block_on(check(ops));
            }
        }
    }
}
