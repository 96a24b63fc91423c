//! # Domain Types
//!
//! Core domain types used throughout Stockline.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  StockRecord    │   │  Reservation    │   │   StockMove     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  product_id ┐   │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  size       ┘key│◄──│  product_id/size│   │  product_id/size│       │
//! │  │  quantity       │   │  quantity       │   │  move_type      │       │
//! │  │  reserved_qty   │   │  status         │   │  on_hand_delta  │       │
//! │  │  version        │   │  expires_at     │   │  reserved_delta │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌──────────────────┐  ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ReservationStatus │  │    MoveType     │   │StockChangeEvent │       │
//! │  │  Held            │  │  Reserve        │   │  key + levels   │       │
//! │  │  Committed       │  │  Commit         │   │  version        │       │
//! │  │  Released        │  │  Release        │   │  cause          │       │
//! │  │  Expired         │  │  Adjustment     │   └─────────────────┘       │
//! │  └──────────────────┘  │  Restock        │                             │
//! │                        └─────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//! StockRecord is the authoritative quantity state. Reservation and StockMove
//! are satellite records keyed by the same (product_id, size) pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::delta::StockDelta;

// =============================================================================
// Stock Key
// =============================================================================

/// Composite identity of a stock record: one product in one size.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockKey {
    pub product_id: String,
    pub size: String,
}

impl StockKey {
    /// Creates a key from a product id and size label.
    pub fn new(product_id: impl Into<String>, size: impl Into<String>) -> Self {
        StockKey {
            product_id: product_id.into(),
            size: size.into(),
        }
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.product_id, self.size)
    }
}

// =============================================================================
// Stock Record
// =============================================================================

/// On-hand and reserved units for one (product, size).
///
/// ## Invariant
/// `0 <= reserved_quantity <= quantity`, therefore `available_quantity() >= 0`.
/// Only changed through [`crate::StockDelta`] applied by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockRecord {
    pub product_id: String,
    pub size: String,

    /// Physical units present.
    pub quantity: i64,

    /// Units held by open reservations.
    pub reserved_quantity: i64,

    /// Bumped by one on every successful delta. Orders events per key.
    pub version: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    /// Creates a fresh record with nothing reserved.
    pub fn new(product_id: impl Into<String>, size: impl Into<String>, quantity: i64) -> Self {
        let now = Utc::now();
        StockRecord {
            product_id: product_id.into(),
            size: size.into(),
            quantity,
            reserved_quantity: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Units a shopper can still reserve.
    #[inline]
    pub fn available_quantity(&self) -> i64 {
        self.quantity - self.reserved_quantity
    }

    /// Returns the composite key.
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id.clone(), self.size.clone())
    }

    /// Checks if `quantity` more units could be held right now.
    pub fn can_reserve(&self, quantity: i64) -> bool {
        quantity > 0 && self.available_quantity() >= quantity
    }

    /// Checks `0 <= reserved <= quantity`.
    pub fn is_consistent(&self) -> bool {
        self.reserved_quantity >= 0 && self.reserved_quantity <= self.quantity
    }
}

// =============================================================================
// Reservation Status
// =============================================================================

/// Lifecycle state of a reservation.
///
/// ```text
///            ┌──────────► Committed   (payment succeeded, units sold)
///            │
///  Held ─────┼──────────► Released    (explicit cancel / payment failed)
///            │
///            └──────────► Expired     (TTL passed, reaper returned units)
/// ```
///
/// Exactly one transition out of `Held` ever happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Units are held against the ledger.
    Held,
    /// Units were sold.
    Committed,
    /// Units were returned by an explicit release.
    Released,
    /// Units were returned by the expiry reaper.
    Expired,
}

impl ReservationStatus {
    /// Returns true for every state except `Held`.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Held)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Held => "held",
            ReservationStatus::Committed => "committed",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
        }
    }
}

impl Default for ReservationStatus {
    fn default() -> Self {
        ReservationStatus::Held
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Holder
// =============================================================================

/// Who a reservation is held for. At least one field must be non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Holder {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub order_id: Option<String>,
}

impl Holder {
    /// Anonymous shopper identified by browser session.
    pub fn session(session_id: impl Into<String>) -> Self {
        Holder {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }

    /// Signed-in shopper.
    pub fn user(user_id: impl Into<String>) -> Self {
        Holder {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    /// Returns true when no identifier is set (or all are blank).
    pub fn is_empty(&self) -> bool {
        [&self.session_id, &self.user_id, &self.order_id]
            .iter()
            .all(|id| id.as_deref().map_or(true, |s| s.trim().is_empty()))
    }

    /// Identifier recorded as the actor on move log entries.
    ///
    /// Prefers the user, then the session, then the order.
    pub fn actor(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .or(self.session_id.as_deref())
            .or(self.order_id.as_deref())
    }
}

// =============================================================================
// Reservation
// =============================================================================

/// A temporary hold of units for one shopper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Reservation {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub product_id: String,
    pub size: String,
    pub quantity: i64,

    pub session_id: Option<String>,
    pub user_id: Option<String>,
    /// Set by the holder up front or by `commit`.
    pub order_id: Option<String>,

    pub status: ReservationStatus,

    /// Why the reservation left `held` (release reason, "expired", ...).
    pub resolution_reason: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    /// created_at + TTL.
    #[ts(as = "String")]
    pub expires_at: DateTime<Utc>,

    #[ts(as = "Option<String>")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Returns the composite stock key this reservation holds against.
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id.clone(), self.size.clone())
    }

    /// Reassembles the holder from the flat columns.
    pub fn holder(&self) -> Holder {
        Holder {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            order_id: self.order_id.clone(),
        }
    }

    /// Checks if a still-held reservation has outlived its TTL.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Held && self.expires_at < now
    }
}

// =============================================================================
// Move Type
// =============================================================================

/// Kind of ledger mutation recorded in the move log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MoveType {
    Reserve,
    Commit,
    Release,
    Adjustment,
    Restock,
}

impl MoveType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MoveType::Reserve => "reserve",
            MoveType::Commit => "commit",
            MoveType::Release => "release",
            MoveType::Adjustment => "adjustment",
            MoveType::Restock => "restock",
        }
    }
}

impl fmt::Display for MoveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a move's `reference_id` points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Reservation,
    Order,
    Manual,
}

// =============================================================================
// Stock Move
// =============================================================================

/// Immutable audit entry for one ledger mutation.
///
/// ## Delta Columns
/// Both halves of the applied delta are stored so the log can be summed back
/// into the ledger during reconciliation:
/// ```text
/// move_type    on_hand_delta   reserved_delta   available_delta
/// ─────────    ─────────────   ──────────────   ───────────────
/// reserve            0              +q               -q
/// commit            -q              -q                0
/// release            0              -q               +q
/// adjustment        ±d               0               ±d
/// restock           +q               0               +q
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMove {
    pub id: String,
    pub product_id: String,
    pub size: String,
    pub move_type: MoveType,
    pub on_hand_delta: i64,
    pub reserved_delta: i64,
    pub reference_id: Option<String>,
    pub reference_type: ReferenceType,
    pub reason: Option<String>,
    /// User or session that caused the move.
    pub actor: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl StockMove {
    /// Starts a move entry for `delta` applied to `key`.
    ///
    /// Defaults to a manual reference with no reason or actor; chain
    /// [`StockMove::referencing`], [`StockMove::with_reason`] and
    /// [`StockMove::with_actor`] to fill those in.
    pub fn new(key: &StockKey, move_type: MoveType, delta: StockDelta, at: DateTime<Utc>) -> Self {
        StockMove {
            id: uuid::Uuid::new_v4().to_string(),
            product_id: key.product_id.clone(),
            size: key.size.clone(),
            move_type,
            on_hand_delta: delta.on_hand,
            reserved_delta: delta.reserved,
            reference_id: None,
            reference_type: ReferenceType::Manual,
            reason: None,
            actor: None,
            created_at: at,
        }
    }

    pub fn referencing(mut self, reference_id: impl Into<String>, reference_type: ReferenceType) -> Self {
        self.reference_id = Some(reference_id.into());
        self.reference_type = reference_type;
        self
    }

    pub fn with_reason(mut self, reason: Option<&str>) -> Self {
        self.reason = reason.filter(|r| !r.trim().is_empty()).map(str::to_string);
        self
    }

    pub fn with_actor(mut self, actor: Option<&str>) -> Self {
        self.actor = actor.map(str::to_string);
        self
    }

    /// The delta this move recorded.
    pub fn delta(&self) -> StockDelta {
        StockDelta::new(self.on_hand_delta, self.reserved_delta)
    }

    /// Signed change to the available quantity.
    #[inline]
    pub fn available_delta(&self) -> i64 {
        self.on_hand_delta - self.reserved_delta
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id.clone(), self.size.clone())
    }
}

// =============================================================================
// Stock Change Event
// =============================================================================

/// Published after every successful ledger delta.
///
/// Subscribers use it only to refresh cached availability; `version` lets
/// them drop events that arrive out of order for the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockChangeEvent {
    pub product_id: String,
    pub size: String,
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub available_quantity: i64,
    pub version: i64,
    pub cause: MoveType,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
}

impl StockChangeEvent {
    /// Builds the event from the record as it stood right after the delta.
    pub fn from_record(record: &StockRecord, cause: MoveType, timestamp: DateTime<Utc>) -> Self {
        StockChangeEvent {
            product_id: record.product_id.clone(),
            size: record.size.clone(),
            quantity: record.quantity,
            reserved_quantity: record.reserved_quantity,
            available_quantity: record.available_quantity(),
            version: record.version,
            cause,
            timestamp,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id.clone(), self.size.clone())
    }
}

// =============================================================================
// Cart Availability
// =============================================================================

/// One requested cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartLine {
    pub product_id: String,
    pub size: String,
    pub requested_quantity: i64,
}

impl CartLine {
    pub fn new(product_id: impl Into<String>, size: impl Into<String>, requested_quantity: i64) -> Self {
        CartLine {
            product_id: product_id.into(),
            size: size.into(),
            requested_quantity,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id.clone(), self.size.clone())
    }
}

/// Advisory answer for one cart line. Reserves nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineAvailability {
    pub product_id: String,
    pub size: String,
    pub requested_quantity: i64,
    pub available: bool,
    pub available_quantity: i64,
}

/// Per-line availability for a whole cart, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartAvailability {
    pub lines: Vec<LineAvailability>,
}

impl CartAvailability {
    /// True when every line could be satisfied at the time of the check.
    pub fn all_available(&self) -> bool {
        self.lines.iter().all(|line| line.available)
    }

    /// Lines the shopper needs to reduce or remove.
    pub fn unavailable(&self) -> impl Iterator<Item = &LineAvailability> {
        self.lines.iter().filter(|line| !line.available)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_quantity() {
        let mut record = StockRecord::new("SNEAKER-001", "10", 5);
        record.reserved_quantity = 2;
        assert_eq!(record.available_quantity(), 3);
        assert!(record.can_reserve(3));
        assert!(!record.can_reserve(4));
        assert!(!record.can_reserve(0));
        assert!(record.is_consistent());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!ReservationStatus::Held.is_terminal());
        assert!(ReservationStatus::Committed.is_terminal());
        assert!(ReservationStatus::Released.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
        assert_eq!(ReservationStatus::default(), ReservationStatus::Held);
    }

    #[test]
    fn test_holder_actor_preference() {
        let holder = Holder::session("sess-1");
        assert_eq!(holder.actor(), Some("sess-1"));

        let holder = holder.with_user("user-9");
        assert_eq!(holder.actor(), Some("user-9"));

        assert!(Holder::default().is_empty());
        assert!(Holder::session("  ").is_empty());
        assert!(!Holder::default().with_order("order-1").is_empty());
    }

    #[test]
    fn test_stock_key_display() {
        assert_eq!(StockKey::new("SNEAKER-001", "10.5").to_string(), "SNEAKER-001/10.5");
    }

    #[test]
    fn test_move_available_delta() {
        let key = StockKey::new("P", "M");
        let mv = StockMove::new(&key, MoveType::Reserve, StockDelta::reserve(2), Utc::now())
            .referencing("r-1", ReferenceType::Reservation)
            .with_reason(Some("  "))
            .with_actor(Some("sess-1"));
        assert_eq!(mv.available_delta(), -2);
        assert_eq!(mv.delta(), StockDelta::reserve(2));
        assert_eq!(mv.reference_type, ReferenceType::Reservation);
        assert_eq!(mv.reason, None);
        assert_eq!(mv.actor.as_deref(), Some("sess-1"));
    }

    #[test]
    fn test_event_serializes_snake_case_cause() {
        let record = StockRecord::new("P", "M", 4);
        let event = StockChangeEvent::from_record(&record, MoveType::Restock, Utc::now());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["cause"], "restock");
        assert_eq!(json["available_quantity"], 4);
    }

    #[test]
    fn test_cart_availability_summary() {
        let cart = CartAvailability {
            lines: vec![
                LineAvailability {
                    product_id: "P".into(),
                    size: "M".into(),
                    requested_quantity: 1,
                    available: true,
                    available_quantity: 3,
                },
                LineAvailability {
                    product_id: "P".into(),
                    size: "L".into(),
                    requested_quantity: 2,
                    available: false,
                    available_quantity: 1,
                },
            ],
        };
        assert!(!cart.all_available());
        assert_eq!(cart.unavailable().count(), 1);
    }
}
