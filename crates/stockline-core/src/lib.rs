//! # stockline-core: Pure Inventory Domain for Stockline
//!
//! This crate is the **heart** of the stock-consistency engine. It holds the
//! domain types and the delta arithmetic that decides whether a ledger change
//! is allowed, as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockline Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Storefront (checkout, product pages)               │   │
//! │  │    Cart ──► Checkout ──► Payment ──► Order confirmation        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ reserve / commit / release             │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 stockline-engine (orchestration)                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ stockline-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌──────────┐ │   │
//! │  │   │   types    │  │   delta    │  │   error    │  │validation│ │   │
//! │  │   │StockRecord │  │ StockDelta │  │ CoreError  │  │  rules   │ │   │
//! │  │   │Reservation │  │ checked_   │  │ Validation │  │  checks  │ │   │
//! │  │   │ StockMove  │  │   apply    │  │   Error    │  │          │ │   │
//! │  │   └────────────┘  └────────────┘  └────────────┘  └──────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  stockline-db (Database Layer)                  │   │
//! │  │           StockLedger, reservations, move log, migrations       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (StockRecord, Reservation, StockMove, events)
//! - [`delta`] - StockDelta and the invariant check applied to every mutation
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation rules
//!
//! ## Example Usage
//!
//! ```rust
//! use stockline_core::{StockDelta, StockRecord};
//!
//! let record = StockRecord::new("SNEAKER-001", "10", 5);
//! assert_eq!(record.available_quantity(), 5);
//!
//! // Holding 2 units keeps them on hand but removes them from availability
//! let held = record.checked_apply(StockDelta::reserve(2)).unwrap();
//! assert_eq!(held.available_quantity(), 3);
//!
//! // Asking for more than is available is rejected without touching the record
//! assert!(held.checked_apply(StockDelta::reserve(4)).is_err());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod delta;
pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use delta::StockDelta;
pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default lifetime of a `held` reservation before the reaper expires it.
pub const DEFAULT_RESERVATION_TTL_MINUTES: i64 = 15;

/// Longest TTL a caller may request for a single reservation.
///
/// A checkout that takes a day is abandoned; anything longer would let a
/// stale cart pin stock indefinitely.
pub const MAX_RESERVATION_TTL_MINUTES: i64 = 24 * 60;

/// Maximum quantity of a single (product, size) line.
///
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Maximum magnitude of a single administrative adjustment.
pub const MAX_ADJUSTMENT: i64 = 999_999;

/// Maximum number of lines accepted in one cart check or multi-item reserve.
pub const MAX_CART_LINES: usize = 100;
