//! # Engine Error Types
//!
//! What storefront and admin callers see when an operation fails.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────────┐  ┌─────────────────────┐  ┌─────────────────┐ │
//! │  │  Expected           │  │  Transient          │  │  Bug            │ │
//! │  │  (typed result)     │  │  (retried inside)   │  │  (log loudly)   │ │
//! │  │                     │  │                     │  │                 │ │
//! │  │  InsufficientStock  │  │  Contention         │  │  Invariant-     │ │
//! │  │  ReservationNotFound│  │    ↓ retries spent  │  │   Violation     │ │
//! │  │  AlreadyTerminal    │  │  StorageFailure     │  │                 │ │
//! │  │  StockRecordNotFound│  │                     │  │                 │ │
//! │  │  Validation         │  │                     │  │                 │ │
//! │  └─────────────────────┘  └─────────────────────┘  └─────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────────┐  ┌─────────────────────┐                      │
//! │  │  Configuration      │  │  Runtime            │                      │
//! │  │  InvalidConfig      │  │  ChannelError       │                      │
//! │  │  ConfigLoadFailed   │  │                     │                      │
//! │  │  ConfigSaveFailed   │  │                     │                      │
//! │  └─────────────────────┘  └─────────────────────┘                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use stockline_core::{CoreError, ReservationStatus, ValidationError};
use stockline_db::DbError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type covering every way an operation can fail.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Expected Errors
    // =========================================================================
    /// Not enough available units. Present a reduced quantity to the shopper.
    #[error("Insufficient stock for {product_id}/{size}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        size: String,
        available: i64,
        requested: i64,
    },

    /// Reservation id unknown. Treat the checkout as stale.
    #[error("Reservation not found: {reservation_id}")]
    ReservationNotFound { reservation_id: String },

    /// Reservation already resolved. Do not retry; re-check state.
    #[error("Reservation {reservation_id} is already {status}")]
    AlreadyTerminal {
        reservation_id: String,
        status: ReservationStatus,
    },

    /// Admin operation on a (product, size) that has never been stocked.
    #[error("No stock record for {product_id}/{size}")]
    StockRecordNotFound { product_id: String, size: String },

    /// Caller input failed validation; nothing was touched.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Another writer held the lock. Retried internally.
    #[error("Storage contention: {0}")]
    Contention(String),

    /// The atomic update could not complete. No state was changed.
    #[error("{operation} failed after {attempts} attempt(s): {message}")]
    StorageFailure {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// A write would have broken `0 <= reserved <= quantity`.
    ///
    /// Seeing this means per-key serialization failed somewhere.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InsufficientStock {
                product_id,
                size,
                available,
                requested,
            } => EngineError::InsufficientStock {
                product_id,
                size,
                available,
                requested,
            },
            err @ CoreError::InvariantViolation { .. } => {
                EngineError::InvariantViolation(err.to_string())
            }
            CoreError::ReservationTerminal {
                reservation_id,
                status,
            } => EngineError::AlreadyTerminal {
                reservation_id,
                status,
            },
            CoreError::Validation(v) => EngineError::Validation(v),
        }
    }
}

/// Convert database errors to engine errors.
///
/// ## Error Mapping
/// ```text
/// DbError::DeltaRejected        → classified by StockRecord::checked_apply
///                                 (InsufficientStock / InvariantViolation)
/// DbError::Busy / PoolExhausted → EngineError::Contention (retryable)
/// DbError::ConstraintViolation  → EngineError::InvariantViolation
/// Other                         → EngineError::StorageFailure
/// ```
///
/// `NotFound` has no single meaning here; call sites that expect it map it
/// themselves before `?`.
impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::DeltaRejected { current, delta } => match current.checked_apply(delta) {
                Err(core) => core.into(),
                Ok(_) => EngineError::InvariantViolation(format!(
                    "delta {delta:?} rejected by storage but valid against {}/{}",
                    current.product_id, current.size
                )),
            },
            err if err.is_transient() => EngineError::Contention(err.to_string()),
            DbError::ConstraintViolation(msg) => EngineError::InvariantViolation(msg),
            other => EngineError::StorageFailure {
                operation: "database".to_string(),
                attempts: 1,
                message: other.to_string(),
            },
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl EngineError {
    /// Returns true for outcomes a caller is expected to handle as part of
    /// normal checkout flow.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientStock { .. }
                | EngineError::ReservationNotFound { .. }
                | EngineError::AlreadyTerminal { .. }
                | EngineError::StockRecordNotFound { .. }
                | EngineError::Validation(_)
        )
    }

    /// Returns true if the operation may succeed when retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Contention(_))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfig(_)
                | EngineError::ConfigLoadFailed(_)
                | EngineError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockline_core::{StockDelta, StockRecord};

    #[test]
    fn test_categories() {
        assert!(EngineError::ReservationNotFound {
            reservation_id: "r".into()
        }
        .is_expected());
        assert!(EngineError::Contention("locked".into()).is_retryable());
        assert!(!EngineError::InvariantViolation("x".into()).is_expected());
        assert!(!EngineError::InvariantViolation("x".into()).is_retryable());
        assert!(EngineError::InvalidConfig("bad".into()).is_config_error());
    }

    #[test]
    fn test_rejected_reserve_becomes_insufficient_stock() {
        let mut current = StockRecord::new("SNEAKER-001", "10", 5);
        current.reserved_quantity = 2;
        let err: EngineError = DbError::DeltaRejected {
            current: Box::new(current),
            delta: StockDelta::reserve(4),
        }
        .into();

        match err {
            EngineError::InsufficientStock {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, 3);
                assert_eq!(requested, 4);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
    }

    #[test]
    fn test_rejected_release_becomes_invariant_violation() {
        let current = StockRecord::new("SNEAKER-001", "10", 5);
        let err: EngineError = DbError::DeltaRejected {
            current: Box::new(current),
            delta: StockDelta::release(1),
        }
        .into();
        assert!(matches!(err, EngineError::InvariantViolation(_)));
    }

    #[test]
    fn test_busy_is_contention() {
        let err: EngineError = DbError::Busy("database is locked".into()).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_terminal_message() {
        let err: EngineError = CoreError::ReservationTerminal {
            reservation_id: "r-3".into(),
            status: ReservationStatus::Expired,
        }
        .into();
        assert_eq!(err.to_string(), "Reservation r-3 is already expired");
    }
}
