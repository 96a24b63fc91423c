//! # Error Types
//!
//! Domain-specific error types for stockline-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockline-core errors (this file)                                     │
//! │  ├── CoreError        - Delta / reservation rule violations            │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  stockline-db errors (separate crate)                                  │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  stockline-engine errors                                               │
//! │  └── EngineError      - What storefront callers see                    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → EngineError → Caller    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::ReservationStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core business rule errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Not enough available units to satisfy the delta.
    ///
    /// ## User Workflow
    /// ```text
    /// Checkout (qty: 4)
    ///      │
    ///      ▼
    /// Ledger: quantity=5, reserved=2 → available=3
    ///      │
    ///      ▼
    /// InsufficientStock { available: 3, requested: 4 }
    ///      │
    ///      ▼
    /// UI shows: "Only 3 left in size 10"
    /// ```
    #[error("Insufficient stock for {product_id}/{size}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        size: String,
        available: i64,
        requested: i64,
    },

    /// The delta would leave the record in an impossible state.
    ///
    /// Only a commit or release that does not match the reserved units can
    /// produce this; seeing it means per-key serialization was broken.
    #[error(
        "Invariant violation on {product_id}/{size}: quantity {quantity}, reserved {reserved} \
         cannot absorb delta (on_hand {on_hand_delta}, reserved {reserved_delta})"
    )]
    InvariantViolation {
        product_id: String,
        size: String,
        quantity: i64,
        reserved: i64,
        on_hand_delta: i64,
        reserved_delta: i64,
    },

    /// Reservation already left the `held` state.
    #[error("Reservation {reservation_id} is already {status}")]
    ReservationTerminal {
        reservation_id: String,
        status: ReservationStatus,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before any storage is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be zero.
    #[error("{field} must not be zero")]
    MustBeNonZero { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    pub(crate) fn required(field: &str) -> Self {
        ValidationError::Required {
            field: field.to_string(),
        }
    }

    pub(crate) fn too_long(field: &str, max: usize) -> Self {
        ValidationError::TooLong {
            field: field.to_string(),
            max,
        }
    }

    pub(crate) fn invalid_format(field: &str, reason: &str) -> Self {
        ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            product_id: "SNEAKER-001".to_string(),
            size: "10".to_string(),
            available: 3,
            requested: 4,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for SNEAKER-001/10: available 3, requested 4"
        );

        let err = CoreError::ReservationTerminal {
            reservation_id: "r-1".to_string(),
            status: ReservationStatus::Expired,
        };
        assert_eq!(err.to_string(), "Reservation r-1 is already expired");
    }

    #[test]
    fn test_validation_error_messages() {
        assert_eq!(ValidationError::required("size").to_string(), "size is required");
        assert_eq!(
            ValidationError::too_long("reason", 500).to_string(),
            "reason must be at most 500 characters"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::required("product_id").into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
