//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                  (transient vs. permanent)                      │
//! │       ▼                                                                 │
//! │  EngineError (stockline-engine) ← Retries transient, classifies rest   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Storefront shows "only N left" or a generic failure                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use stockline_core::{StockDelta, StockRecord};
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The guarded delta statement matched no row because the result would
    /// break `0 <= reserved_quantity <= quantity`.
    ///
    /// `current` is the row as re-read inside the same transaction, so the
    /// engine can classify the rejection without another round trip.
    #[error(
        "Delta (on_hand {}, reserved {}) rejected for {}/{}: quantity {}, reserved {}",
        delta.on_hand, delta.reserved, current.product_id, current.size,
        current.quantity, current.reserved_quantity
    )]
    DeltaRejected {
        current: Box<StockRecord>,
        delta: StockDelta,
    },

    /// Unique constraint violation.
    #[error("Duplicate {field}")]
    UniqueViolation { field: String },

    /// CHECK / trigger / foreign key constraint refused the write.
    ///
    /// ## When This Occurs
    /// - A delta slipped past the guarded UPDATE (should never happen)
    /// - Something tried to UPDATE or DELETE a stock move
    /// - A reservation referenced a stock record that doesn't exist
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// SQLite reported BUSY / LOCKED after the busy timeout elapsed.
    ///
    /// Transient: another connection holds the write lock.
    #[error("Database busy: {0}")]
    Busy(String),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Returns true for lock contention that may clear up on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Busy(_) | DbError::PoolExhausted)
    }
}

/// SQLite primary and extended result codes that mean "someone else holds
/// the lock": BUSY, LOCKED, BUSY_RECOVERY, LOCKED_SHAREDCACHE, BUSY_SNAPSHOT,
/// BUSY_TIMEOUT.
const BUSY_CODES: &[&str] = &["5", "6", "261", "262", "517", "773"];

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Busy / UniqueViolation / ConstraintViolation / QueryFailed
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                let code = db_err.code();

                if code.as_deref().is_some_and(|c| BUSY_CODES.contains(&c))
                    || msg.contains("database is locked")
                    || msg.contains("database table is locked")
                {
                    DbError::Busy(msg.to_string())
                } else if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation { field }
                } else if msg.contains("constraint failed") || msg.contains("append-only") {
                    DbError::ConstraintViolation(msg.to_string())
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DbError::Busy("database is locked".into()).is_transient());
        assert!(DbError::PoolExhausted.is_transient());
        assert!(!DbError::not_found("Reservation", "r-1").is_transient());
        assert!(!DbError::ConstraintViolation("CHECK constraint failed".into()).is_transient());
    }

    #[test]
    fn test_pool_timeout_maps_to_exhausted() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DbError::PoolExhausted));
        assert!(err.is_transient());
    }

    #[test]
    fn test_delta_rejected_message() {
        let mut current = StockRecord::new("SNEAKER-001", "10", 1);
        current.reserved_quantity = 1;
        let err = DbError::DeltaRejected {
            current: Box::new(current),
            delta: StockDelta::reserve(1),
        };
        assert_eq!(
            err.to_string(),
            "Delta (on_hand 0, reserved 1) rejected for SNEAKER-001/10: quantity 1, reserved 1"
        );
    }
}
