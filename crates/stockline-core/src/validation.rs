//! # Validation Module
//!
//! Input validation for every engine entry point.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Storefront                                                   │
//! │  ├── Quantity pickers, size selectors                                  │
//! │  └── Immediate shopper feedback                                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: stockline-engine entry points                                │
//! │  └── THIS MODULE: field rules, checked before storage is touched       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (0 <= reserved_quantity <= quantity)                        │
//! │  ├── CHECK on status / move_type values                                │
//! │  └── Append-only triggers on stock_moves                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,no_run
//! use stockline_core::validation::{validate_product_id, validate_quantity};
//!
//! validate_product_id("SNEAKER-001").unwrap();
//! validate_quantity(2).unwrap();
//! ```

use crate::error::ValidationError;
use crate::types::{CartLine, Holder};
use crate::{MAX_ADJUSTMENT, MAX_CART_LINES, MAX_ITEM_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted product identifier.
pub const MAX_PRODUCT_ID_LEN: usize = 64;

/// Longest accepted size label ("10.5", "XL", "EU 44", ...).
pub const MAX_SIZE_LEN: usize = 16;

/// Longest accepted free-text reason.
pub const MAX_REASON_LEN: usize = 500;

/// Longest accepted external order reference.
pub const MAX_ORDER_ID_LEN: usize = 128;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a product identifier.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Only alphanumeric characters, hyphens, underscores
///
/// ## Example
/// ```rust
/// use stockline_core::validation::validate_product_id;
///
/// assert!(validate_product_id("SNEAKER-001").is_ok());
/// assert!(validate_product_id("").is_err());
/// assert!(validate_product_id("has space").is_err());
/// ```
pub fn validate_product_id(product_id: &str) -> ValidationResult<()> {
    let product_id = product_id.trim();

    if product_id.is_empty() {
        return Err(ValidationError::required("product_id"));
    }

    if product_id.chars().count() > MAX_PRODUCT_ID_LEN {
        return Err(ValidationError::too_long("product_id", MAX_PRODUCT_ID_LEN));
    }

    if !product_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::invalid_format(
            "product_id",
            "must contain only letters, numbers, hyphens, and underscores",
        ));
    }

    Ok(())
}

/// Validates a size label.
///
/// Sizes are free-form ("10", "10.5", "XL", "EU 44") so only emptiness,
/// length and control characters are checked.
pub fn validate_size(size: &str) -> ValidationResult<()> {
    let trimmed = size.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::required("size"));
    }

    if trimmed.chars().count() > MAX_SIZE_LEN {
        return Err(ValidationError::too_long("size", MAX_SIZE_LEN));
    }

    if size.chars().any(char::is_control) {
        return Err(ValidationError::invalid_format(
            "size",
            "must not contain control characters",
        ));
    }

    Ok(())
}

/// Validates an optional free-text reason (release, adjustment, restock).
pub fn validate_reason(reason: &str) -> ValidationResult<()> {
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(ValidationError::too_long("reason", MAX_REASON_LEN));
    }
    Ok(())
}

/// Validates the order reference passed to a commit.
pub fn validate_order_id(order_id: &str) -> ValidationResult<()> {
    if order_id.trim().is_empty() {
        return Err(ValidationError::required("order_id"));
    }
    if order_id.chars().count() > MAX_ORDER_ID_LEN {
        return Err(ValidationError::too_long("order_id", MAX_ORDER_ID_LEN));
    }
    Ok(())
}

/// Validates that a reservation has someone to hold it for.
pub fn validate_holder(holder: &Holder) -> ValidationResult<()> {
    if holder.is_empty() {
        return Err(ValidationError::required("holder"));
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a reserve/restock quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (999)
///
/// ## User Workflow
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  Checkout: reserve line                                                 │
/// │                                                                         │
/// │  Shopper picks quantity: 2                                             │
/// │       │                                                                 │
/// │       ▼                                                                 │
/// │  validate_quantity(2) ← THIS FUNCTION                                  │
/// │       │                                                                 │
/// │       ├── qty <= 0? → Error: "quantity must be positive"               │
/// │       │                                                                 │
/// │       ├── qty > 999? → Error: "quantity must be between 1 and 999"     │
/// │       │                                                                 │
/// │       └── OK → ReservationManager::reserve                             │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a manual on-hand adjustment.
///
/// ## Rules
/// - Must not be zero
/// - Magnitude at most MAX_ADJUSTMENT
pub fn validate_adjustment(delta: i64) -> ValidationResult<()> {
    if delta == 0 {
        return Err(ValidationError::MustBeNonZero {
            field: "delta".to_string(),
        });
    }

    if delta.checked_abs().map_or(true, |d| d > MAX_ADJUSTMENT) {
        return Err(ValidationError::OutOfRange {
            field: "delta".to_string(),
            min: -MAX_ADJUSTMENT,
            max: MAX_ADJUSTMENT,
        });
    }

    Ok(())
}

/// Validates a restock quantity. Deliveries may exceed a cart line's
/// limit, so the bound is MAX_ADJUSTMENT.
pub fn validate_restock_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ADJUSTMENT {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ADJUSTMENT,
        });
    }

    Ok(())
}

/// Validates a reservation TTL in minutes against the configured maximum.
pub fn validate_ttl_minutes(ttl_minutes: i64, max_minutes: i64) -> ValidationResult<()> {
    if ttl_minutes < 1 || ttl_minutes > max_minutes {
        return Err(ValidationError::OutOfRange {
            field: "ttl_minutes".to_string(),
            min: 1,
            max: max_minutes,
        });
    }
    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates cart size (number of lines).
///
/// ## Rules
/// - Must not be empty
/// - Must not exceed MAX_CART_LINES (100)
pub fn validate_cart_size(lines: usize) -> ValidationResult<()> {
    if lines == 0 {
        return Err(ValidationError::required("items"));
    }

    if lines > MAX_CART_LINES {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_CART_LINES as i64,
        });
    }

    Ok(())
}

/// Validates every field of a cart line.
pub fn validate_cart_line(line: &CartLine) -> ValidationResult<()> {
    validate_product_id(&line.product_id)?;
    validate_size(&line.size)?;
    validate_quantity(line.requested_quantity)
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a reservation id.
///
/// ## Example
/// ```rust
/// use stockline_core::validation::validate_reservation_id;
///
/// assert!(validate_reservation_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_reservation_id("not-a-uuid").is_err());
/// ```
pub fn validate_reservation_id(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::required("reservation_id"));
    }

    uuid::Uuid::parse_str(id)
        .map_err(|_| ValidationError::invalid_format("reservation_id", "must be a valid UUID"))?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
