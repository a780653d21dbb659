//! # Validation Module
//!
//! Quantity and identity checks applied before anything touches the Local
//! Store or the remote service.
//!
//! ## Where Checks Happen
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Points                                  │
//! │                                                                         │
//! │  commit_sale          ──► validate_sale_quantity, validate_product_id  │
//! │  dispatch (absolute)  ──► negative quantity fails, no network call     │
//! │  snapshot persistence ──► validate_stock_quantity, validate_snapshot   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockline_core::validation::{validate_sale_quantity, validate_stock_quantity};
//!
//! assert!(validate_stock_quantity(0).is_ok());
//! assert!(validate_stock_quantity(-1).is_err());
//! assert!(validate_sale_quantity(3).is_ok());
//! ```

use crate::error::{ValidationError, ValidationResult};
use crate::types::ProductSnapshot;
use crate::MAX_LINE_QUANTITY;

// =============================================================================
// Quantity Validators
// =============================================================================

/// Stock on hand may be zero but never negative.
pub fn validate_stock_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity < 0 {
        return Err(ValidationError::Negative {
            field: "stock_quantity".to_string(),
            value: quantity,
        });
    }
    Ok(())
}

/// Validates the quantity of one sale line.
///
/// ## Rules
/// - Must be at least 1
/// - Must not exceed [`MAX_LINE_QUANTITY`]
pub fn validate_sale_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }
    if quantity > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }
    Ok(())
}

// =============================================================================
// Identity Validators
// =============================================================================

pub fn validate_product_id(product_id: i64) -> ValidationResult<()> {
    if product_id <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "product_id".to_string(),
        });
    }
    Ok(())
}

/// Checks a snapshot received from the remote service.
///
/// SKU and name may legitimately be empty on the remote side, so only ids
/// and stock are enforced here.
pub fn validate_snapshot(snapshot: &ProductSnapshot) -> ValidationResult<()> {
    validate_product_id(snapshot.id)?;
    if let Some(variation_id) = snapshot.variation_id {
        if variation_id <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "variation_id".to_string(),
            });
        }
    }
    validate_stock_quantity(snapshot.stock_quantity)
}
