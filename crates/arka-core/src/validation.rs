//! # Validation Module
//!
//! Submission rules for print jobs.
//!
//! ## Where Validation Runs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Submission API (print agent)                                 │
//! │  ├── Type validation (JSON deserialization)                            │
//! │  └── THIS MODULE: job rules, before anything is persisted              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── CHECK constraints on type and status                              │
//! │                                                                         │
//! │  The worker trusts queued payloads: no zero or negative quantities.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use arka_core::validation::validate_new_job;
//! use arka_core::NewPrintJob;
//!
//! let job = NewPrintJob::z_report("pos-1");
//! assert!(validate_new_job(&job).is_ok());
//! ```

use crate::error::ValidationError;
use crate::types::{JobPayload, LineItem, NewPrintJob};
use crate::MAX_RECEIPT_ITEMS;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted terminal identity.
const MAX_DEVICE_ID_LEN: usize = 100;

/// Longest accepted item name before device-side truncation.
const MAX_ITEM_NAME_LEN: usize = 200;

/// Highest accepted unit price: 99,999,999.99.
pub const MAX_ITEM_PRICE_CENTS: i64 = 9_999_999_999;

/// Highest accepted quantity: 99,999.999 units.
///
/// With the price cap and `MAX_RECEIPT_ITEMS` a receipt total stays far
/// inside `i64` cents.
pub const MAX_ITEM_QUANTITY_MILLI: i64 = 99_999_999;

// =============================================================================
// Job Validators
// =============================================================================

/// Validates a submission before it is queued.
///
/// ## Rules
/// - `deviceId` must not be empty
/// - Receipts and stornos need at least one item, each of them valid
/// - Z-reports must not carry items
pub fn validate_new_job(job: &NewPrintJob) -> ValidationResult<()> {
    validate_device_id(&job.device_id)?;

    if let Some(priority) = job.priority {
        validate_priority(priority)?;
    }

    if job.job_type.carries_items() {
        validate_items_payload(job.job_type.as_str(), &job.payload)
    } else if !job.payload.items.is_empty() {
        Err(ValidationError::UnexpectedForJobType {
            job_type: job.job_type.as_str().to_string(),
            field: "items".to_string(),
        })
    } else {
        Ok(())
    }
}

/// Validates the submitting terminal identity.
pub fn validate_device_id(device_id: &str) -> ValidationResult<()> {
    let device_id = device_id.trim();

    if device_id.is_empty() {
        return Err(ValidationError::Required {
            field: "deviceId".to_string(),
        });
    }

    if device_id.chars().count() > MAX_DEVICE_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "deviceId".to_string(),
            max: MAX_DEVICE_ID_LEN,
        });
    }

    Ok(())
}

/// Validates a caller-supplied priority.
pub fn validate_priority(priority: i64) -> ValidationResult<()> {
    if !(0..=1000).contains(&priority) {
        return Err(ValidationError::OutOfRange {
            field: "priority".to_string(),
            min: 0,
            max: 1000,
        });
    }
    Ok(())
}

fn validate_items_payload(job_type: &str, payload: &JobPayload) -> ValidationResult<()> {
    if payload.items.is_empty() {
        return Err(ValidationError::MissingForJobType {
            job_type: job_type.to_string(),
            field: "items".to_string(),
        });
    }

    if payload.items.len() > MAX_RECEIPT_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_RECEIPT_ITEMS as i64,
        });
    }

    payload
        .items
        .iter()
        .enumerate()
        .try_for_each(|(index, item)| validate_line_item(index, item))
}

/// Validates one line item.
///
/// ## Rules
/// - Name must not be empty (it is truncated later, not here)
/// - Quantity must be positive and at most `MAX_ITEM_QUANTITY_MILLI`
/// - Price must not be negative (zero is allowed for free items) and at
///   most `MAX_ITEM_PRICE_CENTS`
pub fn validate_line_item(index: usize, item: &LineItem) -> ValidationResult<()> {
    let field = |name: &str| format!("items[{}].{}", index, name);

    let name = item.name.trim();
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field("name"),
        });
    }
    if name.chars().count() > MAX_ITEM_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field("name"),
            max: MAX_ITEM_NAME_LEN,
        });
    }

    if !item.quantity.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: field("quantity"),
        });
    }

    if item.quantity.milli() > MAX_ITEM_QUANTITY_MILLI {
        return Err(ValidationError::OutOfRange {
            field: field("quantity"),
            min: 1,
            max: MAX_ITEM_QUANTITY_MILLI,
        });
    }

    if item.price_cents.is_negative() {
        return Err(ValidationError::Negative {
            field: field("priceCents"),
        });
    }

    if item.price_cents.cents() > MAX_ITEM_PRICE_CENTS {
        return Err(ValidationError::OutOfRange {
            field: field("priceCents"),
            min: 0,
            max: MAX_ITEM_PRICE_CENTS,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Quantity;
    use crate::types::PaymentMethod;

    fn receipt_with(items: Vec<LineItem>) -> NewPrintJob {
        NewPrintJob::receipt("pos-1", JobPayload::with_items(items, PaymentMethod::Cash))
    }

    #[test]
    fn test_valid_receipt() {
        let job = receipt_with(vec![
            LineItem::new("Buke", 80, Quantity::from_units(2)),
            LineItem::new("Qese", 0, Quantity::from_units(1)),
        ]);
        assert!(validate_new_job(&job).is_ok());
    }

    #[test]
    fn test_receipt_requires_items() {
        let err = validate_new_job(&receipt_with(vec![])).unwrap_err();
        assert_eq!(err.to_string(), "receipt job requires items");

        let storno = NewPrintJob::storno("pos-1", JobPayload::default());
        assert!(validate_new_job(&storno).is_err());
    }

    #[test]
    fn test_item_rules() {
        let blank = receipt_with(vec![LineItem::new("  ", 100, Quantity::from_units(1))]);
        assert!(matches!(
            validate_new_job(&blank),
            Err(ValidationError::Required { .. })
        ));

        let zero_qty = receipt_with(vec![LineItem::new("Uje", 100, Quantity::from_milli(0))]);
        assert_eq!(
            validate_new_job(&zero_qty).unwrap_err().to_string(),
            "items[0].quantity must be positive"
        );

        let negative = receipt_with(vec![LineItem::new("Uje", -1, Quantity::from_units(1))]);
        assert!(matches!(
            validate_new_job(&negative),
            Err(ValidationError::Negative { .. })
        ));
    }

    #[test]
    fn test_item_bounds_keep_totals_representable() {
        let half = i64::MAX / 2 + 1;
        let overflowing = receipt_with(vec![
            LineItem::new("A", half, Quantity::from_units(1)),
            LineItem::new("B", half, Quantity::from_units(1)),
        ]);
        assert!(matches!(
            validate_new_job(&overflowing),
            Err(ValidationError::OutOfRange { ref field, .. }) if field == "items[0].priceCents"
        ));

        let bulk = receipt_with(vec![LineItem::new(
            "Miell",
            100,
            Quantity::from_milli(MAX_ITEM_QUANTITY_MILLI + 1),
        )]);
        assert!(matches!(
            validate_new_job(&bulk),
            Err(ValidationError::OutOfRange { ref field, .. }) if field == "items[0].quantity"
        ));

        // Every line at both caps, as many lines as allowed.
        let item = LineItem::new(
            "Max",
            MAX_ITEM_PRICE_CENTS,
            Quantity::from_milli(MAX_ITEM_QUANTITY_MILLI),
        );
        let job = receipt_with(vec![item; crate::MAX_RECEIPT_ITEMS]);
        assert!(validate_new_job(&job).is_ok());
        assert!(job.payload.total().is_ok());
    }

    #[test]
    fn test_device_id_required() {
        let mut job = NewPrintJob::z_report("");
        assert!(validate_new_job(&job).is_err());
        job.device_id = "pos-9".to_string();
        assert!(validate_new_job(&job).is_ok());
    }

    #[test]
    fn test_z_report_rejects_items() {
        let mut job = NewPrintJob::z_report("pos-1");
        job.payload.items.push(LineItem::new("X", 1, Quantity::from_units(1)));
        assert!(matches!(
            validate_new_job(&job),
            Err(ValidationError::UnexpectedForJobType { .. })
        ));
    }

    #[test]
    fn test_priority_range() {
        assert!(validate_priority(0).is_ok());
        assert!(validate_priority(-1).is_err());
        assert!(validate_priority(1001).is_err());
    }
}
