//! Line-item math shared by proposals and invoices.
//!
//! All money is integer cents and tax rates are basis points, so totals
//! are exact. Tax rounds half up on the subtotal.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

pub const MAX_TAX_RATE_BP: i32 = 10_000;
pub const MAX_QUANTITY: i64 = 1_000_000;
pub const MAX_UNIT_PRICE_CENTS: i64 = 100_000_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItem {
    pub description: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
}

/// Parses and validates a JSON line-item array from an API payload.
pub fn parse_line_items(value: &Value) -> AppResult<Vec<LineItem>> {
    let items: Vec<LineItem> = serde_json::from_value(value.clone())
        .map_err(|_| AppError::bad_request("line_items must be an array of line items"))?;

    if items.is_empty() {
        return Err(AppError::bad_request("at least one line item is required"));
    }
    for item in &items {
        if item.description.trim().is_empty() {
            return Err(AppError::bad_request(
                "line item descriptions must not be empty",
            ));
        }
        if item.quantity <= 0 {
            return Err(AppError::bad_request("line item quantity must be positive"));
        }
        if item.quantity > MAX_QUANTITY {
            return Err(AppError::bad_request(
                "line item quantity exceeds the supported range",
            ));
        }
        if item.unit_price_cents < 0 {
            return Err(AppError::bad_request(
                "line item prices must not be negative",
            ));
        }
        if item.unit_price_cents > MAX_UNIT_PRICE_CENTS {
            return Err(AppError::bad_request(
                "line item price exceeds the supported range",
            ));
        }
    }
    Ok(items)
}

pub fn validate_tax_rate(tax_rate_bp: i32) -> AppResult<()> {
    if !(0..=MAX_TAX_RATE_BP).contains(&tax_rate_bp) {
        return Err(AppError::bad_request(
            "tax rate must be between 0 and 10000 basis points",
        ));
    }
    Ok(())
}

pub fn compute_totals(items: &[LineItem], tax_rate_bp: i32) -> AppResult<Totals> {
    let mut subtotal_cents: i64 = 0;
    for item in items {
        let line_cents = item
            .quantity
            .checked_mul(item.unit_price_cents)
            .ok_or_else(totals_out_of_range)?;
        subtotal_cents = subtotal_cents
            .checked_add(line_cents)
            .ok_or_else(totals_out_of_range)?;
    }
    let tax_cents = subtotal_cents
        .checked_mul(tax_rate_bp as i64)
        .and_then(|scaled| scaled.checked_add(5_000))
        .ok_or_else(totals_out_of_range)?
        / 10_000;
    let total_cents = subtotal_cents
        .checked_add(tax_cents)
        .ok_or_else(totals_out_of_range)?;
    Ok(Totals {
        subtotal_cents,
        tax_cents,
        total_cents,
    })
}

fn totals_out_of_range() -> AppError {
    AppError::bad_request("line item totals exceed the supported range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn totals_sum_quantity_times_price() {
        let items = vec![
            LineItem {
                description: "Wedding package".into(),
                quantity: 1,
                unit_price_cents: 250_000,
            },
            LineItem {
                description: "Extra prints".into(),
                quantity: 10,
                unit_price_cents: 1_500,
            },
        ];
        let totals = compute_totals(&items, 0).unwrap();
        assert_eq!(totals.subtotal_cents, 265_000);
        assert_eq!(totals.tax_cents, 0);
        assert_eq!(totals.total_cents, 265_000);
    }

    #[test]
    fn tax_rounds_half_up() {
        let items = vec![LineItem {
            description: "Session".into(),
            quantity: 1,
            unit_price_cents: 10_001,
        }];
        // 8.25% of 100.01 is 825.0825 cents, rounds to 825.
        let totals = compute_totals(&items, 825).unwrap();
        assert_eq!(totals.tax_cents, 825);
        assert_eq!(totals.total_cents, 10_826);

        // 50 cents at 1% is exactly half a cent, rounds up.
        let items = vec![LineItem {
            description: "Tiny".into(),
            quantity: 1,
            unit_price_cents: 50,
        }];
        let totals = compute_totals(&items, 100).unwrap();
        assert_eq!(totals.tax_cents, 1);
    }

    #[test]
    fn oversized_amounts_error_instead_of_wrapping() {
        assert!(parse_line_items(&json!([
            { "description": "Bulk", "quantity": i64::MAX, "unit_price_cents": 2 }
        ]))
        .is_err());
        assert!(parse_line_items(&json!([
            { "description": "Bulk", "quantity": 1, "unit_price_cents": MAX_UNIT_PRICE_CENTS + 1 }
        ]))
        .is_err());

        // Even unvalidated inputs never wrap to a negative total.
        let items = vec![LineItem {
            description: "Bulk".into(),
            quantity: i64::MAX,
            unit_price_cents: 2,
        }];
        assert!(compute_totals(&items, 0).is_err());

        let many = vec![
            LineItem {
                description: "Cap".into(),
                quantity: MAX_QUANTITY,
                unit_price_cents: MAX_UNIT_PRICE_CENTS,
            };
            100_000
        ];
        assert!(compute_totals(&many, 0).is_err());
    }

    #[test]
    fn rejects_empty_and_malformed_items() {
        assert!(parse_line_items(&json!([])).is_err());
        assert!(parse_line_items(&json!("not an array")).is_err());
        assert!(parse_line_items(&json!([
            { "description": "", "quantity": 1, "unit_price_cents": 100 }
        ]))
        .is_err());
        assert!(parse_line_items(&json!([
            { "description": "ok", "quantity": 0, "unit_price_cents": 100 }
        ]))
        .is_err());
        assert!(parse_line_items(&json!([
            { "description": "ok", "quantity": 1, "unit_price_cents": -1 }
        ]))
        .is_err());
    }

    #[test]
    fn tax_rate_bounds() {
        assert!(validate_tax_rate(0).is_ok());
        assert!(validate_tax_rate(MAX_TAX_RATE_BP).is_ok());
        assert!(validate_tax_rate(-1).is_err());
        assert!(validate_tax_rate(MAX_TAX_RATE_BP + 1).is_err());
    }
}
