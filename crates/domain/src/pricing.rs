//! Cart and order totals.

use serde::{Deserialize, Serialize};

use crate::value_objects::Money;

/// GST applied to the subtotal, in basis points.
pub const GST_RATE_BASIS_POINTS: i64 = 1_800;

/// Subtotals strictly below this pay the delivery fee.
pub const FREE_DELIVERY_THRESHOLD: Money = Money::from_rupees(500);

pub const DELIVERY_FEE: Money = Money::from_rupees(50);

/// Price breakdown for a set of lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Money,
    pub tax_amount: Money,
    pub delivery_fee: Money,
    pub total_amount: Money,
}

impl Totals {
    /// Totals of an empty cart, shown without invoking the pricing rules.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Prices `(unit_price, quantity)` pairs.
///
/// Pure and deterministic: the same lines always produce the same totals.
pub fn price<I>(lines: I) -> Totals
where
    I: IntoIterator<Item = (Money, u32)>,
{
    let subtotal: Money = lines
        .into_iter()
        .map(|(unit_price, quantity)| unit_price.multiply(quantity))
        .sum();
    let tax_amount = subtotal.apply_rate(GST_RATE_BASIS_POINTS);
    let delivery_fee = if subtotal < FREE_DELIVERY_THRESHOLD {
        DELIVERY_FEE
    } else {
        Money::ZERO
    };

    Totals {
        subtotal,
        tax_amount,
        delivery_fee,
        total_amount: subtotal + tax_amount + delivery_fee,
    }
}
