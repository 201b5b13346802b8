//! Fixed-point helpers for monetary values.
//!
//! Every monetary boundary in the engine (a single tax amount, a tax
//! total, gross and net pay) is rounded to two decimal places with the
//! usual "half away from zero" strategy so that multi-rule pipelines do
//! not accumulate drift.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places kept for currency amounts.
pub const MONEY_SCALE: u32 = 2;

/// Rounds a currency amount (or an hour count) to two decimal places.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Applies a percentage expressed on the 0-100 scale, without rounding.
pub fn percent_of(value: Decimal, rate: Decimal) -> Decimal {
    value * rate / Decimal::ONE_HUNDRED
}
