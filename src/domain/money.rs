//! Conversion between decimal amounts and the gateway's smallest currency unit.

use bigdecimal::{BigDecimal, ToPrimitive};
use thiserror::Error;

/// Minor units per major unit (paise per rupee).
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount must be greater than zero")]
    NotPositive,
    #[error("amount {amount_minor} is below the gateway minimum of {minimum_minor} minor units")]
    BelowMinimum { amount_minor: i64, minimum_minor: i64 },
    #[error("amount is too large")]
    Overflow,
}

/// Converts a decimal amount to minor units, rounding half-up.
///
/// `250.005` becomes `25001`; values that round below `minimum_minor` are
/// rejected instead of being charged as something smaller.
pub fn to_minor_units(amount: &BigDecimal, minimum_minor: i64) -> Result<i64, MoneyError> {
    if amount <= &BigDecimal::from(0) {
        return Err(MoneyError::NotPositive);
    }

    let scaled = amount * BigDecimal::from(MINOR_UNITS_PER_MAJOR);
    let whole = scaled.with_scale(0);
    let remainder = &scaled - &whole;
    let rounded = if remainder * BigDecimal::from(2) >= BigDecimal::from(1) {
        whole + BigDecimal::from(1)
    } else {
        whole
    };

    let amount_minor = rounded.to_i64().ok_or(MoneyError::Overflow)?;
    if amount_minor < minimum_minor {
        return Err(MoneyError::BelowMinimum {
            amount_minor,
            minimum_minor,
        });
    }

    Ok(amount_minor)
}

/// Converts minor units back to a two-decimal amount.
pub fn from_minor_units(amount_minor: i64) -> BigDecimal {
    (BigDecimal::from(amount_minor) / BigDecimal::from(MINOR_UNITS_PER_MAJOR)).with_scale(2)
}
