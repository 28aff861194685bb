use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Fixed-point money: a `Decimal` permanently scaled to 2 fractional digits
/// using banker's rounding. Never backed by `f64` — see spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Money(value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven))
    }

    pub fn from_minor_units(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Decimal::ZERO
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Multiplies by a rate (e.g. the platform fee rate) and rounds the
    /// result to 2dp with banker's rounding, per spec.md §4.2.
    pub fn mul_rate(&self, rate: Decimal) -> Money {
        Money::new(self.0 * rate)
    }

    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money::new)
    }

    pub fn checked_sub(&self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money::new)
    }
}

impl std::ops::Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money::new(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money::new(self.0 - rhs.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s).map(Money::new)
    }
}

impl From<Decimal> for Money {
    fn from(d: Decimal) -> Self {
        Money::new(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fee_rounding_uses_bankers_rounding() {
        let amount = Money::new(dec!(123.45));
        let fee = amount.mul_rate(dec!(0.10));
        assert_eq!(fee, Money::new(dec!(12.35)));
        let escrow = amount - fee;
        assert_eq!(escrow, Money::new(dec!(111.10)));
    }

    #[test]
    fn display_always_shows_two_decimals() {
        let m = Money::from_minor_units(500);
        assert_eq!(m.to_string(), "5.00");
    }

    #[test]
    fn midpoint_rounds_to_even() {
        // 0.125 rounded to 2dp: nearest-even -> 0.12
        let m = Money::new(dec!(0.125));
        assert_eq!(m.to_string(), "0.12");
    }
}
