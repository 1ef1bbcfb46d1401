use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// Convenience fee applied on top of every payment (0.2%).
pub const INTEREST_RATE: Decimal = Decimal::from_parts(2, 0, 0, false, 3);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("base_amount must be greater than zero")]
    NotPositive,
    #[error("amount is too large")]
    Overflow,
}

/// Amount breakdown for a payment, all in major units (pesos) rounded to the cent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaymentAmounts {
    #[serde(with = "rust_decimal::serde::float")]
    pub base: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub interest: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
}

impl PaymentAmounts {
    /// `interest = round(base × 0.002, cent)`, `total = base + interest`.
    pub fn from_base(base: Decimal) -> Result<Self, AmountError> {
        if base <= Decimal::ZERO {
            return Err(AmountError::NotPositive);
        }
        let base = round_cents(base);
        if base.is_zero() {
            return Err(AmountError::NotPositive);
        }
        let interest = round_cents(base.checked_mul(INTEREST_RATE).ok_or(AmountError::Overflow)?);
        let total = base.checked_add(interest).ok_or(AmountError::Overflow)?;
        Ok(Self {
            base,
            interest,
            total,
        })
    }

    /// Rebuilds the breakdown from stored minor units.
    pub fn from_minor(base: i64, interest: i64, total: i64) -> Self {
        Self {
            base: from_minor(base),
            interest: from_minor(interest),
            total: from_minor(total),
        }
    }

    pub fn base_minor(&self) -> Result<i64, AmountError> {
        to_minor(self.base)
    }

    pub fn interest_minor(&self) -> Result<i64, AmountError> {
        to_minor(self.interest)
    }

    pub fn total_minor(&self) -> Result<i64, AmountError> {
        to_minor(self.total)
    }
}

fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Major units to minor units (`round(amount × 100)`).
pub fn to_minor(amount: Decimal) -> Result<i64, AmountError> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|v| v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|v| v.to_i64())
        .ok_or(AmountError::Overflow)
}

pub fn from_minor(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn interest_rate_is_two_tenths_of_a_percent() {
        assert_eq!(INTEREST_RATE, dec("0.002"));
    }

    #[test]
    fn thousand_pesos_breakdown() {
        let amounts = PaymentAmounts::from_base(dec("1000.00")).unwrap();
        assert_eq!(amounts.interest, dec("2.00"));
        assert_eq!(amounts.total, dec("1002.00"));
        assert_eq!(amounts.total_minor().unwrap(), 100_200);
        assert_eq!(amounts.base_minor().unwrap(), 100_000);
        assert_eq!(amounts.interest_minor().unwrap(), 200);
    }

    #[test]
    fn interest_rounds_half_away_from_zero() {
        // 2.50 * 0.002 = 0.005 -> 0.01, banker's rounding would give 0.00
        let amounts = PaymentAmounts::from_base(dec("2.50")).unwrap();
        assert_eq!(amounts.interest, dec("0.01"));
        assert_eq!(amounts.total, dec("2.51"));
    }

    #[test]
    fn rejects_non_positive_base() {
        assert_eq!(
            PaymentAmounts::from_base(Decimal::ZERO),
            Err(AmountError::NotPositive)
        );
        assert_eq!(
            PaymentAmounts::from_base(dec("-5")),
            Err(AmountError::NotPositive)
        );
        assert_eq!(
            PaymentAmounts::from_base(dec("0.001")),
            Err(AmountError::NotPositive)
        );
    }

    #[test]
    fn minor_units_rebuild_the_same_breakdown() {
        let amounts = PaymentAmounts::from_base(dec("1234.56")).unwrap();
        let rebuilt = PaymentAmounts::from_minor(
            amounts.base_minor().unwrap(),
            amounts.interest_minor().unwrap(),
            amounts.total_minor().unwrap(),
        );
        assert_eq!(rebuilt, amounts);
    }

    #[test]
    fn serializes_as_numbers() {
        let amounts = PaymentAmounts::from_base(dec("1000")).unwrap();
        let json = serde_json::to_value(amounts).unwrap();
        assert_eq!(json["interest"], serde_json::json!(2.0));
        assert_eq!(json["total"], serde_json::json!(1002.0));
    }
}
