use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when building an [`Amount`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("invalid amount '{0}'")]
    Parse(String),

    #[error("amount {0} has more than {scale} decimal places", scale = Amount::SCALE)]
    TooPrecise(Decimal),
}

/// Fixed-point decimal with 2 decimal places.
///
/// Signed, so it can carry balance deltas as well as balances. Construction
/// never rounds: a value needing more than 2 fractional digits is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Decimal);

impl Amount {
    pub const SCALE: u32 = 2;

    pub const ZERO: Self = Amount(Decimal::ZERO);

    /// Largest amount a single operation may move (999,999,999.99).
    pub const MAX_OPERATION: Self = Amount(Decimal::from_parts(1_215_752_191, 23, 0, false, 2));

    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        let mut normalized = value.normalize();
        if normalized.scale() > Self::SCALE {
            return Err(AmountError::TooPrecise(value));
        }
        normalized.rescale(Self::SCALE);
        Ok(Amount(normalized))
    }

    pub fn from_cents(cents: i64) -> Self {
        Amount(Decimal::new(cents, Self::SCALE))
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value =
            Decimal::from_str(trimmed).map_err(|_| AmountError::Parse(trimmed.to_string()))?;
        Amount::new(value)
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl std::ops::Neg for Amount {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Amount(-self.0)
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_cents_preserves_value() {
        assert_eq!(Amount::from_cents(12_345).to_string(), "123.45");
        assert_eq!(Amount::from_cents(5).to_string(), "0.05");
    }

    #[test]
    fn parse_normalizes_scale() {
        assert_eq!("100".parse::<Amount>().unwrap(), Amount::from_cents(10_000));
        assert_eq!("1.5".parse::<Amount>().unwrap().to_string(), "1.50");
        assert_eq!("  2.25 ".parse::<Amount>().unwrap(), Amount::from_cents(225));
    }

    #[test]
    fn parse_accepts_trailing_zeros_beyond_scale() {
        assert_eq!("10.500".parse::<Amount>().unwrap(), Amount::from_cents(1_050));
    }

    #[test]
    fn parse_rejects_extra_precision_instead_of_rounding() {
        let err = "1.234".parse::<Amount>().unwrap_err();
        assert!(matches!(err, AmountError::TooPrecise(_)));
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "ten".parse::<Amount>().unwrap_err();
        assert_eq!(err, AmountError::Parse("ten".to_string()));
    }

    #[test]
    fn max_operation_value() {
        assert_eq!(Amount::MAX_OPERATION.to_string(), "999999999.99");
        assert_eq!(Amount::MAX_OPERATION, Amount::from_cents(99_999_999_999));
    }

    #[test]
    fn sign_checks() {
        assert!(Amount::from_cents(1).is_positive());
        assert!(!Amount::ZERO.is_positive());
        assert!(!Amount::ZERO.is_negative());
        assert!(Amount::from_cents(-1).is_negative());
    }

    #[test]
    fn display_formats_negative() {
        assert_eq!(Amount::from_cents(-5_025).to_string(), "-50.25");
    }

    #[test]
    fn arithmetic() {
        let mut a = Amount::from_cents(10_000);
        a += Amount::from_cents(50);
        assert_eq!(a, Amount::from_cents(10_050));
        a -= Amount::from_cents(10_050);
        assert_eq!(a, Amount::ZERO);
        assert_eq!(Amount::from_cents(300) - Amount::from_cents(500), Amount::from_cents(-200));
        assert_eq!(-Amount::from_cents(300), Amount::from_cents(-300));
    }

    #[test]
    fn string_conversion_round_trips() {
        let text = String::from(Amount::from_cents(1_999));
        assert_eq!(text, "19.99");
        assert_eq!(Amount::try_from(text).unwrap(), Amount::from_cents(1_999));
    }
}
