use crate::error::SettlementError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// A monetary value in the smallest currency unit.
///
/// All settlement arithmetic is done on `Cents` so that fee splits never
/// drift the way floating point would.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cents(i64);

impl Cents {
    pub const ZERO: Self = Self(0);

    /// Creates a non-negative amount.
    pub fn new(value: i64) -> Result<Self, SettlementError> {
        if value >= 0 {
            Ok(Self(value))
        } else {
            Err(SettlementError::ValidationError(
                "Amount must not be negative".to_string(),
            ))
        }
    }

    /// Converts a customer-facing amount (e.g. `299.00`) into cents.
    ///
    /// Rejects negative values and values with sub-cent precision.
    pub fn from_major(value: Decimal) -> Result<Self, SettlementError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(SettlementError::ValidationError(
                "Amount must not be negative".to_string(),
            ));
        }
        let scaled = value * Decimal::ONE_HUNDRED;
        if scaled.fract() != Decimal::ZERO {
            return Err(SettlementError::ValidationError(format!(
                "Amount {value} has more than two decimal places"
            )));
        }
        let cents = i64::try_from(scaled).map_err(|_| {
            SettlementError::ValidationError(format!("Amount {value} is out of range"))
        })?;
        Ok(Self(cents))
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// The amount in major units, for display.
    pub fn to_major(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// `rate` percent of this amount, rounded half-up to the nearest cent.
    pub fn percent(&self, rate: FeeRate) -> Self {
        let scaled = (i128::from(self.0) * i128::from(rate.percent()) + 50) / 100;
        // rate <= 100 keeps the result within [0, self].
        Self(scaled as i64)
    }
}

impl TryFrom<i64> for Cents {
    type Error = SettlementError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Cents> for i64 {
    fn from(amount: Cents) -> Self {
        amount.0
    }
}

impl Add for Cents {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Cents {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_major())
    }
}

/// Platform fee as a whole percentage in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct FeeRate(u8);

impl FeeRate {
    pub fn new(percent: u8) -> Result<Self, SettlementError> {
        if percent <= 100 {
            Ok(Self(percent))
        } else {
            Err(SettlementError::ValidationError(format!(
                "Fee rate {percent}% is outside [0, 100]"
            )))
        }
    }

    pub fn percent(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for FeeRate {
    type Error = SettlementError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FeeRate> for u8 {
    fn from(rate: FeeRate) -> Self {
        rate.0
    }
}
