use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul, Neg, Sub, SubAssign},
};

use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const USDP_CURRENCY_CODE: &str = "USDP";

//--------------------------------------     MicroUsdp       ---------------------------------------------------------

/// USDP amounts in micro-units. 1 USDP = 1,000,000 µUSDP, so the ledger resolves to six decimal
/// places while storing plain integers.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct MicroUsdp(i64);

op!(binary MicroUsdp, Add, add);
op!(binary MicroUsdp, Sub, sub);
op!(inplace MicroUsdp, SubAssign, sub_assign);
op!(unary MicroUsdp, Neg, neg);

impl Mul<i64> for MicroUsdp {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for MicroUsdp {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in microUSDP: {0}")]
pub struct MicroUsdpConversionError(String);

impl From<i64> for MicroUsdp {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl PartialEq for MicroUsdp {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for MicroUsdp {}

impl TryFrom<u64> for MicroUsdp {
    type Error = MicroUsdpConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(MicroUsdpConversionError(format!("Value {} is too large to convert to MicroUsdp", value)))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for MicroUsdp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let usdp = self.0 as f64 / 1_000_000.0;
        write!(f, "{usdp:0.2} {USDP_CURRENCY_CODE}")
    }
}

impl MicroUsdp {
    /// Decimal places carried by the micro-unit representation.
    pub const SCALE: u32 = 6;

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_usdp(usdp: i64) -> Self {
        Self(usdp * 1_000_000)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Exact decimal view of this amount.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, Self::SCALE)
    }

    /// Converts a decimal amount to micro-units, truncating toward zero any precision beyond
    /// [`MicroUsdp::SCALE`] decimal places.
    pub fn truncate_from_decimal(value: Decimal) -> Result<Self, MicroUsdpConversionError> {
        value
            .checked_mul(Decimal::from(1_000_000_i64))
            .map(|micro| micro.trunc())
            .and_then(|micro| micro.to_i64())
            .map(Self)
            .ok_or_else(|| MicroUsdpConversionError(format!("{value} does not fit in the micro-unit range")))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decimal_round_trip_truncates_downward() {
        let exact = Decimal::new(1_234_567, 6);
        assert_eq!(MicroUsdp::truncate_from_decimal(exact).unwrap(), MicroUsdp::from(1_234_567));
        // anything beyond 6 dp is discarded, not rounded
        let long = Decimal::new(1_234_567_9, 7);
        assert_eq!(MicroUsdp::truncate_from_decimal(long).unwrap(), MicroUsdp::from(1_234_567));
    }

    #[test]
    fn from_usdp_scales_to_micro_units() {
        assert_eq!(MicroUsdp::from_usdp(25).value(), 25_000_000);
        assert_eq!(MicroUsdp::from_usdp(25).to_decimal(), Decimal::new(25, 0));
    }

    #[test]
    fn arithmetic_is_exact() {
        let a = MicroUsdp::from(1_500_000);
        let b = MicroUsdp::from(499_999);
        assert_eq!(a - b, MicroUsdp::from(1_000_001));
        assert_eq!(a + b, MicroUsdp::from(1_999_999));
        assert_eq!(-b, MicroUsdp::from(-499_999));
        assert_eq!(b * 3, MicroUsdp::from(1_499_997));
    }
}
