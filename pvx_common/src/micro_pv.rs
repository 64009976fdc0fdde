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

pub const PV_UNIT_CODE: &str = "PV";

//--------------------------------------      MicroPv        ---------------------------------------------------------

/// PV share quantities in micro-units. 1 PV = 1,000,000 µPV; six decimal places of share
/// granularity stored as plain integers.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct MicroPv(i64);

op!(binary MicroPv, Add, add);
op!(binary MicroPv, Sub, sub);
op!(inplace MicroPv, SubAssign, sub_assign);
op!(unary MicroPv, Neg, neg);

impl Mul<i64> for MicroPv {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for MicroPv {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in microPV: {0}")]
pub struct MicroPvConversionError(String);

impl From<i64> for MicroPv {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl PartialEq for MicroPv {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for MicroPv {}

impl TryFrom<u64> for MicroPv {
    type Error = MicroPvConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(MicroPvConversionError(format!("Value {} is too large to convert to MicroPv", value)))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for MicroPv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pv = self.0 as f64 / 1_000_000.0;
        write!(f, "{pv:0.4} {PV_UNIT_CODE}")
    }
}

impl MicroPv {
    /// Decimal places carried by the micro-unit representation.
    pub const SCALE: u32 = 6;

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_pv(pv: i64) -> Self {
        Self(pv * 1_000_000)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Exact decimal view of this quantity.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, Self::SCALE)
    }

    /// Converts a decimal quantity to micro-units, truncating toward zero any precision beyond
    /// [`MicroPv::SCALE`] decimal places.
    pub fn truncate_from_decimal(value: Decimal) -> Result<Self, MicroPvConversionError> {
        value
            .checked_mul(Decimal::from(1_000_000_i64))
            .map(|micro| micro.trunc())
            .and_then(|micro| micro.to_i64())
            .map(Self)
            .ok_or_else(|| MicroPvConversionError(format!("{value} does not fit in the micro-unit range")))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn truncation_never_rounds_up() {
        let value: Decimal = "73.20508075688772".parse().unwrap();
        assert_eq!(MicroPv::truncate_from_decimal(value).unwrap(), MicroPv::from(73_205_080));
    }

    #[test]
    fn sum_folds_from_zero() {
        let total: MicroPv = [1_i64, 2, 3].into_iter().map(MicroPv::from).sum();
        assert_eq!(total, MicroPv::from(6));
    }
}
