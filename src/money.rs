//! Fixed-point currency type with cent precision.
//!
//! Uses `rust_decimal` internally and rounds half-up (away from zero) to two
//! decimal places on every construction, so withholding amounts never carry
//! sub-cent noise between calculation steps.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

/// A currency amount that always holds exactly two decimal places.
///
/// # Examples
///
/// ```
/// use std::str::FromStr;
/// use garnishment_engine::Money;
///
/// let amount = Money::from_str("10.005").unwrap();
/// assert_eq!(amount.to_string(), "10.01");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(Decimal);

impl Money {
    /// The number of decimal places to maintain.
    pub const SCALE: u32 = 2;

    /// Zero value.
    pub const ZERO: Self = Money(Decimal::ZERO);

    /// One cent, the smallest distributable unit.
    pub const CENT: Self = Money(Decimal::from_parts(1, 0, 0, false, 2));

    /// Largest magnitude accepted on input: one quadrillion.
    pub const MAX_AMOUNT: Self = Money(Decimal::from_parts(0x5D8A_0000, 0x0163_4578, 0, false, 2));

    /// Creates a new `Money` from a `Decimal`, rounding half-up to cents.
    pub fn new(value: Decimal) -> Self {
        let mut rounded = value.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero);
        if rounded.is_zero() {
            rounded.set_sign_positive(true);
        }
        rounded.rescale(Self::SCALE);
        Money(rounded)
    }

    /// Creates a new `Money` from a whole number of currency units.
    pub fn from_units(units: i64) -> Self {
        Money::new(Decimal::from(units))
    }

    /// Creates a new `Money` from a number of cents.
    pub fn from_cents(cents: i64) -> Self {
        Money::new(Decimal::new(cents, Self::SCALE))
    }

    /// Returns the underlying decimal value.
    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Creates a new `Money` from a wide number of cents.
    ///
    /// Returns `None` when the value does not fit a `Decimal`.
    pub fn from_cents_wide(cents: i128) -> Option<Self> {
        Decimal::try_from_i128_with_scale(cents, Self::SCALE)
            .ok()
            .map(Money::new)
    }

    /// Returns the amount expressed in whole cents, or `None` if it does
    /// not fit.
    pub fn cents(&self) -> Option<i128> {
        self.0.checked_mul(Decimal::ONE_HUNDRED)?.to_i128()
    }

    /// Returns `true` if this value is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns `true` if this value is strictly below zero.
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Returns `true` if the magnitude is at most [`Money::MAX_AMOUNT`].
    pub fn is_within_range(&self) -> bool {
        self.0.abs() <= Self::MAX_AMOUNT.0
    }

    /// Addition that returns `None` instead of overflowing.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Money::new)
    }

    /// Multiplication by a factor that returns `None` instead of overflowing.
    pub fn checked_mul(self, factor: Decimal) -> Option<Self> {
        self.0.checked_mul(factor).map(Money::new)
    }

    /// `percent` per cent of this amount (`percent_of(60)` is 60%).
    pub fn percent_of(&self, percent: Decimal) -> Self {
        Money::new(self.0 * (percent / Decimal::ONE_HUNDRED))
    }

    /// Multiplies by an arbitrary factor, rounding the product to cents.
    ///
    /// Saturates at the largest representable amount of the product's sign.
    pub fn scale_by(&self, factor: Decimal) -> Self {
        self.checked_mul(factor).unwrap_or_else(|| {
            if self.is_negative() == factor.is_sign_negative() {
                Money::new(Decimal::MAX)
            } else {
                Money::new(Decimal::MIN)
            }
        })
    }

    /// Divides by an arbitrary non-zero divisor, rounding to cents.
    ///
    /// Returns zero when `divisor` is zero.
    pub fn divide_by(&self, divisor: Decimal) -> Self {
        if divisor.is_zero() {
            return Money::ZERO;
        }
        Money::new(self.0 / divisor)
    }

    /// Subtraction floored at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        if rhs >= self {
            Money::ZERO
        } else {
            self - rhs
        }
    }

    /// Clamps negative values up to zero.
    pub fn floor_zero(self) -> Self {
        self.max(Money::ZERO)
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Money::new(value)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let decimal = Decimal::from_str(trimmed)?;
        Ok(Money::new(decimal))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Money::new(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Money::new(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + *m)
    }
}

impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:.2}", self.0))
    }
}

impl<'de> Deserialize<'de> for Money {
    /// Accepts JSON numbers as well as strings.
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let decimal = <Decimal as Deserialize>::deserialize(deserializer)?;
        Ok(Money::new(decimal))
    }
}
