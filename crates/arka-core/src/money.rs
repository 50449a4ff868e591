//! # Money Module
//!
//! `Money` and `Quantity` types for amounts sent to the fiscal device.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Fiscal memory stores decimal amounts exactly. A float that prints     │
//! │  as 2.4999999 on the way to the device becomes a regulatory record.    │
//! │                                                                         │
//! │  Money     → i64 cents        1250  ─► "12.50"                          │
//! │  Quantity  → i64 thousandths  1500  ─► "1.500"                          │
//! │                                                                         │
//! │  The device receives fixed-point strings built from integers only.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    ///
    /// ```rust
    /// use arka_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Zero money.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Unit price × quantity, rounded half away from zero to the cent.
    ///
    /// Returns `None` when the result does not fit in `i64` cents.
    ///
    /// ```rust
    /// use arka_core::money::{Money, Quantity};
    ///
    /// // 1.99 × 0.333 = 0.66267 → 0.66
    /// let line = Money::from_cents(199).checked_times(Quantity::from_milli(333));
    /// assert_eq!(line.map(|m| m.cents()), Some(66));
    /// ```
    pub fn checked_times(&self, quantity: Quantity) -> Option<Money> {
        let product = i128::from(self.0) * i128::from(quantity.milli());
        let half = if product < 0 { -500 } else { 500 };
        i64::try_from((product + half) / 1000).ok().map(Money)
    }

    /// Like [`Money::checked_times`], clamped to the `i64` range.
    pub fn times(&self, quantity: Quantity) -> Money {
        self.checked_times(quantity).unwrap_or(if (self.0 < 0) == (quantity.milli() < 0) {
            Money(i64::MAX)
        } else {
            Money(i64::MIN)
        })
    }

    #[inline]
    pub fn checked_add(&self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    /// Sums `amounts`, or `None` on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Option<Money> {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |acc, amount| acc.checked_add(amount))
    }

    /// Formats the amount the way fiscal drivers expect it: `"12.50"`.
    ///
    /// ```rust
    /// use arka_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(1250).to_device_string(), "12.50");
    /// assert_eq!(Money::from_cents(-5).to_device_string(), "-0.05");
    /// ```
    pub fn to_device_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        format!("{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_device_string())
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), Add::add)
    }
}

// =============================================================================
// Quantity Type
// =============================================================================

/// A quantity in thousandths of a unit (`1000` = 1 piece, `1250` = 1.25 kg).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Quantity(i64);

impl Quantity {
    /// Creates a quantity from whole units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Quantity(units * 1000)
    }

    /// Creates a quantity from thousandths of a unit.
    #[inline]
    pub const fn from_milli(milli: i64) -> Self {
        Quantity(milli)
    }

    /// Returns the quantity in thousandths.
    #[inline]
    pub const fn milli(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Formats the quantity with three decimals: `"1.500"`.
    pub fn to_device_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        format!("{}{}.{:03}", sign, abs / 1000, abs % 1000)
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Quantity::from_units(1)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_device_string())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
