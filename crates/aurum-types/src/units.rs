//! Dual-unit quantity types
//!
//! Every balance in Aurum is carried in one of two units: grams of metal or
//! fiat currency. Both are fixed-point `Decimal` newtypes with checked
//! arithmetic; binary floats never touch a balance. The two units are bridged
//! by a per-gram price (a `Money` value from a quotation).

use crate::{AurumError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Mass tolerance for settlement comparisons, in grams.
///
/// Residues below this threshold come from division when deriving grams from
/// a currency amount; a remaining balance within tolerance of zero is treated
/// as fully settled and clamped to exactly zero.
pub const GRAM_TOLERANCE: Grams = Grams(dec!(0.0001));

/// A mass of metal in grams
///
/// Signed: account entries and ledger metal deltas use negative values for
/// outflows. Credit balances are kept non-negative by the operations that
/// update them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grams(Decimal);

impl Grams {
    /// Zero grams
    pub const ZERO: Grams = Grams(Decimal::ZERO);

    /// Create from a decimal value
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Get the inner decimal
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Check if the mass is zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Check if the mass is strictly positive
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Check if the mass is strictly negative
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Get the absolute value
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Negate the mass
    pub fn negate(&self) -> Self {
        Self(-self.0)
    }

    /// Check if the mass is within [`GRAM_TOLERANCE`] of zero
    pub fn is_within_tolerance(&self) -> bool {
        self.0.abs() <= GRAM_TOLERANCE.0
    }

    /// Checked addition
    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(AurumError::AmountOverflow)
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(AurumError::AmountOverflow)
    }

    /// Convert to currency at a per-gram price
    pub fn to_money(self, price_per_gram: Money) -> Result<Money> {
        self.0
            .checked_mul(price_per_gram.0)
            .map(Money)
            .ok_or(AurumError::AmountOverflow)
    }

    /// The smaller of two masses
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }
}

impl fmt::Display for Grams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} g", self.0)
    }
}

// Implement Add/Sub traits for convenience (panics on overflow)
impl Add for Grams {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        self.checked_add(other).expect("Grams addition overflow")
    }
}

impl Sub for Grams {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        self.checked_sub(other).expect("Grams subtraction overflow")
    }
}

/// A fiat currency amount
///
/// Signed: the ledger derives a signed value per transaction from its kind,
/// and reversals rely on exact negation. Per-gram quotation prices are also
/// carried as `Money`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Zero currency
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Create from a decimal value
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Get the inner decimal
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Check if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Check if the amount is strictly positive
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Check if the amount is strictly negative
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Get the absolute value
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Negate the amount
    pub fn negate(&self) -> Self {
        Self(-self.0)
    }

    /// Checked addition
    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(AurumError::AmountOverflow)
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(AurumError::AmountOverflow)
    }

    /// Convert to grams at a per-gram price
    pub fn to_grams(self, price_per_gram: Money) -> Result<Grams> {
        if price_per_gram.is_zero() {
            return Err(AurumError::DivisionByZero);
        }
        self.0
            .checked_div(price_per_gram.0)
            .map(Grams)
            .ok_or(AurumError::AmountOverflow)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement Add/Sub traits for convenience (panics on overflow)
impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        self.checked_add(other).expect("Money addition overflow")
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        self.checked_sub(other).expect("Money subtraction overflow")
    }
}
