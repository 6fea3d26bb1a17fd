//! Money Module
//!
//! Currency codes and the rounding policy shared by fee computation and
//! currency conversion. All monetary values are `rust_decimal::Decimal`;
//! binary floating point never touches a balance.
//!
//! ## Rounding
//! Results are rounded to the currency's minor unit (`minor_units`, default 2)
//! with the configured strategy. The default is round-half-even (banker's
//! rounding), so `0.125 -> 0.12` and `0.135 -> 0.14`.
//!
//! ```rust
//! use rust_decimal::Decimal;
//! use std::str::FromStr;
//! use txn_engine::money::{Rounding, round_minor};
//!
//! let v = Decimal::from_str("10.005").unwrap();
//! assert_eq!(round_minor(v, 2, Rounding::HalfEven).to_string(), "10.00");
//! assert_eq!(round_minor(v, 2, Rounding::HalfUp).to_string(), "10.01");
//! ```

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),

    #[error("Fee percentage must not be negative")]
    NegativeFee,

    #[error("Amount too large, would overflow")]
    Overflow,
}

// ============================================================================
// Currency
// ============================================================================

/// ISO-4217 style currency code (three ASCII letters, stored upper-case)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parse a currency code, normalizing to upper-case.
    ///
    /// Accepts `"usd"`, `" USD "`, rejects `""`, `"US"`, `"U$D"`.
    pub fn parse(code: &str) -> Result<Self, MoneyError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::parse(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

// ============================================================================
// Rounding
// ============================================================================

/// Rounding strategy applied at the minor unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Banker's rounding: ties go to the even neighbour
    #[default]
    HalfEven,
    /// Ties round away from zero
    HalfUp,
}

impl Rounding {
    fn strategy(self) -> RoundingStrategy {
        match self {
            Rounding::HalfEven => RoundingStrategy::MidpointNearestEven,
            Rounding::HalfUp => RoundingStrategy::MidpointAwayFromZero,
        }
    }
}

/// Round `value` to `minor_units` decimal places.
///
/// The result always carries exactly `minor_units` of scale so `10` renders
/// as `"10.00"` in responses and journal rows.
#[inline]
pub fn round_minor(value: Decimal, minor_units: u32, rounding: Rounding) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(minor_units, rounding.strategy());
    rounded.rescale(minor_units);
    rounded
}

/// Multiply two decimals, mapping overflow to [`MoneyError::Overflow`]
#[inline]
pub fn checked_mul(a: Decimal, b: Decimal) -> Result<Decimal, MoneyError> {
    a.checked_mul(b).ok_or(MoneyError::Overflow)
}

/// Add two decimals, mapping overflow to [`MoneyError::Overflow`]
#[inline]
pub fn checked_add(a: Decimal, b: Decimal) -> Result<Decimal, MoneyError> {
    a.checked_add(b).ok_or(MoneyError::Overflow)
}

/// Subtract two decimals, mapping overflow to [`MoneyError::Overflow`]
#[inline]
pub fn checked_sub(a: Decimal, b: Decimal) -> Result<Decimal, MoneyError> {
    a.checked_sub(b).ok_or(MoneyError::Overflow)
}
