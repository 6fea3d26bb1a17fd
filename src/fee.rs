//! Fee and conversion calculation
//!
//! Pure decimal arithmetic. The only side effect is the rate lookup in
//! [`FeePolicy::convert`], and it is skipped when the currencies match.
//!
//! Sign convention: debit amounts are negative, credit amounts positive.
//! `net_impact(-1000, 10, true) == -1010`.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::FeeConfig;
use crate::ledger::AccountProduct;
use crate::money::{self, Currency, MoneyError, Rounding};
use crate::rates::{RateError, RateProvider};

#[derive(Debug, Error)]
pub enum FeeError {
    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error(transparent)]
    Rate(#[from] RateError),
}

/// Rounding policy for fees and converted amounts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub minor_units: u32,
    pub rounding: Rounding,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            minor_units: 2,
            rounding: Rounding::HalfEven,
        }
    }
}

impl From<&FeeConfig> for FeePolicy {
    fn from(c: &FeeConfig) -> Self {
        Self {
            minor_units: c.minor_units,
            rounding: c.rounding,
        }
    }
}

impl FeePolicy {
    /// Fee for a movement.
    ///
    /// Zero for credits and for accounts without a product; otherwise
    /// `abs(amount) * fee_percentage` rounded to the minor unit.
    ///
    /// # Example
    /// ```
    /// use rust_decimal::Decimal;
    /// use txn_engine::fee::FeePolicy;
    /// use txn_engine::ledger::AccountProduct;
    ///
    /// let product = AccountProduct { id: 1, name: "Basic".into(), fee_percentage: Decimal::new(1, 2) };
    /// let fee = FeePolicy::default().fee(Decimal::from(1000), Some(&product), true).unwrap();
    /// assert_eq!(fee.to_string(), "10.00");
    /// ```
    pub fn fee(
        &self,
        amount: Decimal,
        product: Option<&AccountProduct>,
        is_debit: bool,
    ) -> Result<Decimal, MoneyError> {
        if !is_debit {
            return Ok(Decimal::ZERO);
        }
        let Some(product) = product else {
            return Ok(Decimal::ZERO);
        };
        if product.fee_percentage.is_sign_negative() {
            return Err(MoneyError::NegativeFee);
        }
        let raw = money::checked_mul(amount.abs(), product.fee_percentage)?;
        Ok(money::round_minor(raw, self.minor_units, self.rounding))
    }

    /// Convert `amount` from one currency to another.
    ///
    /// Identity when the currencies match (no rate lookup). Otherwise
    /// `amount * rate(from, to)` rounded to the minor unit. Provider errors
    /// propagate; there is no fallback rate.
    pub async fn convert(
        &self,
        amount: Decimal,
        from: &Currency,
        to: &Currency,
        rates: &dyn RateProvider,
    ) -> Result<Decimal, FeeError> {
        if from == to {
            return Ok(amount);
        }
        let rate = rates.rate(from, to).await?;
        if rate <= Decimal::ZERO {
            return Err(RateError::InvalidRate(format!("{} -> {}: {}", from, to, rate)).into());
        }
        let raw = money::checked_mul(amount, rate)?;
        Ok(money::round_minor(raw, self.minor_units, self.rounding))
    }
}

/// Net ledger impact of a movement.
///
/// `amount` for credits; `amount - fee` for debits, so the fee reduces the
/// debited account beyond the requested amount.
#[inline]
pub fn net_impact(amount: Decimal, fee: Decimal, is_debit: bool) -> Result<Decimal, MoneyError> {
    if is_debit {
        money::checked_sub(amount, fee)
    } else {
        Ok(amount)
    }
}
