//! Exchange Rate Providers
//!
//! The engine asks a [`RateProvider`] for `rate(from, to)` whenever a movement
//! crosses currencies. A live conversion never falls back to a hardcoded
//! rate: an unreachable or misbehaving provider aborts the unit of work with
//! a dependency error and leaves the ledger untouched.

pub mod http;

pub use http::HttpRateProvider;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::money::Currency;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateError {
    #[error("Rate provider unavailable: {0}")]
    Unavailable(String),

    #[error("Rate provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate provider returned an invalid rate: {0}")]
    InvalidRate(String),

    #[error("No rate for pair {0} -> {1}")]
    UnsupportedPair(String, String),
}

/// Source of conversion rates between two currency codes
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &'static str;

    /// Strictly positive rate such that `amount_to = amount_from * rate`
    async fn rate(&self, from: &Currency, to: &Currency) -> Result<Decimal, RateError>;
}

// ============================================================================
// Static table
// ============================================================================

/// Fixed rate table. Pairs are directional; no inverse is derived.
#[derive(Debug, Clone, Default)]
pub struct StaticRateProvider {
    rates: HashMap<(String, String), Decimal>,
}

impl StaticRateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; codes are upper-cased
    pub fn with_rate(mut self, from: &str, to: &str, rate: Decimal) -> Self {
        self.rates
            .insert((from.to_ascii_uppercase(), to.to_ascii_uppercase()), rate);
        self
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn rate(&self, from: &Currency, to: &Currency) -> Result<Decimal, RateError> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        self.rates
            .get(&(from.to_string(), to.to_string()))
            .copied()
            .ok_or_else(|| RateError::UnsupportedPair(from.to_string(), to.to_string()))
    }
}

// ============================================================================
// TTL cache
// ============================================================================

/// Caches successful lookups per currency pair for `ttl`.
///
/// Errors are never cached, so a recovered provider is used on the next call.
pub struct CachingRateProvider {
    inner: Arc<dyn RateProvider>,
    ttl: Duration,
    entries: DashMap<(Currency, Currency), (Decimal, Instant)>,
}

impl CachingRateProvider {
    pub fn new(inner: Arc<dyn RateProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Number of cached pairs (including stale ones not yet refreshed)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RateProvider for CachingRateProvider {
    fn name(&self) -> &'static str {
        "caching"
    }

    async fn rate(&self, from: &Currency, to: &Currency) -> Result<Decimal, RateError> {
        let pair = (from.clone(), to.clone());
        if let Some(entry) = self.entries.get(&pair) {
            let (rate, fetched_at) = *entry.value();
            if fetched_at.elapsed() < self.ttl {
                debug!(from = %from, to = %to, rate = %rate, "[rates] cache hit");
                return Ok(rate);
            }
        }

        let rate = self.inner.rate(from, to).await?;
        self.entries.insert(pair, (rate, Instant::now()));
        Ok(rate)
    }
}
