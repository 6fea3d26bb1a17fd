//! HTTP client for the currency-exchange service
//!
//! `GET {base_url}/exchange/rate?from=USD&to=EUR` returning a bare decimal
//! body (`0.9` or `"0.9"`).

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use super::{RateError, RateProvider};
use crate::config::RateProviderConfig;
use crate::money::Currency;

pub struct HttpRateProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRateProvider {
    pub fn new(config: &RateProviderConfig) -> Result<Self, RateError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RateError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn rate_url(&self) -> String {
        format!("{}/exchange/rate", self.base_url)
    }
}

/// Parse the response body into a strictly positive rate
pub(crate) fn parse_rate_body(body: &str) -> Result<Decimal, RateError> {
    let raw = body.trim().trim_matches('"');
    let rate = Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| RateError::InvalidRate(format!("unparsable body {:?}", body)))?;
    if rate <= Decimal::ZERO {
        return Err(RateError::InvalidRate(format!("non-positive rate {}", rate)));
    }
    Ok(rate)
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn rate(&self, from: &Currency, to: &Currency) -> Result<Decimal, RateError> {
        if from == to {
            return Ok(Decimal::ONE);
        }

        debug!(from = %from, to = %to, "[rates] fetching exchange rate");

        let response = self
            .client
            .get(self.rate_url())
            .query(&[("from", from.as_str()), ("to", to.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RateError::Timeout(self.timeout)
                } else {
                    RateError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(from = %from, to = %to, status = %status, "[rates] provider returned error status");
            return Err(RateError::Unavailable(format!("HTTP {}", status)));
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                RateError::Timeout(self.timeout)
            } else {
                RateError::Unavailable(e.to_string())
            }
        })?;

        parse_rate_body(&body)
    }
}
