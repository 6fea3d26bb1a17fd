//! Webhook sink: POSTs each event as JSON to the notification service

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{EventSink, PublishError, TransactionEvent};
use crate::config::EventsConfig;

pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: &str, config: &EventsConfig) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.webhook_timeout_ms))
            .build()
            .map_err(|e| PublishError::Sink(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, event: &TransactionEvent) -> Result<(), PublishError> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| PublishError::Sink(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Sink(format!("webhook returned {}", status)));
        }
        debug!(url = %self.url, status = status.as_u16(), "[events] webhook accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TransactionResponse;
    use crate::ledger::{MovementType, TxStatus};
    use crate::money::Currency;
    use chrono::Utc;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_unreachable_webhook_is_sink_error() {
        let config = EventsConfig {
            webhook_timeout_ms: 200,
            ..EventsConfig::default()
        };
        // Port 9 (discard) is closed on test hosts
        let sink = WebhookSink::new("http://127.0.0.1:9/notifications", &config).unwrap();
        let event = TransactionEvent::new(
            "transaction-events",
            TransactionResponse {
                transaction_id: 1,
                account_key: "AR01".into(),
                amount: Decimal::ONE,
                fee: Decimal::ZERO,
                total: Decimal::ONE,
                timestamp: Utc::now(),
                reference: String::new(),
                status: TxStatus::Completed,
                currency: Currency::parse("ARS").unwrap(),
                movement_type: MovementType::Deposit,
                correlation_id: None,
            },
        );
        assert!(matches!(sink.deliver(&event).await, Err(PublishError::Sink(_))));
    }
}
