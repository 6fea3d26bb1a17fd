//! Event Publisher
//!
//! One [`TransactionEvent`] per committed journal entry. Publishing happens
//! after commit and is best-effort: a failure is logged by the caller and
//! never rolls back the ledger.
//!
//! ```text
//! engine ──publish()──▶ ChannelPublisher ══ mpsc ══▶ EventDispatcher ──▶ EventSink
//!         (try_send,                                  (own task)         (webhook | log)
//!          never blocks)
//! ```

pub mod webhook;

pub use webhook::WebhookSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::TransactionResponse;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Event queue is full")]
    QueueFull,

    #[error("Event queue is closed")]
    Closed,

    #[error("Event sink failed: {0}")]
    Sink(String),
}

/// Transport-neutral notification for one journal entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    pub topic: String,
    /// Partition key (the account key)
    pub key: String,
    pub transaction: TransactionResponse,
    pub published_at: DateTime<Utc>,
}

impl TransactionEvent {
    pub fn new(topic: &str, transaction: TransactionResponse) -> Self {
        Self {
            topic: topic.to_string(),
            key: transaction.account_key.clone(),
            transaction,
            published_at: Utc::now(),
        }
    }
}

/// Fire-and-forget publisher; must not block the caller
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: TransactionEvent) -> Result<(), PublishError>;
}

/// Delivery target drained by [`EventDispatcher`]
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, event: &TransactionEvent) -> Result<(), PublishError>;
}

// ============================================================================
// Channel publisher + dispatcher
// ============================================================================

#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<TransactionEvent>,
}

impl ChannelPublisher {
    /// Bounded queue of `queue_size` events and the dispatcher that drains it
    pub fn channel(queue_size: usize, sink: Arc<dyn EventSink>) -> (Self, EventDispatcher) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        (Self { tx }, EventDispatcher { rx, sink })
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, event: TransactionEvent) -> Result<(), PublishError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PublishError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
        })
    }
}

pub struct EventDispatcher {
    rx: mpsc::Receiver<TransactionEvent>,
    sink: Arc<dyn EventSink>,
}

impl EventDispatcher {
    /// Deliver events until every publisher is dropped; returns the count delivered
    pub async fn run(mut self) -> usize {
        info!(sink = self.sink.name(), "[events] dispatcher started");
        let mut delivered = 0;
        while let Some(event) = self.rx.recv().await {
            match self.sink.deliver(&event).await {
                Ok(()) => {
                    delivered += 1;
                    debug!(
                        transaction_id = event.transaction.transaction_id,
                        topic = %event.topic,
                        "[events] delivered"
                    );
                }
                Err(e) => warn!(
                    transaction_id = event.transaction.transaction_id,
                    error = %e,
                    "[events] delivery failed, event dropped"
                ),
            }
        }
        info!(delivered, "[events] dispatcher stopped");
        delivered
    }
}

/// Writes each event to the log as JSON
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, event: &TransactionEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event).map_err(|e| PublishError::Sink(e.to_string()))?;
        info!(topic = %event.topic, key = %event.key, payload = %payload, "[events] transaction event");
        Ok(())
    }
}

// ============================================================================
// Recording publisher
// ============================================================================

/// Keeps published events in memory; can be switched to fail every publish
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<TransactionEvent>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<TransactionEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: TransactionEvent) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Sink("publisher configured to fail".to_string()));
        }
        self.events
            .lock()
            .map_err(|_| PublishError::Sink("recorder lock poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MovementType, TxStatus};
    use crate::money::Currency;
    use rust_decimal::Decimal;
    use std::sync::atomic::AtomicUsize;

    fn event(id: i64) -> TransactionEvent {
        TransactionEvent::new(
            "transaction-events",
            TransactionResponse {
                transaction_id: id,
                account_key: "AR01".into(),
                amount: Decimal::from(10),
                fee: Decimal::ZERO,
                total: Decimal::from(10),
                timestamp: Utc::now(),
                reference: "r".into(),
                status: TxStatus::Completed,
                currency: Currency::parse("ARS").unwrap(),
                movement_type: MovementType::Deposit,
                correlation_id: None,
            },
        )
    }

    struct CountingSink {
        delivered: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EventSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn deliver(&self, _event: &TransactionEvent) -> Result<(), PublishError> {
            if self.fail {
                return Err(PublishError::Sink("down".into()));
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_event_keyed_by_account() {
        let e = event(1);
        assert_eq!(e.key, "AR01");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["transaction"]["transactionId"], 1);
        assert!(json["publishedAt"].is_string());
    }

    #[tokio::test]
    async fn test_dispatcher_drains_queue() {
        let sink = Arc::new(CountingSink {
            delivered: AtomicUsize::new(0),
            fail: false,
        });
        let (publisher, dispatcher) = ChannelPublisher::channel(8, sink.clone());
        publisher.publish(event(1)).unwrap();
        publisher.publish(event(2)).unwrap();
        drop(publisher);

        assert_eq!(dispatcher.run().await, 2);
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let sink = Arc::new(CountingSink {
            delivered: AtomicUsize::new(0),
            fail: false,
        });
        let (publisher, _dispatcher) = ChannelPublisher::channel(1, sink);
        publisher.publish(event(1)).unwrap();
        assert_eq!(publisher.publish(event(2)), Err(PublishError::QueueFull));
    }

    #[tokio::test]
    async fn test_sink_failure_is_dropped() {
        let sink = Arc::new(CountingSink {
            delivered: AtomicUsize::new(0),
            fail: true,
        });
        let (publisher, dispatcher) = ChannelPublisher::channel(4, sink);
        publisher.publish(event(1)).unwrap();
        drop(publisher);
        assert_eq!(dispatcher.run().await, 0);
    }

    #[test]
    fn test_recording_publisher() {
        let p = RecordingPublisher::new();
        p.publish(event(1)).unwrap();
        p.set_failing(true);
        assert!(p.publish(event(2)).is_err());
        assert_eq!(p.events().len(), 1);
    }
}
