//! Shared harness for integration tests: in-memory ledger, memory idempotency
//! tiers, static rates and a recording publisher.

#![allow(dead_code)]

use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use txn_engine::config::{EngineConfig, IdempotencyConfig};
use txn_engine::engine::{CreateTransactionRequest, TransactionEngine, TransactionService, TransferRequest};
use txn_engine::events::RecordingPublisher;
use txn_engine::idempotency::{IdempotencyCoordinator, MemoryTier};
use txn_engine::ledger::{LedgerStore, MemoryLedger, MovementType, NewAccount};
use txn_engine::money::Currency;
use txn_engine::rates::StaticRateProvider;

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub struct Harness {
    pub ledger: MemoryLedger,
    pub publisher: Arc<RecordingPublisher>,
    pub service: Arc<TransactionService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        let ledger = MemoryLedger::new(lock_timeout);
        let publisher = Arc::new(RecordingPublisher::new());
        let rates = StaticRateProvider::new()
            .with_rate("USD", "EUR", dec("0.9"))
            .with_rate("EUR", "USD", dec("1.1"));

        let engine = Arc::new(TransactionEngine::new(
            Arc::new(ledger.clone()),
            Arc::new(rates),
            publisher.clone(),
            &EngineConfig::default(),
        ));
        let idempotency = Arc::new(IdempotencyCoordinator::new(
            Arc::new(MemoryTier::new("fast")),
            Arc::new(MemoryTier::new("durable")),
            &IdempotencyConfig::default(),
        ));

        Self {
            ledger,
            publisher,
            service: Arc::new(TransactionService::new(engine, idempotency)),
        }
    }

    /// Provision an account; a `fee` of `None` means no product
    pub async fn open(&self, key: &str, currency: &str, balance: &str, fee: Option<&str>) {
        let product_id = match fee {
            Some(pct) => Some(
                self.ledger
                    .create_product(&format!("{} product", key), dec(pct))
                    .await
                    .unwrap()
                    .id,
            ),
            None => None,
        };
        self.ledger
            .create_account(NewAccount {
                key: key.to_string(),
                balance: dec(balance),
                currency: Currency::parse(currency).unwrap(),
                product_id,
                customer_id: None,
            })
            .await
            .unwrap();
    }

    pub async fn balance(&self, key: &str) -> Decimal {
        self.ledger.find_read_only(key).await.unwrap().unwrap().balance
    }
}

pub fn movement(key: &str, kind: MovementType, amount: &str, currency: &str) -> CreateTransactionRequest {
    CreateTransactionRequest {
        account_key: key.to_string(),
        amount: dec(amount),
        currency: currency.to_string(),
        reference: "test".to_string(),
        movement_type: kind,
    }
}

pub fn transfer(source: &str, target: &str, amount: &str) -> TransferRequest {
    TransferRequest {
        source_key: source.to_string(),
        target_key: target.to_string(),
        amount: dec(amount),
        reference: "test".to_string(),
    }
}
