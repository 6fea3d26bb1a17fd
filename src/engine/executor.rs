//! Transaction Executor
//!
//! Runs single-account movements and double-entry transfers inside one
//! ledger unit of work each. Every rejection happens before the first
//! balance write; dropping the unit on the error path rolls back and
//! releases the row locks.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::error::EngineError;
use super::state::ExecutionStage;
use super::types::{CreateTransactionRequest, TransactionResponse, TransferRequest, TransferResponse};
use crate::config::EngineConfig;
use crate::events::{EventPublisher, TransactionEvent};
use crate::fee::{FeePolicy, net_impact};
use crate::ledger::{
    Account, LedgerStore, LedgerUnit, MovementType, NewJournalEntry, TxStatus, lock_order,
};
use crate::money::{self, Currency};
use crate::rates::RateProvider;

const TRANSFER_SENT: &str = "TRANSFER SENT";
const TRANSFER_RECEIVED: &str = "TRANSFER RECEIVED";

#[inline]
fn stage(op_id: &str, stage: ExecutionStage) {
    debug!(op_id = %op_id, stage = %stage, "[engine] stage");
}

pub struct TransactionEngine {
    ledger: Arc<dyn LedgerStore>,
    rates: Arc<dyn RateProvider>,
    publisher: Arc<dyn EventPublisher>,
    fees: FeePolicy,
    topic: String,
}

impl TransactionEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        rates: Arc<dyn RateProvider>,
        publisher: Arc<dyn EventPublisher>,
        config: &EngineConfig,
    ) -> Self {
        info!(
            ledger = ledger.name(),
            rates = rates.name(),
            topic = %config.events.topic,
            "Transaction engine initialized"
        );
        Self {
            ledger,
            rates,
            publisher,
            fees: FeePolicy::from(&config.fees),
            topic: config.events.topic.clone(),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Execute a deposit or withdrawal against one account
    pub async fn execute(
        &self,
        req: &CreateTransactionRequest,
    ) -> Result<TransactionResponse, EngineError> {
        let op_id = Ulid::new().to_string();
        stage(&op_id, ExecutionStage::Received);

        if req.amount <= Decimal::ZERO {
            return Err(self.reject(&op_id, EngineError::InvalidAmount));
        }
        let currency = Currency::parse(&req.currency).map_err(|e| self.reject(&op_id, e.into()))?;
        let is_debit = req.movement_type.is_debit();

        let mut unit = self.ledger.begin().await?;
        let account = lock_account(unit.as_mut(), &req.account_key).await?;
        stage(&op_id, ExecutionStage::Locked);

        let amount = self
            .fees
            .convert(req.amount, &currency, &account.currency, self.rates.as_ref())
            .await?;
        stage(&op_id, ExecutionStage::Converted);

        let fee = self.fees.fee(amount, account.product.as_ref(), is_debit)?;
        stage(&op_id, ExecutionStage::FeeComputed);

        let signed = if is_debit { -amount } else { amount };
        let total = net_impact(signed, fee, is_debit)?;
        let new_balance = money::checked_add(account.balance, total)?;
        if new_balance < Decimal::ZERO {
            let err = EngineError::InsufficientBalance {
                account: account.key.clone(),
                required: money::checked_add(amount, fee)?,
                available: account.balance,
            };
            return Err(self.reject(&op_id, err));
        }
        stage(&op_id, ExecutionStage::Validated);

        unit.set_balance(&account, new_balance).await?;
        stage(&op_id, ExecutionStage::Mutated);

        let entry = unit
            .append(NewJournalEntry {
                account_id: account.id,
                account_key: account.key.clone(),
                amount,
                fee,
                total,
                currency: account.currency.clone(),
                status: TxStatus::Completed,
                movement_type: req.movement_type,
                reference: req.reference.clone(),
                correlation_id: None,
            })
            .await?;
        unit.commit().await?;
        stage(&op_id, ExecutionStage::Journaled);

        info!(
            op_id = %op_id,
            account = %account.key,
            transaction_id = entry.id,
            movement = %req.movement_type,
            amount = %amount,
            fee = %fee,
            balance = %new_balance,
            "Transaction completed"
        );

        let response = TransactionResponse::from(&entry);
        self.publish(&op_id, &response);
        stage(&op_id, ExecutionStage::Completed);
        Ok(response)
    }

    /// Move `amount` (source currency) from source to target atomically.
    ///
    /// Only the source leg pays the fee; the target receives the converted
    /// principal. Both rows share the transfer id as correlation id.
    pub async fn transfer(&self, req: &TransferRequest) -> Result<TransferResponse, EngineError> {
        let transfer_id = Ulid::new().to_string();
        stage(&transfer_id, ExecutionStage::Received);

        if req.amount <= Decimal::ZERO {
            return Err(self.reject(&transfer_id, EngineError::InvalidAmount));
        }
        if req.source_key == req.target_key {
            return Err(self.reject(&transfer_id, EngineError::SameAccount));
        }

        let mut unit = self.ledger.begin().await?;

        // Global lock order; never the caller-supplied order
        let (first, second) = lock_order(&req.source_key, &req.target_key);
        let first_account = lock_account(unit.as_mut(), first).await?;
        let second_account = lock_account(unit.as_mut(), second).await?;
        let (source, target) = if first == req.source_key {
            (first_account, second_account)
        } else {
            (second_account, first_account)
        };
        stage(&transfer_id, ExecutionStage::Locked);

        let fee = self.fees.fee(req.amount, source.product.as_ref(), true)?;
        let debit_total = net_impact(-req.amount, fee, true)?;
        stage(&transfer_id, ExecutionStage::FeeComputed);

        let credit_amount = self
            .fees
            .convert(req.amount, &source.currency, &target.currency, self.rates.as_ref())
            .await?;
        stage(&transfer_id, ExecutionStage::Converted);

        let source_balance = money::checked_add(source.balance, debit_total)?;
        if source_balance < Decimal::ZERO {
            let err = EngineError::InsufficientBalance {
                account: source.key.clone(),
                required: money::checked_add(req.amount, fee)?,
                available: source.balance,
            };
            return Err(self.reject(&transfer_id, err));
        }
        let target_balance = money::checked_add(target.balance, credit_amount)?;
        stage(&transfer_id, ExecutionStage::Validated);

        unit.set_balance(&source, source_balance).await?;
        unit.set_balance(&target, target_balance).await?;
        stage(&transfer_id, ExecutionStage::Mutated);

        let debit = unit
            .append(NewJournalEntry {
                account_id: source.id,
                account_key: source.key.clone(),
                amount: -req.amount,
                fee,
                total: debit_total,
                currency: source.currency.clone(),
                status: TxStatus::Completed,
                movement_type: MovementType::Withdrawal,
                reference: format!("{}: {}", TRANSFER_SENT, req.reference),
                correlation_id: Some(transfer_id.clone()),
            })
            .await?;
        let credit = unit
            .append(NewJournalEntry {
                account_id: target.id,
                account_key: target.key.clone(),
                amount: credit_amount,
                fee: Decimal::ZERO,
                total: credit_amount,
                currency: target.currency.clone(),
                status: TxStatus::Completed,
                movement_type: MovementType::Deposit,
                reference: format!("{}: {}", TRANSFER_RECEIVED, req.reference),
                correlation_id: Some(transfer_id.clone()),
            })
            .await?;
        unit.commit().await?;
        stage(&transfer_id, ExecutionStage::Journaled);

        info!(
            transfer_id = %transfer_id,
            source = %source.key,
            target = %target.key,
            debit = %debit_total,
            credit = %credit_amount,
            fee = %fee,
            "Transfer completed"
        );

        let debit = TransactionResponse::from(&debit);
        let credit = TransactionResponse::from(&credit);
        self.publish(&transfer_id, &debit);
        self.publish(&transfer_id, &credit);
        stage(&transfer_id, ExecutionStage::Completed);

        Ok(TransferResponse {
            transfer_id,
            debit_transaction: debit,
            credit_transaction: credit,
            status: TxStatus::Completed,
            reference: req.reference.clone(),
        })
    }

    fn reject(&self, op_id: &str, err: EngineError) -> EngineError {
        stage(op_id, ExecutionStage::Rejected);
        info!(op_id = %op_id, code = err.code(), error = %err, "Movement rejected");
        err
    }

    /// Best-effort: the ledger change is already committed
    fn publish(&self, op_id: &str, response: &TransactionResponse) {
        let event = TransactionEvent::new(&self.topic, response.clone());
        match self.publisher.publish(event) {
            Ok(()) => stage(op_id, ExecutionStage::Published),
            Err(e) => warn!(
                op_id = %op_id,
                transaction_id = response.transaction_id,
                error = %e,
                "Event publish failed; ledger change kept"
            ),
        }
    }
}

async fn lock_account(unit: &mut dyn LedgerUnit, key: &str) -> Result<Account, EngineError> {
    unit.find_for_update(key)
        .await?
        .ok_or_else(|| EngineError::AccountNotFound(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingPublisher;
    use crate::ledger::{MemoryLedger, NewAccount};
    use crate::rates::StaticRateProvider;
    use std::str::FromStr;
    use std::time::Duration;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn setup() -> (TransactionEngine, MemoryLedger, Arc<RecordingPublisher>) {
        let ledger = MemoryLedger::new(Duration::from_millis(500));
        let product = ledger.create_product("Basic", dec("0.01")).await.unwrap();
        ledger
            .create_account(NewAccount {
                key: "A1".into(),
                balance: dec("10000"),
                currency: Currency::parse("ARS").unwrap(),
                product_id: Some(product.id),
                customer_id: None,
            })
            .await
            .unwrap();
        let publisher = Arc::new(RecordingPublisher::new());
        let engine = TransactionEngine::new(
            Arc::new(ledger.clone()),
            Arc::new(StaticRateProvider::new().with_rate("USD", "ARS", dec("1000"))),
            publisher.clone(),
            &EngineConfig::default(),
        );
        (engine, ledger, publisher)
    }

    fn request(kind: MovementType, amount: &str, currency: &str) -> CreateTransactionRequest {
        CreateTransactionRequest {
            account_key: "A1".into(),
            amount: dec(amount),
            currency: currency.into(),
            reference: "unit".into(),
            movement_type: kind,
        }
    }

    #[tokio::test]
    async fn test_withdrawal_applies_fee() {
        let (engine, ledger, publisher) = setup().await;
        let resp = engine
            .execute(&request(MovementType::Withdrawal, "1000", "ARS"))
            .await
            .unwrap();

        assert_eq!(resp.fee.to_string(), "10.00");
        assert_eq!(resp.total.to_string(), "-1010.00");
        assert_eq!(resp.status, TxStatus::Completed);
        assert_eq!(
            ledger.find_read_only("A1").await.unwrap().unwrap().balance,
            dec("8990")
        );
        assert_eq!(publisher.events().len(), 1);
    }

    #[tokio::test]
    async fn test_deposit_converts_into_account_currency() {
        let (engine, ledger, _) = setup().await;
        let resp = engine
            .execute(&request(MovementType::Deposit, "2", "usd"))
            .await
            .unwrap();

        assert_eq!(resp.amount, dec("2000"));
        assert_eq!(resp.fee, Decimal::ZERO);
        assert_eq!(resp.currency.as_str(), "ARS");
        assert_eq!(
            ledger.find_read_only("A1").await.unwrap().unwrap().balance,
            dec("12000")
        );
    }

    #[tokio::test]
    async fn test_rejections_leave_no_trace() {
        let (engine, ledger, publisher) = setup().await;

        let err = engine
            .execute(&request(MovementType::Withdrawal, "9901", "ARS"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));

        let err = engine
            .execute(&request(MovementType::Deposit, "0", "ARS"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAmount));

        let err = engine
            .execute(&request(MovementType::Deposit, "5", "A$"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CURRENCY");

        let err = engine
            .execute(&request(MovementType::Deposit, "5", "EUR"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RATE_UNAVAILABLE");

        assert_eq!(ledger.journal_len(), 0);
        assert_eq!(
            ledger.find_read_only("A1").await.unwrap().unwrap().balance,
            dec("10000")
        );
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_validation_before_locking() {
        let (engine, _, _) = setup().await;
        let same = TransferRequest {
            source_key: "A1".into(),
            target_key: "A1".into(),
            amount: dec("1"),
            reference: String::new(),
        };
        assert!(matches!(engine.transfer(&same).await, Err(EngineError::SameAccount)));

        let missing = TransferRequest {
            source_key: "A1".into(),
            target_key: "ZZ".into(),
            amount: dec("1"),
            reference: String::new(),
        };
        assert!(matches!(
            engine.transfer(&missing).await,
            Err(EngineError::AccountNotFound(k)) if k == "ZZ"
        ));
    }
}
