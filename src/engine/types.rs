//! Engine request/response types
//!
//! JSON field names are camelCase to match the public API payloads.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::{JournalEntry, MovementType, TxStatus};
use crate::money::Currency;

/// Single-account movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub account_key: String,
    /// Positive magnitude; the movement type decides the direction
    pub amount: Decimal,
    /// Currency of `amount`; converted into the account currency when different
    pub currency: String,
    #[serde(default)]
    pub reference: String,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
}

/// Two-account movement; `amount` is in the source account currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub source_key: String,
    pub target_key: String,
    pub amount: Decimal,
    #[serde(default)]
    pub reference: String,
}

/// One committed journal entry as returned to callers and published downstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub transaction_id: i64,
    pub account_key: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub total: Decimal,
    pub timestamp: DateTime<Utc>,
    pub reference: String,
    pub status: TxStatus,
    pub currency: Currency,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl From<&JournalEntry> for TransactionResponse {
    fn from(e: &JournalEntry) -> Self {
        Self {
            transaction_id: e.id,
            account_key: e.account_key.clone(),
            amount: e.amount,
            fee: e.fee,
            total: e.total,
            timestamp: e.created_at,
            reference: e.reference.clone(),
            status: e.status,
            currency: e.currency.clone(),
            movement_type: e.movement_type,
            correlation_id: e.correlation_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    /// Correlation id shared by both legs
    pub transfer_id: String,
    pub debit_transaction: TransactionResponse,
    pub credit_transaction: TransactionResponse,
    pub status: TxStatus,
    pub reference: String,
}

/// Result of an idempotency-guarded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Executed by this call
    Created(T),
    /// Stored response of an earlier call with the same key
    Replayed(T),
}

impl<T> Outcome<T> {
    pub fn is_replayed(&self) -> bool {
        matches!(self, Outcome::Replayed(_))
    }

    pub fn get(&self) -> &T {
        match self {
            Outcome::Created(v) | Outcome::Replayed(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Outcome::Created(v) | Outcome::Replayed(v) => v,
        }
    }

    /// 201 for a fresh execution, 200 for a replay
    pub fn http_status(&self) -> u16 {
        match self {
            Outcome::Created(_) => 201,
            Outcome::Replayed(_) => 200,
        }
    }
}
