//! Ledger Core Types
//!
//! Accounts, account products and journal entries. String codes for
//! status and movement type match the `transactions` table columns.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::Currency;

/// Account product: the fee configuration shared by a family of accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProduct {
    pub id: i64,
    /// Display name, e.g. "Checking Gold"
    pub name: String,
    /// Fee applied to debit legs (0.01 = 1%)
    pub fee_percentage: Decimal,
}

/// Account row as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    /// Unique business key (IBAN-like), distinct from `id`
    pub key: String,
    pub balance: Decimal,
    pub currency: Currency,
    /// `None` means the account pays no fees
    pub product: Option<AccountProduct>,
    pub customer_id: Option<i64>,
}

impl Account {
    pub fn fee_percentage(&self) -> Decimal {
        self.product
            .as_ref()
            .map(|p| p.fee_percentage)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Provisioning input for a new account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub key: String,
    pub balance: Decimal,
    pub currency: Currency,
    pub product_id: Option<i64>,
    #[serde(default)]
    pub customer_id: Option<i64>,
}

/// Journal entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Pending,
    Completed,
    Rejected,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "PENDING",
            TxStatus::Completed => "COMPLETED",
            TxStatus::Rejected => "REJECTED",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "PENDING" => Some(TxStatus::Pending),
            "COMPLETED" => Some(TxStatus::Completed),
            "REJECTED" => Some(TxStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Movement direction of a journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Credit
    Deposit,
    /// Debit (pays the product fee)
    Withdrawal,
}

impl MovementType {
    #[inline]
    pub fn is_debit(&self) -> bool {
        matches!(self, MovementType::Withdrawal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Deposit => "DEPOSIT",
            MovementType::Withdrawal => "WITHDRAWAL",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "DEPOSIT" => Some(MovementType::Deposit),
            "WITHDRAWAL" => Some(MovementType::Withdrawal),
            _ => None,
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Journal row to be appended inside a unit of work
#[derive(Debug, Clone)]
pub struct NewJournalEntry {
    pub account_id: i64,
    pub account_key: String,
    pub amount: Decimal,
    pub fee: Decimal,
    /// Net ledger impact (signed)
    pub total: Decimal,
    pub currency: Currency,
    pub status: TxStatus,
    pub movement_type: MovementType,
    pub reference: String,
    /// Shared by both legs of a transfer
    pub correlation_id: Option<String>,
}

/// Append-only journal entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: i64,
    pub account_id: i64,
    pub account_key: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub total: Decimal,
    pub currency: Currency,
    pub status: TxStatus,
    pub movement_type: MovementType,
    pub reference: String,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn from_new(id: i64, created_at: DateTime<Utc>, new: NewJournalEntry) -> Self {
        Self {
            id,
            account_id: new.account_id,
            account_key: new.account_key,
            amount: new.amount,
            fee: new.fee,
            total: new.total,
            currency: new.currency,
            status: new.status,
            movement_type: new.movement_type,
            reference: new.reference,
            correlation_id: new.correlation_id,
            created_at,
        }
    }
}

/// Page request for history queries (newest first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub const MAX_SIZE: u32 = 100;
    pub const DEFAULT_SIZE: u32 = 20;

    pub fn new(page: u32, size: u32) -> Self {
        Self { page, size }
    }

    /// Page size clamped to `1..=MAX_SIZE`
    pub fn limit(&self) -> u32 {
        self.size.clamp(1, Self::MAX_SIZE)
    }

    pub fn offset(&self) -> u64 {
        self.page as u64 * self.limit() as u64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_SIZE)
    }
}
