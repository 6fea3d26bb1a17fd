//! Engine Error Types
//!
//! Every failure surfaced by the engine falls into one [`ErrorKind`]. None of
//! them leaves a partial ledger mutation behind.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::fee::FeeError;
use crate::idempotency::IdempotencyError;
use crate::ledger::LedgerError;
use crate::money::MoneyError;
use crate::rates::RateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client-actionable rejection, never retried by the engine
    Business,
    /// Lock wait timeout or deadlock; safe to retry
    Conflict,
    /// Rate provider or other collaborator unavailable
    Dependency,
    /// Same idempotency key still in flight
    Idempotency,
    System,
}

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    // === Business rejections ===
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(i64),

    #[error("Insufficient balance in {account}: required {required}, available {available}")]
    InsufficientBalance {
        account: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("Source and target account cannot be the same")]
    SameAccount,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    #[error("Amount would cause overflow")]
    Overflow,

    // === Concurrency conflicts ===
    #[error("Lock wait timed out: {0}")]
    LockTimeout(String),

    #[error("Deadlock detected: {0}")]
    Deadlock(String),

    // === Dependency failures ===
    #[error("Exchange rate unavailable: {0}")]
    RateUnavailable(String),

    // === Idempotency ===
    #[error("Request with idempotency key {0} is already in progress")]
    IdempotencyConflict(String),

    // === System errors ===
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::AccountNotFound(_)
            | EngineError::TransactionNotFound(_)
            | EngineError::InsufficientBalance { .. }
            | EngineError::SameAccount
            | EngineError::InvalidAmount
            | EngineError::InvalidCurrency(_)
            | EngineError::Overflow => ErrorKind::Business,
            EngineError::LockTimeout(_) | EngineError::Deadlock(_) => ErrorKind::Conflict,
            EngineError::RateUnavailable(_) => ErrorKind::Dependency,
            EngineError::IdempotencyConflict(_) => ErrorKind::Idempotency,
            EngineError::Storage(_) | EngineError::Serialization(_) | EngineError::Internal(_) => {
                ErrorKind::System
            }
        }
    }

    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            EngineError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            EngineError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            EngineError::SameAccount => "SAME_ACCOUNT",
            EngineError::InvalidAmount => "INVALID_AMOUNT",
            EngineError::InvalidCurrency(_) => "INVALID_CURRENCY",
            EngineError::Overflow => "OVERFLOW",
            EngineError::LockTimeout(_) => "LOCK_TIMEOUT",
            EngineError::Deadlock(_) => "DEADLOCK",
            EngineError::RateUnavailable(_) => "RATE_UNAVAILABLE",
            EngineError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            EngineError::Storage(_) => "STORAGE_ERROR",
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::AccountNotFound(_) | EngineError::TransactionNotFound(_) => 404,
            EngineError::SameAccount | EngineError::InvalidAmount | EngineError::InvalidCurrency(_) => 400,
            EngineError::InsufficientBalance { .. } | EngineError::Overflow => 422,
            EngineError::LockTimeout(_) | EngineError::Deadlock(_) => 409,
            EngineError::IdempotencyConflict(_) => 409,
            EngineError::RateUnavailable(_) => 503,
            EngineError::Storage(_) | EngineError::Serialization(_) | EngineError::Internal(_) => 500,
        }
    }

    /// Conflicts and dependency failures happen before any mutation, so the
    /// same request (and idempotency key) can be sent again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Conflict | ErrorKind::Dependency | ErrorKind::Idempotency
        )
    }
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::LockTimeout(m) => EngineError::LockTimeout(m),
            LedgerError::Deadlock(m) => EngineError::Deadlock(m),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

impl From<RateError> for EngineError {
    fn from(e: RateError) -> Self {
        EngineError::RateUnavailable(e.to_string())
    }
}

impl From<MoneyError> for EngineError {
    fn from(e: MoneyError) -> Self {
        match e {
            MoneyError::InvalidCurrency(c) => EngineError::InvalidCurrency(c),
            MoneyError::Overflow => EngineError::Overflow,
            MoneyError::NegativeFee => EngineError::Internal(e.to_string()),
        }
    }
}

impl From<FeeError> for EngineError {
    fn from(e: FeeError) -> Self {
        match e {
            FeeError::Money(m) => m.into(),
            FeeError::Rate(r) => r.into(),
        }
    }
}

impl From<IdempotencyError> for EngineError {
    fn from(e: IdempotencyError) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}
