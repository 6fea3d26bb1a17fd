//! Ledger Store
//!
//! Accounts, account products and the append-only transaction journal.
//!
//! # Units of work
//!
//! Every mutation happens inside a [`LedgerUnit`] obtained from
//! [`LedgerStore::begin`]. A unit is one atomic database transaction:
//!
//! ```text
//! begin ─▶ find_for_update(k1) ─▶ find_for_update(k2) ─▶ set_balance ─▶ append ─▶ commit
//!              (row lock)             (row lock)                                  │
//!                                                                     drop ─▶ rollback
//! ```
//!
//! # Locking discipline
//!
//! 1. `find_for_update` takes an exclusive, unit-scoped lock on the account
//!    row. Other mutators of that account block until the holder commits or
//!    rolls back.
//! 2. Lock waits are bounded. A wait that exceeds the configured lock timeout
//!    fails with [`LedgerError::LockTimeout`], which callers may retry.
//! 3. Callers locking more than one account MUST lock in ascending key order
//!    (see [`lock_order`]); this is the only cross-account ordering rule.
//! 4. No optimistic version counter is used; row locks are the single
//!    concurrency-control mechanism.

pub mod memory;
pub mod postgres;
pub mod types;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;
pub use types::{
    Account, AccountProduct, JournalEntry, MovementType, NewAccount, NewJournalEntry,
    PageRequest, TxStatus,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Lock wait timed out: {0}")]
    LockTimeout(String),

    #[error("Deadlock detected: {0}")]
    Deadlock(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    /// Lock timeouts and deadlocks abort the unit without mutation
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::LockTimeout(_) | LedgerError::Deadlock(_))
    }
}

/// SQLSTATE lock_not_available
const PG_LOCK_NOT_AVAILABLE: &str = "55P03";
/// SQLSTATE deadlock_detected
const PG_DEADLOCK_DETECTED: &str = "40P01";
/// SQLSTATE unique_violation
const PG_UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db) = e.as_database_error() {
            match db.code().as_deref() {
                Some(PG_LOCK_NOT_AVAILABLE) => return LedgerError::LockTimeout(db.message().to_string()),
                Some(PG_DEADLOCK_DETECTED) => return LedgerError::Deadlock(db.message().to_string()),
                Some(PG_UNIQUE_VIOLATION) => return LedgerError::Duplicate(db.message().to_string()),
                _ => {}
            }
        }
        if matches!(e, sqlx::Error::PoolTimedOut) {
            return LedgerError::LockTimeout("connection pool exhausted".to_string());
        }
        LedgerError::Database(e.to_string())
    }
}

/// Order two account keys for lock acquisition (ascending)
#[inline]
pub fn lock_order<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

/// One atomic unit of work against the ledger.
///
/// Dropping a unit without calling [`commit`](LedgerUnit::commit) rolls it
/// back: no balance change or journal row becomes visible.
#[async_trait]
pub trait LedgerUnit: Send {
    /// Lock the account row for the rest of this unit.
    ///
    /// Returns `Ok(None)` if no account has this key. Locking the same key
    /// twice in one unit returns the (possibly staged) row without blocking.
    async fn find_for_update(&mut self, key: &str) -> Result<Option<Account>, LedgerError>;

    /// Set the balance of an account locked by this unit
    async fn set_balance(&mut self, account: &Account, balance: Decimal) -> Result<(), LedgerError>;

    /// Append a journal row; visible to readers after commit
    async fn append(&mut self, entry: NewJournalEntry) -> Result<JournalEntry, LedgerError>;

    /// Make every change of this unit durable and release its locks
    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}

/// Ledger storage backend
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Start a new unit of work
    async fn begin(&self) -> Result<Box<dyn LedgerUnit>, LedgerError>;

    /// Committed account state, without locking
    async fn find_read_only(&self, key: &str) -> Result<Option<Account>, LedgerError>;

    async fn find_transaction(&self, id: i64) -> Result<Option<JournalEntry>, LedgerError>;

    /// Journal entries of one account, newest first
    async fn history(&self, key: &str, page: PageRequest) -> Result<Vec<JournalEntry>, LedgerError>;

    // === Provisioning (account-management collaborator) ===

    async fn create_product(
        &self,
        name: &str,
        fee_percentage: Decimal,
    ) -> Result<AccountProduct, LedgerError>;

    async fn create_account(&self, account: NewAccount) -> Result<Account, LedgerError>;
}
