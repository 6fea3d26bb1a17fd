//! txn_engine - Transaction Processing Engine
//!
//! Idempotent deposits, withdrawals and double-entry transfers against a
//! ledger of accounts guarded by pessimistic row locks.
//!
//! # Modules
//!
//! - [`money`] - Currency codes, rounding, checked decimal arithmetic
//! - [`ledger`] - Ledger store port, PostgreSQL and in-memory backends
//! - [`fee`] - Fee, conversion and net-impact computation
//! - [`rates`] - Exchange rate providers
//! - [`idempotency`] - Two-tier idempotency coordinator
//! - [`events`] - Best-effort transaction event publishing
//! - [`engine`] - Execution and transfer protocols, service façade
//! - [`config`] / [`logging`] / [`db`] - Ambient setup

pub mod config;
pub mod db;
pub mod engine;
pub mod events;
pub mod fee;
pub mod idempotency;
pub mod ledger;
pub mod logging;
pub mod money;
pub mod rates;

// Convenient re-exports at crate root
pub use engine::{
    CreateTransactionRequest, EngineError, ErrorKind, Outcome, TransactionEngine,
    TransactionResponse, TransactionService, TransferRequest, TransferResponse,
};
pub use idempotency::IdempotencyCoordinator;
pub use ledger::{LedgerStore, MemoryLedger, PgLedger};
pub use money::Currency;
