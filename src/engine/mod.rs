//! Transaction Engine
//!
//! Idempotent deposits, withdrawals and double-entry transfers over the
//! locked ledger.
//!
//! ```text
//! request ─▶ idempotency gate ─▶ lock account(s) ─▶ convert ─▶ fee ─▶ validate
//!                                                                      │
//!     cached response ◀─ save_success ◀─ publish ◀─ commit ◀─ journal ◀─ mutate
//! ```
//!
//! A transfer locks both accounts in ascending key order, so two opposite
//! transfers between the same pair cannot wait on each other.

pub mod error;
pub mod executor;
pub mod service;
pub mod state;
pub mod types;

pub use error::{EngineError, ErrorKind};
pub use executor::TransactionEngine;
pub use service::TransactionService;
pub use state::ExecutionStage;
pub use types::{
    CreateTransactionRequest, Outcome, TransactionResponse, TransferRequest, TransferResponse,
};
