//! Transaction Service
//!
//! Entry point used by the binary and by callers embedding the engine: puts
//! the idempotency gate in front of [`TransactionEngine`] and exposes the
//! read-side queries.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::error::EngineError;
use super::executor::TransactionEngine;
use super::types::{
    CreateTransactionRequest, Outcome, TransactionResponse, TransferRequest, TransferResponse,
};
use crate::idempotency::IdempotencyCoordinator;
use crate::ledger::{Account, LedgerStore, PageRequest};

pub struct TransactionService {
    engine: Arc<TransactionEngine>,
    idempotency: Arc<IdempotencyCoordinator>,
}

impl TransactionService {
    pub fn new(engine: Arc<TransactionEngine>, idempotency: Arc<IdempotencyCoordinator>) -> Self {
        Self {
            engine,
            idempotency,
        }
    }

    fn ledger(&self) -> &Arc<dyn LedgerStore> {
        self.engine.ledger()
    }

    /// Deposit or withdrawal. Without a key every call executes.
    pub async fn create_transaction(
        &self,
        idempotency_key: Option<&str>,
        req: CreateTransactionRequest,
    ) -> Result<Outcome<TransactionResponse>, EngineError> {
        self.run(idempotency_key, move |engine| async move { engine.execute(&req).await })
            .await
    }

    pub async fn transfer(
        &self,
        idempotency_key: Option<&str>,
        req: TransferRequest,
    ) -> Result<Outcome<TransferResponse>, EngineError> {
        self.run(idempotency_key, move |engine| async move { engine.transfer(&req).await })
            .await
    }

    pub async fn get_transaction(&self, id: i64) -> Result<TransactionResponse, EngineError> {
        self.ledger()
            .find_transaction(id)
            .await?
            .map(|e| TransactionResponse::from(&e))
            .ok_or(EngineError::TransactionNotFound(id))
    }

    /// Newest first; page size capped at [`PageRequest::MAX_SIZE`]
    pub async fn history(
        &self,
        account_key: &str,
        page: PageRequest,
    ) -> Result<Vec<TransactionResponse>, EngineError> {
        // Unknown account is an error, not an empty page
        self.account(account_key).await?;
        let entries = self.ledger().history(account_key, page).await?;
        Ok(entries.iter().map(TransactionResponse::from).collect())
    }

    pub async fn account(&self, account_key: &str) -> Result<Account, EngineError> {
        self.ledger()
            .find_read_only(account_key)
            .await?
            .ok_or_else(|| EngineError::AccountNotFound(account_key.to_string()))
    }

    /// Run a mutation on its own task.
    ///
    /// Dropping the returned future only abandons the result: the movement
    /// and its idempotency bookkeeping still run to completion.
    async fn run<T, F, Fut>(&self, idempotency_key: Option<&str>, op: F) -> Result<Outcome<T>, EngineError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(Arc<TransactionEngine>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
    {
        let engine = self.engine.clone();
        let task = match idempotency_key {
            Some(key) => {
                let idempotency = self.idempotency.clone();
                let key = key.to_string();
                tokio::spawn(async move { guarded(&idempotency, &key, engine, op).await })
            }
            None => tokio::spawn(async move { op(engine).await.map(Outcome::Created) }),
        };
        task.await
            .map_err(|e| EngineError::Internal(format!("execution task failed: {}", e)))?
    }
}

/// Run `op` at most once per key.
///
/// A stored response is replayed; a key held by another execution is an
/// [`EngineError::IdempotencyConflict`]. On failure the key is released so
/// the caller may retry with it.
async fn guarded<T, F, Fut>(
    idempotency: &IdempotencyCoordinator,
    key: &str,
    engine: Arc<TransactionEngine>,
    op: F,
) -> Result<Outcome<T>, EngineError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(Arc<TransactionEngine>) -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    if let Some(cached) = idempotency.get_cached_response(key).await? {
        info!(key = %key, "[idempotency] replaying stored response");
        return Ok(Outcome::Replayed(serde_json::from_str(&cached)?));
    }

    if !idempotency.try_lock(key).await? {
        // Lost the race to an execution that may have just finished
        if let Some(cached) = idempotency.get_cached_response(key).await? {
            info!(key = %key, "[idempotency] replaying stored response");
            return Ok(Outcome::Replayed(serde_json::from_str(&cached)?));
        }
        warn!(key = %key, "[idempotency] key in flight, rejecting");
        return Err(EngineError::IdempotencyConflict(key.to_string()));
    }

    match op(engine).await {
        Ok(value) => {
            let payload = serde_json::to_string(&value)?;
            if let Err(e) = idempotency.save_success(key, &payload).await {
                // The movement is committed; keep the LOCKED marker until
                // its TTL so a retry cannot execute it a second time
                error!(key = %key, error = %e, "[idempotency] failed to store response");
            }
            Ok(Outcome::Created(value))
        }
        Err(err) => {
            if let Err(e) = idempotency.release(key).await {
                error!(key = %key, error = %e, "[idempotency] failed to release key");
            }
            Err(err)
        }
    }
}
