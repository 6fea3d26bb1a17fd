//! Idempotency Coordinator
//!
//! Guarantees at-most-once execution of a business operation per
//! caller-supplied key. One port, [`IdempotencyTier`], has two roles:
//!
//! - **fast tier**: ephemeral, holds the `LOCKED` in-flight marker and a
//!   short-lived copy of completed responses
//! - **durable tier**: source of truth for completed keys (audit, cold start)
//!
//! ```text
//! try_lock ──ok──▶ run op ──ok──▶ save_success (durable, then fast)
//!    │                  └──err──▶ release (fast marker removed, retry allowed)
//!    └──busy──▶ get_cached_response ──▶ replay | conflict
//! ```

pub mod memory;
pub mod postgres;
pub mod sweeper;

pub use memory::MemoryTier;
pub use postgres::PgIdempotencyTier;
pub use sweeper::IdempotencySweeper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::IdempotencyConfig;

#[derive(Debug, Error, Clone)]
pub enum IdempotencyError {
    #[error("Idempotency store error: {0}")]
    Storage(String),

    #[error("Invalid idempotency record: {0}")]
    Invalid(String),
}

impl From<sqlx::Error> for IdempotencyError {
    fn from(e: sqlx::Error) -> Self {
        IdempotencyError::Storage(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    /// Execution in flight
    Locked,
    /// Response stored, replays return it
    Completed,
    /// Recorded failure (never replayed; the key may be retried)
    Failed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::Locked => "LOCKED",
            IdempotencyStatus::Completed => "COMPLETED",
            IdempotencyStatus::Failed => "FAILED",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "LOCKED" => Some(IdempotencyStatus::Locked),
            "COMPLETED" => Some(IdempotencyStatus::Completed),
            "FAILED" => Some(IdempotencyStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub status: IdempotencyStatus,
    /// Serialized response payload (COMPLETED only)
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    /// `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    pub fn locked(key: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key: key.to_string(),
            status: IdempotencyStatus::Locked,
            response: None,
            created_at: now,
            expires_at: expiry(now, Some(ttl)),
        }
    }

    pub fn completed(key: &str, response: String, now: DateTime<Utc>, ttl: Option<Duration>) -> Self {
        Self {
            key: key.to_string(),
            status: IdempotencyStatus::Completed,
            response: Some(response),
            created_at: now,
            expires_at: expiry(now, ttl),
        }
    }

    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.status == IdempotencyStatus::Completed
    }
}

fn expiry(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.and_then(|d| chrono::Duration::from_std(d).ok())
        .and_then(|d| now.checked_add_signed(d))
}

/// Key/record store backing one tier of the coordinator.
///
/// Expired records behave as absent for every operation.
#[async_trait]
pub trait IdempotencyTier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyError>;

    /// Atomic set-if-absent. `true` when this call stored the record.
    async fn put_if_absent(&self, record: IdempotencyRecord) -> Result<bool, IdempotencyError>;

    /// Insert or overwrite
    async fn put(&self, record: IdempotencyRecord) -> Result<(), IdempotencyError>;

    async fn remove(&self, key: &str) -> Result<(), IdempotencyError>;

    /// Delete records expired at `now`; returns how many were removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyError>;
}

/// Two-tier coordinator (fast + durable)
pub struct IdempotencyCoordinator {
    fast: Arc<dyn IdempotencyTier>,
    durable: Arc<dyn IdempotencyTier>,
    ttl: Duration,
    retention: Option<Duration>,
}

impl IdempotencyCoordinator {
    pub fn new(
        fast: Arc<dyn IdempotencyTier>,
        durable: Arc<dyn IdempotencyTier>,
        config: &IdempotencyConfig,
    ) -> Self {
        info!(
            fast = fast.name(),
            durable = durable.name(),
            ttl_secs = config.ttl_secs,
            "Idempotency coordinator initialized"
        );
        Self {
            fast,
            durable,
            ttl: config.ttl(),
            retention: config.retention(),
        }
    }

    /// Claim `key` for execution.
    ///
    /// `true`: the caller owns the key and must call [`save_success`] or
    /// [`release`]. `false`: another execution is in flight or the key has
    /// already completed.
    ///
    /// [`save_success`]: IdempotencyCoordinator::save_success
    /// [`release`]: IdempotencyCoordinator::release
    pub async fn try_lock(&self, key: &str) -> Result<bool, IdempotencyError> {
        // A completed key evicted from the fast tier must not run again
        if let Some(record) = self.durable.get(key).await?
            && record.is_completed()
        {
            debug!(key = %key, "[idempotency] key already completed in durable tier");
            return Ok(false);
        }

        let acquired = self
            .fast
            .put_if_absent(IdempotencyRecord::locked(key, Utc::now(), self.ttl))
            .await?;
        debug!(key = %key, acquired, "[idempotency] try_lock");
        Ok(acquired)
    }

    /// Stored response for a completed key; `None` while in flight or unknown
    pub async fn get_cached_response(&self, key: &str) -> Result<Option<String>, IdempotencyError> {
        if let Some(record) = self.fast.get(key).await?
            && record.is_completed()
        {
            return Ok(record.response);
        }

        match self.durable.get(key).await? {
            Some(record) if record.is_completed() => {
                if let Some(response) = &record.response {
                    // Warm the fast tier for the next replay
                    self.fast
                        .put(IdempotencyRecord::completed(
                            key,
                            response.clone(),
                            Utc::now(),
                            Some(self.ttl),
                        ))
                        .await?;
                }
                Ok(record.response)
            }
            _ => Ok(None),
        }
    }

    /// Persist the response: durable COMPLETED record first, then the fast copy
    pub async fn save_success(&self, key: &str, response: &str) -> Result<(), IdempotencyError> {
        let now = Utc::now();
        self.durable
            .put(IdempotencyRecord::completed(key, response.to_string(), now, self.retention))
            .await?;
        self.fast
            .put(IdempotencyRecord::completed(key, response.to_string(), now, Some(self.ttl)))
            .await?;
        debug!(key = %key, "[idempotency] response saved");
        Ok(())
    }

    /// Drop the in-flight marker so the key can be retried
    pub async fn release(&self, key: &str) -> Result<(), IdempotencyError> {
        self.fast.remove(key).await?;
        debug!(key = %key, "[idempotency] key released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> (IdempotencyCoordinator, Arc<MemoryTier>, Arc<MemoryTier>) {
        let fast = Arc::new(MemoryTier::new("fast"));
        let durable = Arc::new(MemoryTier::new("durable"));
        let c = IdempotencyCoordinator::new(fast.clone(), durable.clone(), &IdempotencyConfig::default());
        (c, fast, durable)
    }

    #[test]
    fn test_status_codes() {
        for s in [
            IdempotencyStatus::Locked,
            IdempotencyStatus::Completed,
            IdempotencyStatus::Failed,
        ] {
            assert_eq!(IdempotencyStatus::from_code(s.as_str()), Some(s));
        }
        assert_eq!(IdempotencyStatus::from_code("DONE"), None);
    }

    #[test]
    fn test_record_expiry() {
        let now = Utc::now();
        let rec = IdempotencyRecord::locked("k", now, Duration::from_secs(10));
        assert!(!rec.is_expired(now));
        assert!(rec.is_expired(now + chrono::Duration::seconds(10)));

        let forever = IdempotencyRecord::completed("k", "{}".into(), now, None);
        assert!(!forever.is_expired(now + chrono::Duration::days(3650)));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let (c, _, _) = coordinator();
        assert!(c.try_lock("k1").await.unwrap());
        assert!(!c.try_lock("k1").await.unwrap());
        // Locked entries are never returned as responses
        assert_eq!(c.get_cached_response("k1").await.unwrap(), None);

        c.release("k1").await.unwrap();
        assert!(c.try_lock("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_success_writes_both_tiers() {
        let (c, fast, durable) = coordinator();
        assert!(c.try_lock("k1").await.unwrap());
        c.save_success("k1", r#"{"id":1}"#).await.unwrap();

        assert_eq!(c.get_cached_response("k1").await.unwrap().as_deref(), Some(r#"{"id":1}"#));
        let d = durable.get("k1").await.unwrap().unwrap();
        assert_eq!(d.status, IdempotencyStatus::Completed);
        assert_eq!(d.expires_at, None);
        let f = fast.get("k1").await.unwrap().unwrap();
        assert!(f.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_durable_fallback_and_warm() {
        let (c, fast, _) = coordinator();
        assert!(c.try_lock("k1").await.unwrap());
        c.save_success("k1", "payload").await.unwrap();

        // Simulate fast-tier eviction
        fast.remove("k1").await.unwrap();
        assert!(!c.try_lock("k1").await.unwrap(), "completed key must not run again");
        assert_eq!(c.get_cached_response("k1").await.unwrap().as_deref(), Some("payload"));
        assert!(fast.get("k1").await.unwrap().unwrap().is_completed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_try_lock_single_winner() {
        let (c, _, _) = coordinator();
        let c = Arc::new(c);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let c = c.clone();
                tokio::spawn(async move { c.try_lock("race").await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
