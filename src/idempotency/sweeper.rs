//! Idempotency Sweeper
//!
//! Background worker that purges expired idempotency records from both tiers.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{IdempotencyError, IdempotencyTier};

pub struct IdempotencySweeper {
    tiers: Vec<Arc<dyn IdempotencyTier>>,
    interval: Duration,
}

impl IdempotencySweeper {
    pub fn new(tiers: Vec<Arc<dyn IdempotencyTier>>, interval: Duration) -> Self {
        Self { tiers, interval }
    }

    /// Run the sweep loop forever
    pub async fn run(&self) -> ! {
        info!(
            interval_secs = self.interval.as_secs(),
            tiers = self.tiers.len(),
            "Starting idempotency sweeper"
        );

        loop {
            tokio::time::sleep(self.interval).await;
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Idempotency sweep failed");
            }
        }
    }

    /// Purge every tier once; returns the number of records removed
    pub async fn sweep_once(&self) -> Result<u64, IdempotencyError> {
        let now = Utc::now();
        let mut purged = 0;
        for tier in &self.tiers {
            let n = tier.purge_expired(now).await?;
            if n > 0 {
                debug!(tier = tier.name(), purged = n, "Purged expired idempotency records");
            }
            purged += n;
        }

        if purged > 0 {
            info!(count = purged, "Idempotency sweep complete");
        }
        Ok(purged)
    }
}
