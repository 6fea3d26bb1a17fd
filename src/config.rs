use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::money::Rounding;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL. In-memory backends are used when absent.
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Engine configuration, passed explicitly into component constructors
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub ledger: LedgerConfig,
    pub rate_provider: RateProviderConfig,
    pub idempotency: IdempotencyConfig,
    pub fees: FeeConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    /// Upper bound on waiting for an account row lock
    pub lock_timeout_ms: u64,
    pub max_connections: u32,
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            max_connections: 20,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RateProviderConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    /// 0 disables the pair cache
    pub cache_ttl_secs: u64,
    /// Fixed rates used instead of the HTTP service when non-empty
    pub static_rates: Vec<StaticRate>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StaticRate {
    pub from: String,
    pub to: String,
    pub rate: Decimal,
}

impl Default for RateProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            timeout_ms: 2_000,
            cache_ttl_secs: 0,
            static_rates: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// Lifetime of fast-tier entries (both LOCKED markers and cached responses)
    pub ttl_secs: u64,
    /// How long durable COMPLETED records are kept. `None` keeps them forever.
    pub retention_secs: Option<u64>,
    pub sweep_interval_secs: u64,
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60 * 60,
            retention_secs: None,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FeeConfig {
    pub minor_units: u32,
    pub rounding: Rounding,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            minor_units: 2,
            rounding: Rounding::HalfEven,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EventsConfig {
    pub topic: String,
    pub queue_size: usize,
    /// Notification endpoint. Events are only logged when absent.
    pub webhook_url: Option<String>,
    pub webhook_timeout_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            topic: "transaction-events".to_string(),
            queue_size: 1024,
            webhook_url: None,
            webhook_timeout_ms: 2_000,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}
