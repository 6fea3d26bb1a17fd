//! txn_engine - Transaction Processing Engine
//!
//! Reads newline-delimited JSON commands from `--input <file>` (or stdin)
//! and writes one JSON reply per command to stdout.
//!
//! ```text
//! ┌──────────┐    ┌─────────────┐    ┌──────────┐    ┌──────────┐
//! │ Commands │───▶│ Idempotency │───▶│  Engine  │───▶│  Ledger  │
//! │ (NDJSON) │    │    gate     │    │(fee/fx)  │    │ (locks)  │
//! └──────────┘    └─────────────┘    └────┬─────┘    └──────────┘
//!                                         └──▶ events (dispatcher task)
//! ```
//!
//! Backends: PostgreSQL when `postgres_url` is configured, in-memory otherwise.

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use txn_engine::config::{AppConfig, EngineConfig};
use txn_engine::db::Database;
use txn_engine::engine::{
    CreateTransactionRequest, EngineError, TransactionEngine, TransactionService, TransferRequest,
};
use txn_engine::events::{ChannelPublisher, EventSink, LogSink, WebhookSink};
use txn_engine::idempotency::{
    IdempotencyCoordinator, IdempotencySweeper, IdempotencyTier, MemoryTier, PgIdempotencyTier,
};
use txn_engine::ledger::{LedgerStore, MemoryLedger, MovementType, NewAccount, PageRequest, PgLedger};
use txn_engine::logging::init_logging;
use txn_engine::money::Currency;
use txn_engine::rates::{CachingRateProvider, HttpRateProvider, RateProvider, StaticRateProvider};

// ============================================================
// ARGUMENTS
// ============================================================

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| names.contains(&a.as_str()))
        .and_then(|i| args.get(i + 1).cloned())
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

// ============================================================
// COMMANDS
// ============================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
    /// Provision an account (and a product when a fee is given)
    OpenAccount {
        key: String,
        currency: Currency,
        #[serde(default)]
        balance: Decimal,
        #[serde(default)]
        fee_percentage: Option<Decimal>,
    },
    Deposit(MovementCommand),
    Withdraw(MovementCommand),
    Transfer {
        #[serde(default)]
        idempotency_key: Option<String>,
        source_key: String,
        target_key: String,
        amount: Decimal,
        #[serde(default)]
        reference: String,
    },
    History {
        account_key: String,
        #[serde(default)]
        page: u32,
        #[serde(default = "default_page_size")]
        size: u32,
    },
    GetTransaction {
        id: i64,
    },
}

#[derive(Debug, Deserialize)]
struct MovementCommand {
    #[serde(default)]
    idempotency_key: Option<String>,
    account_key: String,
    amount: Decimal,
    currency: String,
    #[serde(default)]
    reference: String,
}

impl MovementCommand {
    fn into_request(self, movement_type: MovementType) -> (Option<String>, CreateTransactionRequest) {
        let req = CreateTransactionRequest {
            account_key: self.account_key,
            amount: self.amount,
            currency: self.currency,
            reference: self.reference,
            movement_type,
        };
        (self.idempotency_key, req)
    }
}

fn default_page_size() -> u32 {
    PageRequest::DEFAULT_SIZE
}

#[derive(Debug, Serialize)]
struct Reply {
    ok: bool,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
}

impl Reply {
    fn success<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => Self {
                ok: true,
                status,
                code: None,
                message: None,
                result: Some(v),
            },
            Err(e) => Self::failure(&EngineError::from(e)),
        }
    }

    fn failure(err: &EngineError) -> Self {
        Self {
            ok: false,
            status: err.http_status(),
            code: Some(err.code()),
            message: Some(err.to_string()),
            result: None,
        }
    }

    fn bad_command(message: String) -> Self {
        Self {
            ok: false,
            status: 400,
            code: Some("BAD_COMMAND"),
            message: Some(message),
            result: None,
        }
    }
}

struct App {
    service: TransactionService,
    ledger: Arc<dyn LedgerStore>,
}

impl App {
    async fn handle(&self, command: Command) -> Reply {
        let result = match command {
            Command::OpenAccount {
                key,
                currency,
                balance,
                fee_percentage,
            } => self.open_account(key, currency, balance, fee_percentage).await,
            Command::Deposit(cmd) => {
                let (key, req) = cmd.into_request(MovementType::Deposit);
                self.service
                    .create_transaction(key.as_deref(), req)
                    .await
                    .map(|o| Reply::success(o.http_status(), o.get()))
            }
            Command::Withdraw(cmd) => {
                let (key, req) = cmd.into_request(MovementType::Withdrawal);
                self.service
                    .create_transaction(key.as_deref(), req)
                    .await
                    .map(|o| Reply::success(o.http_status(), o.get()))
            }
            Command::Transfer {
                idempotency_key,
                source_key,
                target_key,
                amount,
                reference,
            } => {
                let req = TransferRequest {
                    source_key,
                    target_key,
                    amount,
                    reference,
                };
                self.service
                    .transfer(idempotency_key.as_deref(), req)
                    .await
                    .map(|o| Reply::success(o.http_status(), o.get()))
            }
            Command::History {
                account_key,
                page,
                size,
            } => self
                .service
                .history(&account_key, PageRequest::new(page, size))
                .await
                .map(|h| Reply::success(200, &h)),
            Command::GetTransaction { id } => self
                .service
                .get_transaction(id)
                .await
                .map(|t| Reply::success(200, &t)),
        };

        result.unwrap_or_else(|e| Reply::failure(&e))
    }

    async fn open_account(
        &self,
        key: String,
        currency: Currency,
        balance: Decimal,
        fee_percentage: Option<Decimal>,
    ) -> Result<Reply, EngineError> {
        let product_id = match fee_percentage {
            Some(pct) => {
                let name = format!("{} product", key);
                Some(self.ledger.create_product(&name, pct).await?.id)
            }
            None => None,
        };
        let account = self
            .ledger
            .create_account(NewAccount {
                key,
                balance,
                currency,
                product_id,
                customer_id: None,
            })
            .await?;
        info!(account = %account.key, currency = %account.currency, "Account provisioned");
        Ok(Reply::success(201, &account))
    }
}

async fn process<R: AsyncBufRead + Unpin>(app: &App, input: R) -> anyhow::Result<usize> {
    let mut lines = input.lines();
    let mut processed = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let reply = match serde_json::from_str::<Command>(line) {
            Ok(command) => app.handle(command).await,
            Err(e) => {
                warn!(error = %e, "Unparsable command");
                Reply::bad_command(e.to_string())
            }
        };
        println!("{}", serde_json::to_string(&reply)?);
        processed += 1;
    }
    Ok(processed)
}

// ============================================================
// WIRING
// ============================================================

fn build_rates(config: &EngineConfig) -> anyhow::Result<Arc<dyn RateProvider>> {
    let rc = &config.rate_provider;
    if !rc.static_rates.is_empty() {
        let table = rc
            .static_rates
            .iter()
            .fold(StaticRateProvider::new(), |p, r| p.with_rate(&r.from, &r.to, r.rate));
        info!(pairs = rc.static_rates.len(), "Using static exchange rates");
        return Ok(Arc::new(table));
    }

    let http: Arc<dyn RateProvider> =
        Arc::new(HttpRateProvider::new(rc).context("Failed to build rate provider")?);
    info!(base_url = %rc.base_url, "Using HTTP exchange rate provider");
    if rc.cache_ttl_secs > 0 {
        Ok(Arc::new(CachingRateProvider::new(
            http,
            std::time::Duration::from_secs(rc.cache_ttl_secs),
        )))
    } else {
        Ok(http)
    }
}

fn build_sink(config: &EngineConfig) -> anyhow::Result<Arc<dyn EventSink>> {
    match &config.events.webhook_url {
        Some(url) => {
            info!(url = %url, "Publishing events to webhook");
            Ok(Arc::new(
                WebhookSink::new(url, &config.events).context("Failed to build webhook sink")?,
            ))
        }
        None => Ok(Arc::new(LogSink)),
    }
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _guard = init_logging(&config);
    let engine_config = &config.engine;

    info!(env = %env, git_hash = env!("GIT_HASH"), "Starting txn_engine");

    let (ledger, durable): (Arc<dyn LedgerStore>, Arc<dyn IdempotencyTier>) =
        match &config.postgres_url {
            Some(url) => {
                let db = Database::connect(url, engine_config.ledger.max_connections)
                    .await
                    .context("Failed to connect to PostgreSQL")?;
                db.migrate().await.context("Failed to apply migrations")?;
                let pool = db.pool().clone();
                (
                    Arc::new(PgLedger::new(pool.clone(), engine_config.ledger.lock_timeout())),
                    Arc::new(PgIdempotencyTier::new(pool)),
                )
            }
            None => {
                warn!("postgres_url not set, using in-memory ledger (state is lost on exit)");
                (
                    Arc::new(MemoryLedger::new(engine_config.ledger.lock_timeout())),
                    Arc::new(MemoryTier::new("durable")),
                )
            }
        };
    let fast: Arc<dyn IdempotencyTier> = Arc::new(MemoryTier::new("fast"));

    let (publisher, dispatcher) =
        ChannelPublisher::channel(engine_config.events.queue_size, build_sink(engine_config)?);
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    let sweeper = IdempotencySweeper::new(
        vec![fast.clone(), durable.clone()],
        engine_config.idempotency.sweep_interval(),
    );
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run().await;
    });

    let engine = Arc::new(TransactionEngine::new(
        ledger.clone(),
        build_rates(engine_config)?,
        Arc::new(publisher),
        engine_config,
    ));
    let idempotency = Arc::new(IdempotencyCoordinator::new(fast, durable, &engine_config.idempotency));
    let app = App {
        service: TransactionService::new(engine, idempotency),
        ledger,
    };

    let processed = match get_arg(&["--input", "-i"]) {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open input file: {}", path))?;
            process(&app, BufReader::new(file)).await?
        }
        None => process(&app, BufReader::new(tokio::io::stdin())).await?,
    };
    info!(processed, "Input exhausted, shutting down");

    // Dropping the last publisher lets the dispatcher drain and stop
    drop(app);
    sweeper_handle.abort();
    let delivered = dispatcher_handle.await.context("Event dispatcher panicked")?;
    info!(delivered, "Events delivered");
    Ok(())
}
