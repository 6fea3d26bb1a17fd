//! PostgreSQL ledger
//!
//! Each unit of work is a database transaction. Row locks come from
//! `SELECT ... FOR UPDATE`, bounded by `SET LOCAL lock_timeout`, so a stuck
//! holder surfaces as SQLSTATE 55P03 (mapped to [`LedgerError::LockTimeout`])
//! instead of an unbounded wait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::debug;

use super::types::{
    Account, AccountProduct, JournalEntry, MovementType, NewAccount, NewJournalEntry,
    PageRequest, TxStatus,
};
use super::{LedgerError, LedgerStore, LedgerUnit};
use crate::db::RowExt;
use crate::money::Currency;

const ACCOUNT_COLUMNS: &str = r#"
    a.id, a.iban, a.balance, a.currency, a.customer_id,
    p.id AS product_id, p.name AS product_name, p.fee_percentage
"#;

const JOURNAL_COLUMNS: &str = r#"
    t.id, t.account_id, a.iban, t.amount, t.fee, t.total, t.currency,
    t.status, t.movement_type, t.reference, t.correlation_id, t.created_at
"#;

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, LedgerError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.decode_column(name).map_err(LedgerError::Invalid)
}

fn row_to_account(row: &PgRow) -> Result<Account, LedgerError> {
    let currency: String = column(row, "currency")?;
    let currency = Currency::parse(&currency)
        .map_err(|e| LedgerError::Invalid(format!("account currency: {}", e)))?;

    let product_id: Option<i64> = column(row, "product_id")?;
    let product = match product_id {
        Some(id) => Some(AccountProduct {
            id,
            name: column(row, "product_name")?,
            fee_percentage: column(row, "fee_percentage")?,
        }),
        None => None,
    };

    Ok(Account {
        id: column(row, "id")?,
        key: column(row, "iban")?,
        balance: column(row, "balance")?,
        currency,
        product,
        customer_id: column(row, "customer_id")?,
    })
}

fn row_to_entry(row: &PgRow) -> Result<JournalEntry, LedgerError> {
    let status: String = column(row, "status")?;
    let status = TxStatus::from_code(&status)
        .ok_or_else(|| LedgerError::Invalid(format!("Invalid status: {}", status)))?;

    let movement: String = column(row, "movement_type")?;
    let movement_type = MovementType::from_code(&movement)
        .ok_or_else(|| LedgerError::Invalid(format!("Invalid movement_type: {}", movement)))?;

    let currency: String = column(row, "currency")?;
    let currency = Currency::parse(&currency)
        .map_err(|e| LedgerError::Invalid(format!("journal currency: {}", e)))?;

    Ok(JournalEntry {
        id: column(row, "id")?,
        account_id: column(row, "account_id")?,
        account_key: column(row, "iban")?,
        amount: column(row, "amount")?,
        fee: column(row, "fee")?,
        total: column(row, "total")?,
        currency,
        status,
        movement_type,
        reference: column(row, "reference")?,
        correlation_id: column(row, "correlation_id")?,
        created_at: column(row, "created_at")?,
    })
}

/// PostgreSQL [`LedgerStore`]
pub struct PgLedger {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedger {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn LedgerUnit>, LedgerError> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters; the value is an integer we own
        let stmt = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&stmt).execute(&mut *tx).await?;

        Ok(Box::new(PgUnit { tx }))
    }

    async fn find_read_only(&self, key: &str) -> Result<Option<Account>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM accounts a LEFT JOIN account_products p ON p.id = a.product_id WHERE a.iban = $1",
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn find_transaction(&self, id: i64) -> Result<Option<JournalEntry>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM transactions t JOIN accounts a ON a.id = t.account_id WHERE t.id = $1",
            JOURNAL_COLUMNS
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn history(&self, key: &str, page: PageRequest) -> Result<Vec<JournalEntry>, LedgerError> {
        let sql = format!(
            r#"
            SELECT {} FROM transactions t JOIN accounts a ON a.id = t.account_id
            WHERE a.iban = $1
            ORDER BY t.created_at DESC, t.id DESC
            LIMIT $2 OFFSET $3
            "#,
            JOURNAL_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(key)
            .bind(page.limit() as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn create_product(
        &self,
        name: &str,
        fee_percentage: Decimal,
    ) -> Result<AccountProduct, LedgerError> {
        if fee_percentage.is_sign_negative() {
            return Err(LedgerError::Invalid("fee_percentage must not be negative".to_string()));
        }
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO account_products (name, fee_percentage) VALUES ($1, $2) RETURNING id",
        )
        .bind(name)
        .bind(fee_percentage)
        .fetch_one(&self.pool)
        .await?;

        Ok(AccountProduct {
            id,
            name: name.to_string(),
            fee_percentage,
        })
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account, LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (iban, balance, currency, product_id, customer_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&new.key)
        .bind(new.balance)
        .bind(new.currency.as_str())
        .bind(new.product_id)
        .bind(new.customer_id)
        .execute(&self.pool)
        .await?;

        self.find_read_only(&new.key)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {}", new.key)))
    }
}

/// Unit of work over [`PgLedger`]; rolls back when dropped uncommitted
struct PgUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerUnit for PgUnit {
    async fn find_for_update(&mut self, key: &str) -> Result<Option<Account>, LedgerError> {
        let sql = format!(
            r#"
            SELECT {} FROM accounts a LEFT JOIN account_products p ON p.id = a.product_id
            WHERE a.iban = $1
            FOR UPDATE OF a
            "#,
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| match LedgerError::from(e) {
                LedgerError::LockTimeout(_) => LedgerError::LockTimeout(format!("account {}", key)),
                other => other,
            })?;

        if row.is_some() {
            debug!(account = %key, "[ledger] row locked");
        }
        row.as_ref().map(row_to_account).transpose()
    }

    async fn set_balance(&mut self, account: &Account, balance: Decimal) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE accounts SET balance = $1 WHERE id = $2")
            .bind(balance)
            .bind(account.id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(format!("account {}", account.key)));
        }
        Ok(())
    }

    async fn append(&mut self, entry: NewJournalEntry) -> Result<JournalEntry, LedgerError> {
        let row = sqlx::query(
            r#"
            INSERT INTO transactions
                (account_id, amount, fee, total, currency, status, movement_type, reference, correlation_id, created_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            RETURNING id, created_at
            "#,
        )
        .bind(entry.account_id)
        .bind(entry.amount)
        .bind(entry.fee)
        .bind(entry.total)
        .bind(entry.currency.as_str())
        .bind(entry.status.as_str())
        .bind(entry.movement_type.as_str())
        .bind(&entry.reference)
        .bind(&entry.correlation_id)
        .fetch_one(&mut *self.tx)
        .await?;

        let id: i64 = column(&row, "id")?;
        let created_at: DateTime<Utc> = column(&row, "created_at")?;
        Ok(JournalEntry::from_new(id, created_at, entry))
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }
}
