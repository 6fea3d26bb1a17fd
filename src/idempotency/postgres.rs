//! Durable idempotency tier over the `idempotency_keys` table

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgRow;

use super::{IdempotencyError, IdempotencyRecord, IdempotencyStatus, IdempotencyTier};
use crate::db::RowExt;

pub struct PgIdempotencyTier {
    pool: PgPool,
}

impl PgIdempotencyTier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &PgRow) -> Result<IdempotencyRecord, IdempotencyError> {
    let status: String = row.decode_column("status").map_err(IdempotencyError::Invalid)?;
    let status = IdempotencyStatus::from_code(&status)
        .ok_or_else(|| IdempotencyError::Invalid(format!("Invalid status: {}", status)))?;

    Ok(IdempotencyRecord {
        key: row.decode_column("key_id").map_err(IdempotencyError::Invalid)?,
        status,
        response: row.decode_column("response_json").map_err(IdempotencyError::Invalid)?,
        created_at: row.decode_column("created_at").map_err(IdempotencyError::Invalid)?,
        expires_at: row.decode_column("expires_at").map_err(IdempotencyError::Invalid)?,
    })
}

#[async_trait]
impl IdempotencyTier for PgIdempotencyTier {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let row = sqlx::query(
            r#"
            SELECT key_id, status, response_json, created_at, expires_at
            FROM idempotency_keys
            WHERE key_id = $1 AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn put_if_absent(&self, record: IdempotencyRecord) -> Result<bool, IdempotencyError> {
        // An expired row counts as absent and is taken over in place
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key_id, status, response_json, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key_id) DO UPDATE SET
                status = EXCLUDED.status,
                response_json = EXCLUDED.response_json,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            WHERE idempotency_keys.expires_at IS NOT NULL
              AND idempotency_keys.expires_at <= NOW()
            "#,
        )
        .bind(&record.key)
        .bind(record.status.as_str())
        .bind(&record.response)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn put(&self, record: IdempotencyRecord) -> Result<(), IdempotencyError> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key_id, status, response_json, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key_id) DO UPDATE SET
                status = EXCLUDED.status,
                response_json = EXCLUDED.response_json,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&record.key)
        .bind(record.status.as_str())
        .bind(&record.response)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), IdempotencyError> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key_id = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyError> {
        let result = sqlx::query(
            "DELETE FROM idempotency_keys WHERE expires_at IS NOT NULL AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
