use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    ClaimOutcome, IdempotencyConfig, IdempotencyError, IdempotencyRecord, Result,
    store::IdempotencyStore,
};

/// Attempts before a claim that keeps racing an expiring row gives up.
const MAX_CLAIM_ROUNDS: usize = 3;

/// PostgreSQL-backed idempotency store.
///
/// A claim is a single `INSERT ... ON CONFLICT DO UPDATE` that only
/// overwrites an expired row, so the database arbitrates concurrent claims.
#[derive(Clone)]
pub struct PostgresIdempotencyStore {
    pool: PgPool,
    config: IdempotencyConfig,
}

impl PostgresIdempotencyStore {
    /// Creates a new PostgreSQL idempotency store.
    pub fn new(pool: PgPool, config: IdempotencyConfig) -> Self {
        Self { pool, config }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<IdempotencyRecord> {
        let status: String = row.try_get("status")?;

        Ok(IdempotencyRecord {
            consumer: row.try_get("consumer")?,
            key: row.try_get("dedup_key")?,
            status: status.parse()?,
            result: row.try_get("result")?,
            published: row.try_get("published")?,
            claimed_at: row.try_get("claimed_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    #[tracing::instrument(skip(self))]
    async fn try_claim(&self, consumer: &str, key: &str) -> Result<ClaimOutcome> {
        for _ in 0..MAX_CLAIM_ROUNDS {
            let now = Utc::now();

            let claimed = sqlx::query(
                r#"
                INSERT INTO idempotency_records
                    (consumer, dedup_key, status, result, published, claimed_at, expires_at)
                VALUES ($1, $2, 'pending', NULL, FALSE, $3, $4)
                ON CONFLICT (consumer, dedup_key) DO UPDATE
                SET status = 'pending',
                    result = NULL,
                    published = FALSE,
                    claimed_at = EXCLUDED.claimed_at,
                    expires_at = EXCLUDED.expires_at
                WHERE idempotency_records.expires_at <= EXCLUDED.claimed_at
                RETURNING consumer
                "#,
            )
            .bind(consumer)
            .bind(key)
            .bind(now)
            .bind(self.config.lease_until(now))
            .fetch_optional(&self.pool)
            .await?;

            if claimed.is_some() {
                metrics::counter!("idempotency_claims_total", "consumer" => consumer.to_string(), "outcome" => "claimed").increment(1);
                return Ok(ClaimOutcome::Claimed);
            }

            // The row exists and is live; read it. It may have expired and
            // been purged in between, in which case claim again.
            if let Some(existing) = self.get(consumer, key).await? {
                metrics::counter!("idempotency_claims_total", "consumer" => consumer.to_string(), "outcome" => "already_claimed").increment(1);
                return Ok(ClaimOutcome::AlreadyClaimed(existing));
            }
        }

        Err(IdempotencyError::Unavailable(format!(
            "claim for {consumer}/{key} kept racing an expiring record"
        )))
    }

    #[tracing::instrument(skip(self, result))]
    async fn record_result(
        &self,
        consumer: &str,
        key: &str,
        result: serde_json::Value,
    ) -> Result<()> {
        let now = Utc::now();
        let updated = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET status = 'completed', result = $3, published = FALSE, expires_at = $4
            WHERE consumer = $1 AND dedup_key = $2 AND status = 'pending'
            "#,
        )
        .bind(consumer)
        .bind(key)
        .bind(result)
        .bind(self.config.retain_until(now))
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(IdempotencyError::not_held(consumer, key, "pending"));
        }
        Ok(())
    }

    async fn release(&self, consumer: &str, key: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM idempotency_records WHERE consumer = $1 AND dedup_key = $2 AND status = 'pending'",
        )
        .bind(consumer)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_published(&self, consumer: &str, key: &str) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET published = TRUE
            WHERE consumer = $1 AND dedup_key = $2 AND status = 'completed'
            "#,
        )
        .bind(consumer)
        .bind(key)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(IdempotencyError::not_held(consumer, key, "completed"));
        }
        Ok(())
    }

    async fn unpublished(&self, consumer: &str) -> Result<Vec<IdempotencyRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT consumer, dedup_key, status, result, published, claimed_at, expires_at
            FROM idempotency_records
            WHERE consumer = $1 AND status = 'completed' AND NOT published AND expires_at > $2
            ORDER BY claimed_at ASC
            "#,
        )
        .bind(consumer)
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn get(&self, consumer: &str, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT consumer, dedup_key, status, result, published, claimed_at, expires_at
            FROM idempotency_records
            WHERE consumer = $1 AND dedup_key = $2 AND expires_at > $3
            "#,
        )
        .bind(consumer)
        .bind(key)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn purge_expired(&self) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= $1")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        let purged = deleted.rows_affected();
        if purged > 0 {
            tracing::info!(purged, "purged expired idempotency records");
        }
        Ok(purged)
    }
}
