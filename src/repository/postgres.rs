//! Postgres-backed `JobRepository` (§4.3 schema). The select-then-claim in `claim_next` runs as
//! `SELECT ... FOR UPDATE SKIP LOCKED` followed by a conditional `UPDATE` inside one transaction,
//! giving the atomic conditional update the spec requires without a distinct reclaim path.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::{NewJob, Part, Request};
use crate::error::{Error, Result};

use super::{ClaimedJob, JobRepository};

/// Embedded migrations, run once at startup (§8 ambient stack: "four tables, created by an
/// embedded migration run at startup").
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    /// Connects to `database_url` and runs pending migrations before returning.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|err| Error::Repository(format!("failed to connect to postgres: {err}")))?;
        Self::from_pool(pool).await
    }

    /// Wraps an already-constructed pool (tests that manage their own connection lifecycle).
    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|err| Error::Repository(format!("failed to run migrations: {err}")))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn add_request(
        &self,
        request: Request,
        jobs: Vec<NewJob>,
        parts: Vec<Part>,
    ) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO requests (correlation_id, video_source, audio_source, destination, needed, enable_dash) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(request.correlation_id)
        .bind(&request.video_source)
        .bind(&request.audio_source)
        .bind(&request.destination)
        .bind(request.needed)
        .bind(request.enable_dash)
        .execute(&mut *tx)
        .await?;

        for job in &jobs {
            sqlx::query(
                "INSERT INTO jobs (correlation_id, kind, arguments, needed, source, chunk_duration_seconds) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(request.correlation_id)
            .bind(job_kind_label(job.kind))
            .bind(&job.arguments)
            .bind(request.needed)
            .bind(&job.source)
            .bind(job.chunk_duration_seconds)
            .execute(&mut *tx)
            .await?;
        }

        for part in &parts {
            sqlx::query(
                "INSERT INTO parts (correlation_id, target_index, number, filename) VALUES ($1, $2, $3, $4)",
            )
            .bind(part.correlation_id)
            .bind(part.target_index as i32)
            .bind(part.number as i32)
            .bind(&part.filename)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(request.correlation_id)
    }

    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        lease_timeout: ChronoDuration,
    ) -> Result<Option<ClaimedJob>> {
        let threshold = now - lease_timeout;
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query(
            "SELECT id, taken FROM jobs \
             WHERE active AND NOT done AND (NOT taken OR heartbeat < $1) \
             ORDER BY needed ASC, id ASC \
             LIMIT 1 FOR UPDATE SKIP LOCKED",
        )
        .bind(threshold)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let job_id: i64 = row.get("id");
        let was_taken: bool = row.get("taken");

        let claimed = sqlx::query(
            "UPDATE jobs SET taken = true, heartbeat = $1 \
             WHERE id = $2 AND taken = $3 \
             RETURNING id, arguments, correlation_id",
        )
        .bind(now)
        .bind(job_id)
        .bind(was_taken)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = claimed else {
            // Another transaction's `FOR UPDATE SKIP LOCKED` window overlapped ours and won the
            // conditional update first; absorbed by the dispatcher, never retried here.
            return Err(Error::ClaimLost);
        };

        tx.commit().await?;

        Ok(Some(ClaimedJob {
            id: row.get("id"),
            arguments: row.get("arguments"),
            correlation_id: row.get("correlation_id"),
        }))
    }

    async fn heartbeat(&self, job_id: i64, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE jobs SET heartbeat = $1 WHERE id = $2")
            .bind(now)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_done(&self, job_id: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET done = true WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: i64, reason: &str) -> Result<()> {
        tracing::warn!(job_id, reason, "job marked failed");
        // No failure-reason column in the schema (§4.3); deactivating stops redispatch the same
        // way an operator-initiated pause would.
        sqlx::query("UPDATE jobs SET active = false WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pause(&self, correlation_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET active = false \
             WHERE correlation_id = $1 AND NOT done AND NOT taken",
        )
        .bind(correlation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn record_worker_heartbeat(&self, machine_name: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO worker_heartbeats (machine_name, last_seen) VALUES ($1, $2) \
             ON CONFLICT (machine_name) DO UPDATE SET last_seen = EXCLUDED.last_seen",
        )
        .bind(machine_name)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn job_kind_label(kind: crate::domain::JobKind) -> &'static str {
    use crate::domain::JobKind;
    match kind {
        JobKind::Audio => "audio",
        JobKind::Video => "video",
        JobKind::Mux => "mux",
    }
}
