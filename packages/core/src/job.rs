//! Job model and the row-level state machine.
//!
//! Every transition a worker can make lives here as a guarded SQL
//! statement, so the database enforces the lifecycle invariants no matter
//! how many workers race. The claim is a single UPDATE whose subquery
//! selects the row, making selection and mutation atomic with respect to
//! other writers.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

use crate::clock;
use crate::error::Result;

/// Visibility lease granted by a claim, in seconds.
///
/// A worker refreshes the lease while it runs; a lease that expires
/// un-refreshed marks the job abandoned and claimable again.
pub const LEASE_SECONDS: i64 = 60;

/// `last_error` is a diagnostic, not a log sink.
const MAX_ERROR_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// Parse a state name; unknown names are `None` (callers treat them
    /// as an empty listing, not an error).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobState::Pending),
            "processing" => Some(JobState::Processing),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "dead" => Some(JobState::Dead),
            _ => None,
        }
    }
}

/// A unit of work: one shell command with retry budget and schedule.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: i64,
    pub max_retries: i64,
    pub priority: i64,
    pub created_at: String,
    pub updated_at: String,
    pub run_at: Option<String>,
    pub last_error: Option<String>,
    pub locked_by: Option<String>,
    pub lock_until: Option<String>,
}

/// A job that exhausted its retry budget, frozen in the dead letter queue.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DlqEntry {
    pub id: String,
    pub job_id: String,
    pub payload: String,
    pub dead_at: String,
}

/// The fields preserved across a DLQ round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqPayload {
    pub id: String,
    pub command: String,
    pub max_retries: i64,
    pub priority: i64,
}

impl DlqEntry {
    pub fn payload(&self) -> Result<DlqPayload> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Clip an error description to the stored diagnostic length.
pub(crate) fn truncate_error(detail: &str) -> String {
    detail.chars().take(MAX_ERROR_LEN).collect()
}

impl Job {
    /// Atomically claim the next runnable job for `worker_id`.
    ///
    /// Runnable means: `pending` or `failed`, past its `run_at`, and not
    /// held under a live lease; or `processing` with an expired lease
    /// (an abandoned claim from a crashed worker). Exactly one row is
    /// mutated; the subquery and the UPDATE execute as one statement, so
    /// two racing claimers serialize through the database and the loser
    /// sees the row already locked.
    ///
    /// Returns the claimed row, or `None` when nothing is due.
    pub async fn claim_next(pool: &SqlitePool, worker_id: &str) -> Result<Option<Job>> {
        let now = clock::now_iso();
        let lock_until = clock::iso_after_seconds(LEASE_SECONDS);

        let claimed = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'processing',
                locked_by = ?1,
                lock_until = ?2,
                attempts = attempts + 1,
                updated_at = ?3
            WHERE id = (
                SELECT id
                FROM jobs
                WHERE (
                    state IN ('pending', 'failed')
                    AND (run_at IS NULL OR run_at <= ?3)
                    AND (lock_until IS NULL OR lock_until <= ?3)
                )
                OR (state = 'processing' AND lock_until <= ?3)
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
            )
            "#,
        )
        .bind(worker_id)
        .bind(&lock_until)
        .bind(&now)
        .execute(pool)
        .await?;

        if claimed.rows_affected() == 0 {
            return Ok(None);
        }

        let job = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, command, state, attempts, max_retries, priority,
                   created_at, updated_at, run_at, last_error, locked_by, lock_until
            FROM jobs
            WHERE locked_by = ?1 AND state = 'processing'
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(worker_id)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    /// Push the lease forward for a job this worker still holds.
    ///
    /// Guarded by `locked_by`, so a lease that was stolen after expiry is
    /// never extended by the previous holder.
    pub async fn extend_lease(pool: &SqlitePool, job_id: &str, worker_id: &str) -> Result<()> {
        let lock_until = clock::iso_after_seconds(LEASE_SECONDS);
        sqlx::query(
            r#"
            UPDATE jobs
            SET lock_until = ?1,
                updated_at = ?2
            WHERE id = ?3 AND locked_by = ?4 AND state = 'processing'
            "#,
        )
        .bind(&lock_until)
        .bind(clock::now_iso())
        .bind(job_id)
        .bind(worker_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Terminal success: clear the lease and any stale diagnostic.
    pub async fn mark_completed(pool: &SqlitePool, job_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed',
                locked_by = NULL,
                lock_until = NULL,
                last_error = NULL,
                updated_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(clock::now_iso())
        .bind(job_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Record a retryable failure and hide the job until `run_at`.
    ///
    /// `lock_until` is set to `run_at`: the claim predicate then keeps the
    /// row invisible until its retry time without a dedicated column.
    pub async fn schedule_retry(
        pool: &SqlitePool,
        job_id: &str,
        run_at: &str,
        detail: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'failed',
                run_at = ?1,
                lock_until = ?1,
                locked_by = NULL,
                last_error = ?2,
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(run_at)
        .bind(truncate_error(detail))
        .bind(clock::now_iso())
        .bind(job_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Retry budget exhausted: snapshot the job into the DLQ and mark the
    /// row dead, in one transaction.
    pub async fn move_to_dlq(pool: &SqlitePool, job: &Job, detail: &str) -> Result<()> {
        let now = clock::now_iso();
        let payload = serde_json::to_string(&DlqPayload {
            id: job.id.clone(),
            command: job.command.clone(),
            max_retries: job.max_retries,
            priority: job.priority,
        })?;

        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO dlq (id, job_id, payload, dead_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (id) DO UPDATE SET
                payload = excluded.payload,
                dead_at = excluded.dead_at
            "#,
        )
        .bind(format!("dlq_{}", job.id))
        .bind(&job.id)
        .bind(&payload)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'dead',
                locked_by = NULL,
                lock_until = NULL,
                last_error = ?1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(truncate_error(detail))
        .bind(&now)
        .bind(&job.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn find_by_id(pool: &SqlitePool, job_id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, command, state, attempts, max_retries, priority,
                   created_at, updated_at, run_at, last_error, locked_by, lock_until
            FROM jobs
            WHERE id = ?1
            "#,
        )
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }
}
