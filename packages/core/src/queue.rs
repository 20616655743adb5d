//! Producer and operator surface of the queue.
//!
//! Everything here is a thin, transactional layer over the store; the
//! worker-facing transitions live in [`crate::job`].

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::clock;
use crate::config::ConfigStore;
use crate::error::{QueueError, Result};
use crate::ids;
use crate::job::{DlqEntry, Job, JobState};
use crate::registry;
use crate::store::Store;

/// What a producer submits. Only the command is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnqueueRequest {
    pub id: Option<String>,
    pub command: Option<String>,
    pub max_retries: Option<i64>,
    pub priority: Option<i64>,
    pub run_at: Option<String>,
}

/// Snapshot returned by [`Queue::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead: i64,
    pub active_workers: i64,
    pub oldest_pending: Option<String>,
}

#[derive(Debug, FromRow)]
struct StateCounts {
    pending: i64,
    processing: i64,
    completed: i64,
    failed: i64,
    dead: i64,
}

/// Result of [`Queue::list_by_state`]. The `dead` state reads from the
/// DLQ, which is authoritative once a job has been moved; every other
/// state lists job rows.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StateListing {
    Jobs(Vec<Job>),
    Dead(Vec<DlqEntry>),
}

/// Producer/operator API over a shared [`Store`].
#[derive(Clone)]
pub struct Queue {
    store: Store,
}

impl Queue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> ConfigStore {
        ConfigStore::new(&self.store)
    }

    /// Store a new `pending` job and return its id.
    ///
    /// Ids are caller-supplied or generated as `job_<8-char-random>`. A
    /// colliding id is reported, never overwritten.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<String> {
        let command = request
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(QueueError::EmptyCommand)?
            .to_string();

        let run_at = match &request.run_at {
            None => None,
            Some(ts) => Some(
                clock::normalize_iso(ts).ok_or_else(|| QueueError::InvalidRunAt(ts.clone()))?,
            ),
        };

        // The retry budget defaults through settings, so `config set
        // max_retries N` changes what producers get from here on.
        let max_retries = match request.max_retries {
            Some(n) => n,
            None => self.config().get_int("max_retries").await?,
        };

        let id = request.id.unwrap_or_else(ids::job_id);
        let now = clock::now_iso();

        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, priority,
                              created_at, updated_at, run_at)
            VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?5, ?5, ?6)
            "#,
        )
        .bind(&id)
        .bind(&command)
        .bind(max_retries)
        .bind(request.priority.unwrap_or(0))
        .bind(&now)
        .bind(&run_at)
        .execute(self.store.pool())
        .await;

        match inserted {
            Ok(_) => Ok(id),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(QueueError::DuplicateJob(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// List jobs in a given state, oldest first. `"dead"` lists the DLQ
    /// (newest first); an unknown state name is an empty listing.
    pub async fn list_by_state(&self, state: &str) -> Result<StateListing> {
        match JobState::parse(state) {
            Some(JobState::Dead) => Ok(StateListing::Dead(self.dlq_list().await?)),
            Some(state) => {
                let jobs = sqlx::query_as::<_, Job>(
                    r#"
                    SELECT id, command, state, attempts, max_retries, priority,
                           created_at, updated_at, run_at, last_error, locked_by, lock_until
                    FROM jobs
                    WHERE state = ?1
                    ORDER BY created_at ASC
                    "#,
                )
                .bind(state.as_str())
                .fetch_all(self.store.pool())
                .await?;
                Ok(StateListing::Jobs(jobs))
            }
            None => Ok(StateListing::Jobs(Vec::new())),
        }
    }

    /// Counts by state, live worker count, and the oldest pending
    /// `created_at` (strictly by creation time, ignoring `run_at`).
    pub async fn status(&self) -> Result<QueueStatus> {
        let counts = sqlx::query_as::<_, StateCounts>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE state = 'pending')    AS pending,
                COUNT(*) FILTER (WHERE state = 'processing') AS processing,
                COUNT(*) FILTER (WHERE state = 'completed')  AS completed,
                COUNT(*) FILTER (WHERE state = 'failed')     AS failed,
                COUNT(*) FILTER (WHERE state = 'dead')       AS dead
            FROM jobs
            "#,
        )
        .fetch_one(self.store.pool())
        .await?;

        let oldest_pending = sqlx::query_scalar::<_, Option<String>>(
            "SELECT MIN(created_at) FROM jobs WHERE state = 'pending'",
        )
        .fetch_one(self.store.pool())
        .await?;

        let active_workers = registry::active_count(self.store.pool()).await?;

        Ok(QueueStatus {
            pending: counts.pending,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            dead: counts.dead,
            active_workers,
            oldest_pending,
        })
    }

    /// All DLQ entries, most recently dead first.
    pub async fn dlq_list(&self) -> Result<Vec<DlqEntry>> {
        let entries = sqlx::query_as::<_, DlqEntry>(
            "SELECT id, job_id, payload, dead_at FROM dlq ORDER BY dead_at DESC",
        )
        .fetch_all(self.store.pool())
        .await?;

        Ok(entries)
    }

    /// Re-enqueue a dead-lettered job.
    ///
    /// One transaction: the DLQ entry is deleted, the dead job row is
    /// replaced by a fresh `pending` row with `attempts = 0` and the
    /// preserved `{id, command, max_retries, priority}`.
    pub async fn dlq_retry(&self, dlq_id: &str) -> Result<String> {
        let mut tx = self.store.pool().begin().await?;

        let entry = sqlx::query_as::<_, DlqEntry>(
            "SELECT id, job_id, payload, dead_at FROM dlq WHERE id = ?1",
        )
        .bind(dlq_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| QueueError::DlqEntryNotFound(dlq_id.to_string()))?;

        let payload = entry.payload()?;
        let now = clock::now_iso();

        sqlx::query("DELETE FROM dlq WHERE id = ?1")
            .bind(dlq_id)
            .execute(&mut *tx)
            .await?;

        // The dead row keeps the same primary key as the fresh job.
        sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(&payload.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, priority,
                              created_at, updated_at)
            VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?5, ?5)
            "#,
        )
        .bind(&payload.id)
        .bind(&payload.command)
        .bind(payload.max_retries)
        .bind(payload.priority)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(payload.id)
    }
}
