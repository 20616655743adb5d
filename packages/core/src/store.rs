//! SQLite-backed storage for jobs, the dead letter queue, settings and
//! worker liveness.
//!
//! The database file is the sole coordination point between producers,
//! workers and status readers: all cross-process ordering derives from
//! SQLite's write serialization. WAL mode keeps readers concurrent with
//! the single writer, and the busy timeout absorbs transient lock
//! contention so claim statements do not fail under load.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::error::Result;

/// How long a statement waits on a locked database before surfacing an
/// error to the caller.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id          TEXT PRIMARY KEY,
        command     TEXT NOT NULL,
        state       TEXT NOT NULL DEFAULT 'pending',
        attempts    INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL DEFAULT 3,
        priority    INTEGER NOT NULL DEFAULT 0,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL,
        run_at      TEXT,
        last_error  TEXT,
        locked_by   TEXT,
        lock_until  TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_state_run_at ON jobs (state, run_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_priority ON jobs (priority DESC, created_at ASC)",
    r#"
    CREATE TABLE IF NOT EXISTS dlq (
        id      TEXT PRIMARY KEY,
        job_id  TEXT NOT NULL,
        payload TEXT NOT NULL,
        dead_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workers (
        id           TEXT PRIMARY KEY,
        pid          INTEGER NOT NULL,
        started_at   TEXT NOT NULL,
        heartbeat_at TEXT NOT NULL
    )
    "#,
];

/// Handle to the queue database.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the queue database at `path` and bootstrap the
    /// schema. Bootstrap is idempotent: existing databases are opened
    /// unchanged.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
