//! Worker liveness records.
//!
//! Each worker upserts a heartbeat row at the top of every loop
//! iteration. `status.active_workers` counts rows whose heartbeat is
//! recent; stale rows are simply ignored, never reaped.

use sqlx::sqlite::SqlitePool;

use crate::clock;
use crate::error::Result;

/// A worker counts as active while its heartbeat is within this window.
pub const ACTIVE_WINDOW_SECONDS: i64 = 10;

/// Upsert the heartbeat row for `worker_id`, preserving the original
/// `started_at`.
pub async fn heartbeat(pool: &SqlitePool, worker_id: &str, pid: i64) -> Result<()> {
    let now = clock::now_iso();
    sqlx::query(
        r#"
        INSERT INTO workers (id, pid, started_at, heartbeat_at)
        VALUES (?1, ?2, ?3, ?3)
        ON CONFLICT (id) DO UPDATE SET heartbeat_at = excluded.heartbeat_at
        "#,
    )
    .bind(worker_id)
    .bind(pid)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Number of workers with a heartbeat inside the active window.
pub async fn active_count(pool: &SqlitePool) -> Result<i64> {
    let cutoff = clock::iso_after_seconds(-ACTIVE_WINDOW_SECONDS);
    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM workers WHERE heartbeat_at >= ?1")
            .bind(&cutoff)
            .fetch_one(pool)
            .await?;

    Ok(count)
}
