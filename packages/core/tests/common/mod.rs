#![allow(dead_code)]

//! Shared harness for queue integration tests.
//!
//! Each test gets its own database file in a temp directory, so tests
//! can run in parallel without sharing state.

use std::time::Duration;

use jobctl_core::{Job, Queue, Store, Worker, WorkerConfig};
use tempfile::TempDir;

pub struct TestQueue {
    pub store: Store,
    pub queue: Queue,
    _dir: TempDir,
}

pub async fn test_queue() -> TestQueue {
    let dir = TempDir::new().expect("failed to create temp dir");
    let store = Store::open(dir.path().join("queue.db"))
        .await
        .expect("failed to open store");
    TestQueue {
        queue: Queue::new(store.clone()),
        store,
        _dir: dir,
    }
}

impl TestQueue {
    /// Run a single-run worker to completion: it polls until it has
    /// processed exactly one job, then returns.
    pub async fn run_one_job(&self) {
        let worker = Worker::with_config(
            self.store.clone(),
            WorkerConfig {
                single_run: true,
                ..Default::default()
            },
        );
        tokio::time::timeout(Duration::from_secs(30), worker.run())
            .await
            .expect("worker did not finish in time")
            .expect("worker failed");
    }

    /// Fetch a job row that must exist.
    pub async fn job(&self, id: &str) -> Job {
        Job::find_by_id(self.store.pool(), id)
            .await
            .expect("failed to load job")
            .unwrap_or_else(|| panic!("job '{id}' not found"))
    }

    /// Rewind a job's lease into the past, as if its worker had crashed
    /// and the lease had expired.
    pub async fn expire_lease(&self, id: &str) {
        sqlx::query("UPDATE jobs SET lock_until = ?1 WHERE id = ?2")
            .bind(jobctl_core::clock::iso_after_seconds(-120))
            .bind(id)
            .execute(self.store.pool())
            .await
            .expect("failed to expire lease");
    }
}
