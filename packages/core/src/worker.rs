//! Worker runtime: claim loop, shell executor, lease refresher.
//!
//! ```text
//! Worker
//!     │
//!     ├─► heartbeat (workers table, best effort)
//!     ├─► claim next runnable job (atomic UPDATE)
//!     ├─► spawn lease refresher ──┐ every 10 s while the command runs
//!     ├─► run command via shell   │ 30 s wall-clock timeout
//!     ├─► cancel refresher ◄──────┘
//!     └─► resolve: completed / failed(retry) / dead(DLQ)
//! ```
//!
//! Delivery is at least once: a worker that dies mid-job leaves its lease
//! to expire, and the next claimer re-executes the command. Jobs must be
//! idempotent.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePool;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::config::ConfigStore;
use crate::error::Result;
use crate::ids;
use crate::job::Job;
use crate::registry;
use crate::store::Store;

/// Idle sleep between empty claim attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Lease refresh cadence; well inside the 60 s lease.
const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Wall-clock budget for one command execution.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after a store error before the loop tries again.
const CONTENTION_BACKOFF: Duration = Duration::from_secs(1);

/// Used when the `backoff_base` setting is absent or unusable.
const FALLBACK_BACKOFF_BASE: i64 = 2;

/// Configuration for a single worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity written into `locked_by` and the workers table.
    pub worker_id: String,
    /// Exit after the first processed job (integration tests, one-shot runs).
    pub single_run: bool,
    /// Idle sleep between empty claim attempts.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: ids::worker_id(),
            single_run: false,
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl WorkerConfig {
    /// Config with an explicit worker id.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// What one command execution produced.
#[derive(Debug)]
enum CommandOutcome {
    Success,
    Failure { detail: String },
}

/// A single worker process: claims jobs one at a time and drives each to
/// a terminal or retryable state.
pub struct Worker {
    store: Store,
    settings: ConfigStore,
    config: WorkerConfig,
    stop: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(store: Store) -> Self {
        let settings = ConfigStore::new(&store);
        Self {
            store,
            settings,
            config: WorkerConfig::default(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_config(store: Store, config: WorkerConfig) -> Self {
        let settings = ConfigStore::new(&store);
        Self {
            store,
            settings,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Handle for requesting shutdown from another task.
    ///
    /// Store `true` to stop the loop; an in-flight job finishes first
    /// (its subprocess wait is bounded by the 30 s command timeout).
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Run until shutdown is requested (or, in single-run mode, until one
    /// job has been processed).
    pub async fn run(self) -> Result<()> {
        let pid = std::process::id() as i64;
        info!(
            worker_id = %self.config.worker_id,
            pid,
            single_run = self.config.single_run,
            "worker starting"
        );

        loop {
            if self.is_stop_requested() {
                break;
            }

            // Liveness is advisory: a failed heartbeat self-heals on the
            // next tick and must not stall the claim loop.
            if let Err(e) = registry::heartbeat(self.store.pool(), &self.config.worker_id, pid).await
            {
                warn!(worker_id = %self.config.worker_id, error = %e, "heartbeat failed");
            }

            let claimed = match Job::claim_next(self.store.pool(), &self.config.worker_id).await {
                Ok(job) => job,
                Err(e) => {
                    error!(error = %e, "failed to claim a job");
                    tokio::time::sleep(CONTENTION_BACKOFF).await;
                    continue;
                }
            };

            let Some(job) = claimed else {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            };

            self.process(job).await;

            if self.config.single_run {
                break;
            }
        }

        info!(worker_id = %self.config.worker_id, "worker stopped");
        Ok(())
    }

    /// Run until SIGINT/SIGTERM (Ctrl+C on all platforms).
    ///
    /// The signal only raises the stop flag; a running subprocess is
    /// never killed by shutdown, it is waited out within its own timeout.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let stop = self.shutdown_handle();

        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("shutdown signal received, finishing current job");
            stop.store(true, Ordering::SeqCst);
        });

        self.run().await
    }

    /// Execute one claimed job and persist its outcome.
    async fn process(&self, job: Job) {
        let job_id = job.id.clone();
        debug!(job_id = %job_id, command = %job.command, attempts = job.attempts, "executing job");

        // Operators may retune backoff between attempts; read it fresh.
        let backoff_base = match self.settings.get_int("backoff_base").await {
            Ok(base) if base > 0 => base,
            Ok(_) => FALLBACK_BACKOFF_BASE,
            Err(e) => {
                warn!(error = %e, "could not read backoff_base, using fallback");
                FALLBACK_BACKOFF_BASE
            }
        };

        let cancel = CancellationToken::new();
        let refresher = tokio::spawn(refresh_lease_loop(
            self.store.pool().clone(),
            job_id.clone(),
            self.config.worker_id.clone(),
            cancel.clone(),
        ));

        let outcome = execute_command(&job.command).await;

        // The refresher must be fully stopped before resolution so it
        // cannot resurrect a lease on a row we just released.
        cancel.cancel();
        let _ = refresher.await;

        if let Err(e) = self.resolve(&job, outcome, backoff_base).await {
            error!(job_id = %job_id, error = %e, "failed to record job outcome");
        }
    }

    /// Outcome state machine (attempts was already incremented at claim).
    async fn resolve(&self, job: &Job, outcome: CommandOutcome, backoff_base: i64) -> Result<()> {
        let pool = self.store.pool();
        match outcome {
            CommandOutcome::Success => {
                Job::mark_completed(pool, &job.id).await?;
                info!(job_id = %job.id, "job completed");
            }
            CommandOutcome::Failure { detail } if job.attempts < job.max_retries => {
                let delay = clock::backoff_secs(backoff_base, job.attempts);
                let run_at = clock::iso_after_seconds(delay);
                Job::schedule_retry(pool, &job.id, &run_at, &detail).await?;
                warn!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    delay_secs = delay,
                    error = %detail,
                    "job failed, retry scheduled"
                );
            }
            CommandOutcome::Failure { detail } => {
                Job::move_to_dlq(pool, job, &detail).await?;
                warn!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    error = %detail,
                    "job failed permanently, moved to dead letter queue"
                );
            }
        }
        Ok(())
    }
}

/// Keep the visibility lease alive while the command runs.
///
/// Best effort: a missed refresh is only fatal if the worker then stalls
/// past the remaining lease, which is exactly the crash-recovery path.
async fn refresh_lease_loop(
    pool: SqlitePool,
    job_id: String,
    worker_id: String,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(REFRESH_INTERVAL);
    interval.tick().await; // skip the immediate tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = Job::extend_lease(&pool, &job_id, &worker_id).await {
                    warn!(job_id = %job_id, error = %e, "lease refresh failed");
                }
            }
        }
    }
}

/// Run `command` through the platform shell under the wall-clock timeout.
async fn execute_command(command: &str) -> CommandOutcome {
    if command.trim().is_empty() {
        return CommandOutcome::Failure {
            detail: "spawn failed: empty command".to_string(),
        };
    }

    let mut cmd = shell_command(command);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(COMMAND_TIMEOUT, cmd.output()).await {
        // Timed out: dropping the future kills the child (kill_on_drop).
        Err(_) => CommandOutcome::Failure {
            detail: format!("timed out after {}s", COMMAND_TIMEOUT.as_secs()),
        },
        Ok(Err(e)) => CommandOutcome::Failure {
            detail: format!("spawn failed: {e}"),
        },
        Ok(Ok(output)) if output.status.success() => CommandOutcome::Success,
        Ok(Ok(output)) => {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            CommandOutcome::Failure {
                detail: format!("exit={}: {}", code, stderr.trim()),
            }
        }
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = WorkerConfig::default();
        assert!(config.worker_id.starts_with("worker_"));
        assert!(!config.single_run);
        assert_eq!(config.poll_interval, Duration::from_millis(200));
    }

    #[test]
    fn test_config_with_worker_id() {
        let config = WorkerConfig::with_worker_id("worker_test1234");
        assert_eq!(config.worker_id, "worker_test1234");
    }

    #[tokio::test]
    async fn test_execute_command_success() {
        assert!(matches!(
            execute_command("true").await,
            CommandOutcome::Success
        ));
    }

    #[tokio::test]
    async fn test_execute_command_captures_exit_and_stderr() {
        let outcome = execute_command("echo boom >&2; exit 3").await;
        match outcome {
            CommandOutcome::Failure { detail } => {
                assert!(detail.starts_with("exit=3:"), "unexpected detail: {detail}");
                assert!(detail.contains("boom"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_command_empty_is_spawn_failure() {
        let outcome = execute_command("   ").await;
        match outcome {
            CommandOutcome::Failure { detail } => assert!(detail.starts_with("spawn failed")),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
