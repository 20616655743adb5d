//! Operator CLI for the job queue.
//!
//! Thin front-end over `jobctl-core`: every subcommand maps onto one
//! published queue operation and emits JSON on stdout. Logs go to stderr
//! so output stays pipeable.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobctl_core::{EnqueueRequest, Queue, Store, Worker, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod supervisor;

#[derive(Parser)]
#[command(name = "jobctl", about = "Durable background job queue", version)]
struct Cli {
    /// Path to the queue database
    #[arg(long, global = true, env = "JOBCTL_DB", default_value = "queue.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a job, either as a JSON object or via flags (flags win)
    Enqueue {
        /// JSON object: {"id", "command", "max_retries", "priority", "run_at"}
        json: Option<String>,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        command: Option<String>,
        #[arg(long)]
        max_retries: Option<i64>,
        #[arg(long)]
        priority: Option<i64>,
        /// Earliest execution time, RFC 3339
        #[arg(long)]
        run_at: Option<String>,
    },
    /// List jobs by state ("dead" lists the dead letter queue)
    List {
        #[arg(long, default_value = "pending")]
        state: String,
    },
    /// Counts by state, active workers and the oldest pending job
    Status,
    /// Dead letter queue operations
    Dlq {
        #[command(subcommand)]
        command: DlqCommand,
    },
    /// Queue settings (keys are normalized: '-' becomes '_')
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Worker pool supervision
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },
}

#[derive(Subcommand)]
enum DlqCommand {
    /// List dead letter entries, newest first
    List,
    /// Re-enqueue a dead letter entry as a fresh pending job
    Retry { id: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Get { key: String },
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum WorkerCommand {
    /// Spawn worker processes and record their PIDs in .workers.pid
    Start {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Signal all recorded worker processes to shut down
    Stop,
    /// Run the worker loop in this process (used by `worker start`)
    #[command(hide = true)]
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,jobctl=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Enqueue {
            json,
            id,
            command,
            max_retries,
            priority,
            run_at,
        } => {
            let mut request: EnqueueRequest = match json {
                Some(raw) => serde_json::from_str(&raw).context("invalid enqueue JSON")?,
                None => EnqueueRequest::default(),
            };
            request.id = id.or(request.id);
            request.command = command.or(request.command);
            request.max_retries = max_retries.or(request.max_retries);
            request.priority = priority.or(request.priority);
            request.run_at = run_at.or(request.run_at);

            let queue = open_queue(&cli.db).await?;
            let job_id = queue.enqueue(request).await?;
            println!("{job_id}");
        }
        Command::List { state } => {
            let queue = open_queue(&cli.db).await?;
            let listing = queue.list_by_state(&state).await?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        Command::Status => {
            let queue = open_queue(&cli.db).await?;
            let status = queue.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Dlq { command } => {
            let queue = open_queue(&cli.db).await?;
            match command {
                DlqCommand::List => {
                    let entries = queue.dlq_list().await?;
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                }
                DlqCommand::Retry { id } => {
                    let job_id = queue.dlq_retry(&id).await?;
                    println!("{job_id}");
                }
            }
        }
        Command::Config { command } => {
            let queue = open_queue(&cli.db).await?;
            let config = queue.config();
            match command {
                ConfigCommand::Get { key } => match config.get(&normalize_key(&key)).await? {
                    Some(value) => println!("{value}"),
                    None => println!("null"),
                },
                ConfigCommand::Set { key, value } => {
                    config.set(&normalize_key(&key), &value).await?;
                }
            }
        }
        Command::Worker { command } => match command {
            WorkerCommand::Start { count } => {
                let pids = supervisor::start_workers(&cli.db, count)?;
                for pid in pids {
                    println!("{pid}");
                }
            }
            WorkerCommand::Stop => {
                let stopped = supervisor::stop_workers()?;
                tracing::info!(count = stopped, "signalled workers");
            }
            WorkerCommand::Run => {
                let store = Store::open(&cli.db).await?;
                let config = WorkerConfig {
                    single_run: std::env::var("SINGLE_RUN").as_deref() == Ok("1"),
                    ..Default::default()
                };
                Worker::with_config(store, config).run_until_shutdown().await?;
            }
        },
    }

    Ok(())
}

async fn open_queue(db: &Path) -> Result<Queue> {
    let store = Store::open(db)
        .await
        .with_context(|| format!("failed to open queue database at {}", db.display()))?;
    Ok(Queue::new(store))
}

/// Config keys accept hyphenated spellings on the command line.
fn normalize_key(key: &str) -> String {
    key.replace('-', "_")
}
