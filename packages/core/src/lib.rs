//! Durable, embedded background-job queue with a worker pool.
//!
//! Producers enqueue shell commands with optional scheduling and
//! priority; worker processes atomically claim due jobs through a shared
//! SQLite database, execute them under a timeout, and persist outcomes.
//! Failed jobs retry with exponential backoff until their budget is
//! spent, then land in a dead letter queue from which they can be
//! re-enqueued.
//!
//! The database file is the only coordination point: there is no
//! inter-worker channel, and no in-memory state survives a process exit.

pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod job;
pub mod queue;
pub mod registry;
pub mod store;
pub mod worker;

pub use config::ConfigStore;
pub use error::{QueueError, Result};
pub use job::{DlqEntry, DlqPayload, Job, JobState};
pub use queue::{EnqueueRequest, Queue, QueueStatus, StateListing};
pub use store::Store;
pub use worker::{Worker, WorkerConfig};
