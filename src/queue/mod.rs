//! Durable job queue with at-least-once delivery
//!
//! Work distribution runs through a SQLite-backed queue: producers push
//! immediate or scheduled jobs, a consumer with a bounded pool of worker
//! slots leases them and dispatches by job type. Delivery is at-least-once;
//! every handler must therefore be idempotent on redelivery. The queue also
//! carries the crawl schedule itself (self-rescheduling jobs), so the
//! schedule survives process restarts.

mod consumer;
mod store;

pub use consumer::{Consumer, JobHandler};
pub use store::{LeasedJob, PendingJob, SqliteQueue};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Job arguments are not valid JSON: {0}")]
    BadArgs(#[from] serde_json::Error),

    #[error("Queue lock poisoned")]
    Poisoned,
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// A unit of work submitted to the queue
///
/// `args` is a JSON array acting as the job's argument tuple. Jobs carry no
/// ordering guarantee across item ids and may be delivered more than once.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_type: String,
    pub args: serde_json::Value,
    pub queue: String,
    pub run_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a job for immediate delivery
    pub fn new(
        job_type: impl Into<String>,
        args: serde_json::Value,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            job_type: job_type.into(),
            args,
            queue: queue.into(),
            run_at: None,
        }
    }

    /// Delays delivery until `at`
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.run_at = Some(at);
        self
    }
}
