//! SQLite persistence for the job queue
//!
//! Jobs live in a single table keyed by an autoincrement id. Delivery uses
//! time-bounded leases: a leased job is invisible to other workers until its
//! lease expires, at which point it is redelivered. Timestamps are RFC3339
//! at second precision, which compares correctly as text.

use crate::queue::{Job, QueueResult};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

/// SQL schema for the queue database
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_type TEXT NOT NULL,
    queue TEXT NOT NULL,
    args TEXT NOT NULL,
    run_at TEXT NOT NULL,
    leased_until TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_queue_run_at ON jobs(queue, run_at);
"#;

/// A job delivered to a worker slot
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub id: i64,
    pub job_type: String,
    pub queue: String,
    pub args: serde_json::Value,
    /// Delivery count including this one
    pub attempts: u32,
}

/// A queued job as seen by inspection paths (stats, tests)
#[derive(Debug, Clone)]
pub struct PendingJob {
    pub id: i64,
    pub job_type: String,
    pub args: serde_json::Value,
    pub run_at: String,
}

/// SQLite-backed job queue
pub struct SqliteQueue {
    conn: Connection,
}

/// Formats a timestamp the way the jobs table stores them
fn to_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl SqliteQueue {
    /// Opens or creates a queue database at the given path
    pub fn new(path: &Path) -> QueueResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory queue (for testing)
    pub fn new_in_memory() -> QueueResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Enqueues a job for delivery at its `run_at` (or immediately)
    pub fn push(&mut self, job: &Job) -> QueueResult<i64> {
        let now = Utc::now();
        let run_at = to_ts(job.run_at.unwrap_or(now));
        self.conn.execute(
            "INSERT INTO jobs (job_type, queue, args, run_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job.job_type,
                job.queue,
                job.args.to_string(),
                run_at,
                to_ts(now)
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Enqueues a job for delivery no earlier than `at`
    ///
    /// Scheduling granularity is one second; any `run_at` already on the
    /// job is superseded by `at`.
    pub fn push_scheduled(&mut self, job: &Job, at: DateTime<Utc>) -> QueueResult<i64> {
        self.push(&job.clone().scheduled_at(at))
    }

    /// Enqueues a batch of jobs in one transaction
    ///
    /// The batch is atomic from the producer's view; delivery of the
    /// individual jobs remains independent.
    pub fn push_bulk(&mut self, jobs: &[Job]) -> QueueResult<()> {
        let now = Utc::now();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO jobs (job_type, queue, args, run_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for job in jobs {
                let run_at = to_ts(job.run_at.unwrap_or(now));
                stmt.execute(params![
                    job.job_type,
                    job.queue,
                    job.args.to_string(),
                    run_at,
                    to_ts(now)
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Leases the next runnable job from the given queues
    ///
    /// Queues are scanned in the order given; listed order is priority. The
    /// oldest runnable job whose lease is absent or expired is stamped with
    /// a fresh lease and its delivery count incremented.
    pub fn lease_next(
        &mut self,
        queues: &[String],
        lease: Duration,
    ) -> QueueResult<Option<LeasedJob>> {
        let now = Utc::now();
        let now_ts = to_ts(now);
        let lease_secs = ChronoDuration::seconds(lease.as_secs() as i64);
        let leased_until = to_ts(now + lease_secs);

        for queue in queues {
            let tx = self.conn.transaction()?;
            let row: Option<(i64, String, String, String, u32)> = tx
                .query_row(
                    "SELECT id, job_type, queue, args, attempts FROM jobs
                     WHERE queue = ?1
                       AND run_at <= ?2
                       AND (leased_until IS NULL OR leased_until <= ?2)
                     ORDER BY run_at ASC, id ASC
                     LIMIT 1",
                    params![queue, now_ts],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                        ))
                    },
                )
                .optional()?;

            if let Some((id, job_type, queue, args, attempts)) = row {
                tx.execute(
                    "UPDATE jobs SET leased_until = ?1, attempts = attempts + 1 WHERE id = ?2",
                    params![leased_until, id],
                )?;
                tx.commit()?;
                return Ok(Some(LeasedJob {
                    id,
                    job_type,
                    queue,
                    args: serde_json::from_str(&args)?,
                    attempts: attempts + 1,
                }));
            }
        }

        Ok(None)
    }

    /// Acknowledges a completed job, removing it permanently
    pub fn ack(&mut self, job_id: i64) -> QueueResult<()> {
        self.conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![job_id])?;
        Ok(())
    }

    /// Returns a failed job to the queue after a backoff
    ///
    /// Clears the lease and pushes `run_at` forward so the job is not
    /// immediately re-leased by the same hot loop.
    pub fn nack(&mut self, job_id: i64, backoff: Duration) -> QueueResult<()> {
        let run_at = to_ts(Utc::now() + ChronoDuration::seconds(backoff.as_secs() as i64));
        self.conn.execute(
            "UPDATE jobs SET leased_until = NULL, run_at = ?1 WHERE id = ?2",
            params![run_at, job_id],
        )?;
        Ok(())
    }

    /// Lists jobs waiting in a queue, soonest first
    pub fn pending(&self, queue: &str) -> QueueResult<Vec<PendingJob>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_type, args, run_at FROM jobs
             WHERE queue = ?1 ORDER BY run_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![queue], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut jobs = Vec::new();
        for row in rows {
            let (id, job_type, args, run_at) = row?;
            jobs.push(PendingJob {
                id,
                job_type,
                args: serde_json::from_str(&args)?,
                run_at,
            });
        }
        Ok(jobs)
    }

    /// Counts jobs waiting in a queue
    pub fn pending_count(&self, queue: &str) -> QueueResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE queue = ?1",
            params![queue],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
