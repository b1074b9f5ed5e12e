//! Queue consumer: bounded worker pool and handler dispatch
//!
//! The consumer owns an ordered list of queues and a map of job type to
//! handler. `run` spawns the configured number of worker slots and blocks
//! forever; each slot independently leases jobs and dispatches them. A
//! handler error leaves the job for transport-level redelivery with a
//! backoff, up to a delivery cap; business-level retries (the retry
//! ledger) are layered on top of this by the handlers themselves.

use crate::queue::store::{LeasedJob, SqliteQueue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long a worker slot sleeps when every queue is empty
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long a delivered job stays invisible before redelivery
const LEASE_DURATION: Duration = Duration::from_secs(600);

/// Delay before a failed job becomes runnable again
const REDELIVERY_BACKOFF: Duration = Duration::from_secs(30);

/// Deliveries after which a persistently failing job is dropped
const MAX_DELIVERIES: u32 = 5;

/// Pause after a queue storage error before the slot retries
const STORE_RETRY_PAUSE: Duration = Duration::from_secs(5);

/// A registered processor for one job type
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, args: serde_json::Value) -> anyhow::Result<()>;
}

/// Pulls jobs from named queues and dispatches them to handlers
pub struct Consumer {
    queue: Arc<Mutex<SqliteQueue>>,
    queues: Vec<String>,
    concurrency: usize,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl Consumer {
    /// Creates a consumer over an ordered queue list
    ///
    /// Listed order is priority: a runnable job in an earlier queue is
    /// always delivered before one in a later queue.
    pub fn new(queue: Arc<Mutex<SqliteQueue>>, queues: Vec<String>, concurrency: usize) -> Self {
        Self {
            queue,
            queues,
            concurrency,
            handlers: HashMap::new(),
        }
    }

    /// Registers the handler for a job type
    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    /// Runs the worker pool; never returns under normal operation
    pub async fn run(self) -> crate::Result<()> {
        let handlers = Arc::new(self.handlers);
        let mut slots = Vec::with_capacity(self.concurrency);

        for slot in 0..self.concurrency {
            let queue = Arc::clone(&self.queue);
            let queues = self.queues.clone();
            let handlers = Arc::clone(&handlers);
            slots.push(tokio::spawn(async move {
                worker_loop(slot, queue, queues, handlers).await;
            }));
        }

        tracing::info!(
            "Consumer running with {} worker slots over queues {:?}",
            self.concurrency,
            self.queues
        );

        for slot in slots {
            // Worker loops only exit if they panic
            if let Err(e) = slot.await {
                tracing::error!("Worker slot terminated: {}", e);
            }
        }

        Ok(())
    }
}

/// One worker slot: lease, dispatch, acknowledge, repeat
async fn worker_loop(
    slot: usize,
    queue: Arc<Mutex<SqliteQueue>>,
    queues: Vec<String>,
    handlers: Arc<HashMap<String, Arc<dyn JobHandler>>>,
) {
    loop {
        // The lock guard must drop before any await point
        let leased = match queue.lock() {
            Ok(mut q) => Some(q.lease_next(&queues, LEASE_DURATION)),
            Err(_) => None,
        };

        let job = match leased {
            None => {
                tracing::error!(slot, "Queue lock poisoned; pausing worker slot");
                tokio::time::sleep(STORE_RETRY_PAUSE).await;
                continue;
            }
            Some(Ok(Some(job))) => job,
            Some(Ok(None)) => {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
            Some(Err(e)) => {
                // Transient-local: the queue store is unavailable. Pause and
                // retry; leased work is protected by its lease either way.
                tracing::error!(slot, "Queue unavailable: {}", e);
                tokio::time::sleep(STORE_RETRY_PAUSE).await;
                continue;
            }
        };

        dispatch(slot, &queue, &handlers, job).await;
    }
}

/// Dispatches one delivered job to its registered handler
async fn dispatch(
    slot: usize,
    queue: &Arc<Mutex<SqliteQueue>>,
    handlers: &HashMap<String, Arc<dyn JobHandler>>,
    job: LeasedJob,
) {
    let handler = match handlers.get(&job.job_type) {
        Some(h) => Arc::clone(h),
        None => {
            tracing::error!(slot, job_type = %job.job_type, "No handler registered; dropping job");
            finish(queue, |q| q.ack(job.id));
            return;
        }
    };

    tracing::debug!(slot, job_id = job.id, job_type = %job.job_type, "Processing job");

    match handler.handle(job.args.clone()).await {
        Ok(()) => finish(queue, |q| q.ack(job.id)),
        Err(e) => {
            if job.attempts >= MAX_DELIVERIES {
                tracing::error!(
                    slot,
                    job_id = job.id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    "Job failed on final delivery, dropping: {:#}",
                    e
                );
                finish(queue, |q| q.ack(job.id));
            } else {
                tracing::warn!(
                    slot,
                    job_id = job.id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    "Job failed, leaving for redelivery: {:#}",
                    e
                );
                finish(queue, |q| q.nack(job.id, REDELIVERY_BACKOFF));
            }
        }
    }
}

/// Applies a queue operation, logging rather than propagating failures
///
/// If the ack/nack itself fails the job simply stays leased and the lease
/// timeout produces a redelivery; nothing is lost.
fn finish<F>(queue: &Arc<Mutex<SqliteQueue>>, op: F)
where
    F: FnOnce(&mut SqliteQueue) -> crate::queue::QueueResult<()>,
{
    match queue.lock() {
        Ok(mut q) => {
            if let Err(e) = op(&mut q) {
                tracing::error!("Queue update failed: {}", e);
            }
        }
        Err(_) => tracing::error!("Queue lock poisoned during job completion"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Job;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _args: serde_json::Value) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("handler failure");
            }
            Ok(())
        }
    }

    fn consumer_with_handler(
        fail: bool,
    ) -> (Consumer, Arc<Mutex<SqliteQueue>>, Arc<AtomicU32>) {
        let queue = Arc::new(Mutex::new(SqliteQueue::new_in_memory().unwrap()));
        let calls = Arc::new(AtomicU32::new(0));
        let mut consumer = Consumer::new(Arc::clone(&queue), vec!["work".to_string()], 2);
        consumer.register(
            "count",
            Arc::new(CountingHandler {
                calls: Arc::clone(&calls),
                fail,
            }),
        );
        (consumer, queue, calls)
    }

    #[tokio::test]
    async fn test_consumer_processes_job() {
        let (consumer, queue, calls) = consumer_with_handler(false);
        queue
            .lock()
            .unwrap()
            .push(&Job::new("count", json!([]), "work"))
            .unwrap();

        let running = tokio::spawn(consumer.run());
        tokio::time::sleep(Duration::from_millis(300)).await;
        running.abort();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.lock().unwrap().pending_count("work").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_job_type_is_dropped() {
        let (consumer, queue, calls) = consumer_with_handler(false);
        queue
            .lock()
            .unwrap()
            .push(&Job::new("mystery", json!([]), "work"))
            .unwrap();

        let running = tokio::spawn(consumer.run());
        tokio::time::sleep(Duration::from_millis(300)).await;
        running.abort();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.lock().unwrap().pending_count("work").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failing_job_left_for_redelivery() {
        let (consumer, queue, calls) = consumer_with_handler(true);
        queue
            .lock()
            .unwrap()
            .push(&Job::new("count", json!([]), "work"))
            .unwrap();

        let running = tokio::spawn(consumer.run());
        tokio::time::sleep(Duration::from_millis(300)).await;
        running.abort();

        // Handler ran once, job survived with a future run_at
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.lock().unwrap().pending_count("work").unwrap(), 1);
    }
}
