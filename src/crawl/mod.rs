//! Crawl coordination: job handlers and process wiring
//!
//! The coordinator is a set of queue job handlers rather than a resident
//! state machine. Each discovery tick fetches a container snapshot, diffs
//! it against the previous snapshot carried in the job's own arguments,
//! turns the dead set into fetch jobs, and schedules its successor. The
//! recurring schedule lives in the durable queue, so it survives process
//! restarts.

mod coordinator;

pub use coordinator::{
    seed_jobs, CrawlContext, DiscoverHandler, FetchHandler, RetrySweepHandler, DISCOVER_JOB,
    FETCH_JOB, QUEUE_DISCOVER, QUEUE_FETCH, QUEUE_RETRY, RETRY_JOB,
};

use crate::config::Config;
use crate::queue::{Consumer, SqliteQueue};
use crate::sink::SqliteSink;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Opens the queue and sink stores for this process
pub fn open_stores(
    config: &Config,
) -> crate::Result<(Arc<Mutex<SqliteQueue>>, Arc<Mutex<SqliteSink>>)> {
    let queue = SqliteQueue::new(Path::new(&config.queue.database_path))?;
    let sink = SqliteSink::new(Path::new(&config.store.database_path))?;
    Ok((Arc::new(Mutex::new(queue)), Arc::new(Mutex::new(sink))))
}

/// Runs the crawler: builds the consumer, registers handlers, blocks forever
///
/// Fails fast before serving jobs if credentials are rejected, so the
/// process never runs unauthenticated.
pub async fn run(config: Config) -> crate::Result<()> {
    let (queue, sink) = open_stores(&config)?;
    let config = Arc::new(config);

    // Permanent-failure check: bad credentials must abort startup
    let mut probe = crate::source::SourceClient::new(
        config.source.clone(),
        config.crawl.rate_limit_buffer,
    )?;
    probe.authenticate().await?;

    let context = CrawlContext::new(Arc::clone(&config), Arc::clone(&queue), Arc::clone(&sink))?;

    let mut consumer = Consumer::new(
        Arc::clone(&queue),
        vec![
            QUEUE_DISCOVER.to_string(),
            QUEUE_FETCH.to_string(),
            QUEUE_RETRY.to_string(),
        ],
        config.crawl.concurrency as usize,
    );
    consumer.register(DISCOVER_JOB, Arc::new(DiscoverHandler::new(context.clone())));
    consumer.register(FETCH_JOB, Arc::new(FetchHandler::new(context.clone())));
    consumer.register(RETRY_JOB, Arc::new(RetrySweepHandler::new(context)));

    tracing::info!(units = config.units.len(), "Crawler ready to process jobs");
    consumer.run().await
}
