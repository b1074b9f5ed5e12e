//! Job handlers for discovery, fetching, and ledger re-drive

use crate::config::Config;
use crate::discover::{diff, ContainerSnapshot};
use crate::enrich::Sampler;
use crate::queue::{Job, JobHandler, QueueError, SqliteQueue};
use crate::sink::{Sink, SqliteSink};
use crate::source::SourceClient;
use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Job type names, one registered handler each
pub const DISCOVER_JOB: &str = "discover-unit";
pub const FETCH_JOB: &str = "fetch-item";
pub const RETRY_JOB: &str = "retry-sweep";

/// Named queues, consumed in this priority order
pub const QUEUE_DISCOVER: &str = "discover";
pub const QUEUE_FETCH: &str = "fetch";
pub const QUEUE_RETRY: &str = "retry";

/// Fetch jobs enqueued per bulk push
const FETCH_BATCH_SIZE: usize = 50;

/// Reschedule delay after a tick that collected nothing
const EMPTY_LISTING_RETRY_MINUTES: i64 = 5;

/// Reschedule delay after a tick or sweep that errored
const FAILED_TICK_BACKOFF_MINUTES: i64 = 15;

/// Shared wiring handed to every job handler
///
/// The queue and sink are the only cross-slot state; source client
/// sessions are constructed per job so authentication state never crosses
/// a concurrency boundary.
#[derive(Clone)]
pub struct CrawlContext {
    config: Arc<Config>,
    queue: Arc<Mutex<SqliteQueue>>,
    sink: Arc<Mutex<SqliteSink>>,
    http: reqwest::Client,
    sampler: Arc<Sampler>,
}

impl CrawlContext {
    pub fn new(
        config: Arc<Config>,
        queue: Arc<Mutex<SqliteQueue>>,
        sink: Arc<Mutex<SqliteSink>>,
    ) -> crate::Result<Self> {
        let http = crate::source::build_http_client(&config.source)?;
        let sampler = Arc::new(Sampler::new(config.enrichment.clone())?);
        Ok(Self {
            config,
            queue,
            sink,
            http,
            sampler,
        })
    }

    /// A fresh source session for one job
    fn source_client(&self) -> SourceClient {
        SourceClient::with_http(
            self.http.clone(),
            self.config.source.clone(),
            self.config.crawl.rate_limit_buffer,
        )
    }

    fn push_bulk(&self, jobs: &[Job]) -> anyhow::Result<()> {
        self.queue
            .lock()
            .map_err(|_| QueueError::Poisoned)?
            .push_bulk(jobs)?;
        Ok(())
    }

    fn push_scheduled(&self, job: &Job, at: chrono::DateTime<Utc>) -> anyhow::Result<()> {
        self.queue
            .lock()
            .map_err(|_| QueueError::Poisoned)?
            .push_scheduled(job, at)?;
        Ok(())
    }

    /// Schedules the next discovery tick for a unit
    ///
    /// The snapshot rides in the job arguments; that hand-off is the only
    /// place snapshot state lives between ticks.
    fn schedule_discover(
        &self,
        unit: &str,
        snapshot_ids: &[String],
        delay_minutes: i64,
    ) -> anyhow::Result<()> {
        let run_at = Utc::now() + ChronoDuration::minutes(delay_minutes);
        self.push_scheduled(
            &Job::new(DISCOVER_JOB, json!([unit, snapshot_ids]), QUEUE_DISCOVER),
            run_at,
        )?;
        tracing::info!(unit, %run_at, "Scheduled next discovery tick");
        Ok(())
    }

    /// Schedules the next ledger sweep
    fn schedule_retry_sweep(&self, delay_minutes: i64) -> anyhow::Result<()> {
        let run_at = Utc::now() + ChronoDuration::minutes(delay_minutes);
        self.push_scheduled(&Job::new(RETRY_JOB, json!([]), QUEUE_RETRY), run_at)?;
        tracing::info!(%run_at, "Scheduled next retry sweep");
        Ok(())
    }
}

/// Pushes the cold-start jobs: one immediate discovery per configured unit
/// plus the first ledger sweep
pub fn seed_jobs(queue: &mut SqliteQueue, config: &Config) -> crate::Result<()> {
    for unit in &config.units {
        queue.push(&Job::new(
            DISCOVER_JOB,
            json!([unit, Vec::<String>::new()]),
            QUEUE_DISCOVER,
        ))?;
        tracing::info!(unit = unit.as_str(), "Enqueued discovery job");
    }

    let first_sweep = Utc::now()
        + ChronoDuration::minutes(config.crawl.retry_interval_minutes as i64);
    queue.push_scheduled(&Job::new(RETRY_JOB, json!([]), QUEUE_RETRY), first_sweep)?;

    Ok(())
}

/// Fetches one leaf item, samples enrichment, and persists every record
///
/// This is the single fetch path used by both fresh fetch jobs and ledger
/// re-drives. Zero fetched or zero stored records is a business failure
/// the caller escalates to the ledger.
async fn fetch_and_store(ctx: &CrawlContext, unit: &str, item_id: &str) -> anyhow::Result<usize> {
    let mut client = ctx.source_client();
    let mut records = client
        .fetch_item(unit, item_id)
        .await
        .with_context(|| format!("fetching {}/{}", unit, item_id))?;

    if records.is_empty() {
        anyhow::bail!("fetched 0 records for {}/{}", unit, item_id);
    }

    let total = records.len();
    let mut stored = 0;

    for record in records.iter_mut() {
        if let Some(text) = record.payload.get("text").and_then(|t| t.as_str()) {
            if let Some(result) = ctx.sampler.maybe_score(text).await {
                // Only exhausted calls are triaged; empty text is unscorable
                if result.is_sentinel() && !crate::enrich::normalize_text(text).is_empty() {
                    let outcome = ctx
                        .sink
                        .lock()
                        .map_err(|_| anyhow::anyhow!("sink lock poisoned"))?
                        .record_enrichment_failure(
                            &record.id,
                            unit,
                            "classification retries exhausted",
                        );
                    if let Err(e) = outcome {
                        tracing::error!(item_id = %record.id, unit, "Enrichment ledger write failed: {}", e);
                    }
                }
                record.enrichment = Some(result);
            }
        }

        let upserted = ctx
            .sink
            .lock()
            .map_err(|_| anyhow::anyhow!("sink lock poisoned"))?
            .upsert_record(record);

        match upserted {
            Ok(()) => stored += 1,
            Err(e) => {
                // Partial-item failure: siblings in the same batch continue
                tracing::error!(item_id = %record.id, unit, "Failed to store record: {}", e);
            }
        }
    }

    if stored == 0 {
        anyhow::bail!("stored 0 of {} records for {}/{}", total, unit, item_id);
    }

    tracing::info!(unit, item_id, stored, "Persisted item records");
    Ok(stored)
}

/// Handles `discover-unit` jobs: snapshot, diff, enqueue, reschedule
pub struct DiscoverHandler {
    ctx: CrawlContext,
}

impl DiscoverHandler {
    pub fn new(ctx: CrawlContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for DiscoverHandler {
    async fn handle(&self, args: serde_json::Value) -> anyhow::Result<()> {
        let (unit, previous_ids): (String, Vec<String>) =
            serde_json::from_value(args).context("discover-unit arguments")?;

        let mut client = self.ctx.source_client();
        let current = match client
            .fetch_listing(&unit, self.ctx.config.crawl.post_limit)
            .await
        {
            Ok(ids) if ids.is_empty() => {
                // Suspicious tick: keep the baseline rather than declaring
                // the whole container dead, and retry sooner
                tracing::warn!(unit = %unit, "Listing came back empty, keeping previous snapshot");
                self.ctx
                    .schedule_discover(&unit, &previous_ids, EMPTY_LISTING_RETRY_MINUTES)?;
                return Ok(());
            }
            Ok(ids) => ContainerSnapshot::new(unit.as_str(), ids),
            Err(e) => {
                // The reschedule is the catch-all: one bad tick must never
                // end the recurring cycle
                tracing::error!(unit = %unit, "Discovery tick failed: {}", e);
                self.ctx
                    .schedule_discover(&unit, &previous_ids, FAILED_TICK_BACKOFF_MINUTES)?;
                return Ok(());
            }
        };

        let previous: HashSet<&str> = previous_ids.iter().map(String::as_str).collect();
        let mut dead: Vec<&str> = diff(&previous, &current.id_set()).into_iter().collect();
        dead.sort_unstable();

        tracing::info!(
            unit = %unit,
            current = current.len(),
            dead = dead.len(),
            "Discovery tick complete"
        );

        let fetch_jobs: Vec<Job> = dead
            .iter()
            .map(|id| Job::new(FETCH_JOB, json!([unit, id]), QUEUE_FETCH))
            .collect();
        for batch in fetch_jobs.chunks(FETCH_BATCH_SIZE) {
            self.ctx.push_bulk(batch)?;
            tracing::info!(unit = %unit, enqueued = batch.len(), "Enqueued fetch jobs");
        }

        self.ctx.schedule_discover(
            &unit,
            &current.item_ids,
            self.ctx.config.crawl.discovery_interval_minutes as i64,
        )?;
        Ok(())
    }
}

/// Handles `fetch-item` jobs: fetch, enrich, persist, settle the ledger
pub struct FetchHandler {
    ctx: CrawlContext,
}

impl FetchHandler {
    pub fn new(ctx: CrawlContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for FetchHandler {
    async fn handle(&self, args: serde_json::Value) -> anyhow::Result<()> {
        let (unit, item_id): (String, String) =
            serde_json::from_value(args).context("fetch-item arguments")?;

        match fetch_and_store(&self.ctx, &unit, &item_id).await {
            Ok(_) => {
                // Success clears any earlier failure for this item
                self.ctx
                    .sink
                    .lock()
                    .map_err(|_| anyhow::anyhow!("sink lock poisoned"))?
                    .clear_fetch_failure(&unit, &item_id)?;
            }
            Err(e) => {
                tracing::error!(unit = %unit, item_id = %item_id, "Fetch failed, adding to retry ledger: {:#}", e);
                self.ctx
                    .sink
                    .lock()
                    .map_err(|_| anyhow::anyhow!("sink lock poisoned"))?
                    .record_fetch_failure(&item_id, &unit, None, &format!("{:#}", e))?;
            }
        }

        // The ledger owns fetch retries; the job itself always completes
        Ok(())
    }
}

/// Handles `retry-sweep` jobs: re-drive the ledger, then reschedule
pub struct RetrySweepHandler {
    ctx: CrawlContext,
}

impl RetrySweepHandler {
    pub fn new(ctx: CrawlContext) -> Self {
        Self { ctx }
    }

    async fn sweep(&self) -> anyhow::Result<()> {
        let entries = self
            .ctx
            .sink
            .lock()
            .map_err(|_| anyhow::anyhow!("sink lock poisoned"))?
            .list_retryable(self.ctx.config.crawl.max_retry_attempts)?;

        if entries.is_empty() {
            tracing::debug!("Retry ledger has no eligible entries");
            return Ok(());
        }

        tracing::info!(count = entries.len(), "Re-driving failed items");

        for entry in entries {
            match fetch_and_store(&self.ctx, &entry.source_unit, &entry.item_id).await {
                Ok(_) => {
                    self.ctx
                        .sink
                        .lock()
                        .map_err(|_| anyhow::anyhow!("sink lock poisoned"))?
                        .clear_fetch_failure(&entry.source_unit, &entry.item_id)?;
                    tracing::info!(
                        unit = %entry.source_unit,
                        item_id = %entry.item_id,
                        "Recovered previously failed item"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        unit = %entry.source_unit,
                        item_id = %entry.item_id,
                        attempts = entry.attempt_count,
                        "Re-drive attempt failed: {:#}",
                        e
                    );
                    self.ctx
                        .sink
                        .lock()
                        .map_err(|_| anyhow::anyhow!("sink lock poisoned"))?
                        .record_fetch_failure(
                            &entry.item_id,
                            &entry.source_unit,
                            entry.parent_id.as_deref(),
                            &format!("{:#}", e),
                        )?;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl JobHandler for RetrySweepHandler {
    async fn handle(&self, _args: serde_json::Value) -> anyhow::Result<()> {
        let delay = match self.sweep().await {
            Ok(()) => self.ctx.config.crawl.retry_interval_minutes as i64,
            Err(e) => {
                tracing::error!("Retry sweep failed: {:#}", e);
                FAILED_TICK_BACKOFF_MINUTES
            }
        };

        // Self-reschedule runs regardless of sweep outcome
        self.ctx.schedule_retry_sweep(delay)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::sample_config;

    #[test]
    fn test_seed_jobs_enqueues_per_unit() {
        let mut config = sample_config();
        config.units = vec!["memes".to_string(), "rust".to_string()];
        let mut queue = SqliteQueue::new_in_memory().unwrap();

        seed_jobs(&mut queue, &config).unwrap();

        assert_eq!(queue.pending_count(QUEUE_DISCOVER).unwrap(), 2);
        assert_eq!(queue.pending_count(QUEUE_RETRY).unwrap(), 1);

        let discovers = queue.pending(QUEUE_DISCOVER).unwrap();
        assert_eq!(discovers[0].job_type, DISCOVER_JOB);
        // Cold start carries an empty previous snapshot
        assert_eq!(discovers[0].args, json!(["memes", []]));
    }

    #[test]
    fn test_discover_args_round_trip() {
        let args = json!(["memes", ["a", "b"]]);
        let (unit, previous): (String, Vec<String>) = serde_json::from_value(args).unwrap();
        assert_eq!(unit, "memes");
        assert_eq!(previous, vec!["a", "b"]);
    }

    #[test]
    fn test_fetch_args_round_trip() {
        let args = json!(["memes", "t3_abc"]);
        let (unit, item_id): (String, String) = serde_json::from_value(args).unwrap();
        assert_eq!(unit, "memes");
        assert_eq!(item_id, "t3_abc");
    }
}
