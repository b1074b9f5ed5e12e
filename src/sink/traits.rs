//! Sink trait and error types

use crate::sink::{FetchedRecord, RetryEntry};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during sink operations
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Stored payload is not valid JSON: {0}")]
    BadPayload(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Trait for the persistence backend
///
/// All writes are upserts or increment-style updates that commute under
/// duplicate or reordered delivery, so at-least-once job execution needs no
/// cross-process locking.
pub trait Sink {
    // ===== Records =====

    /// Upserts a record keyed by (source_unit, id); latest payload wins
    fn upsert_record(&mut self, record: &FetchedRecord) -> SinkResult<()>;

    /// Fetches one stored record, if present
    fn get_record(&self, source_unit: &str, id: &str) -> SinkResult<Option<FetchedRecord>>;

    /// Total stored record count
    fn count_records(&self) -> SinkResult<u64>;

    /// Record count for one source unit
    fn count_records_for_unit(&self, source_unit: &str) -> SinkResult<u64>;

    /// Records collected within [from, to), used by reporting
    fn records_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SinkResult<Vec<FetchedRecord>>;

    /// Records that were never sampled for enrichment
    ///
    /// Matches only absent enrichment, not the NA sentinel: excluded and
    /// attempted-but-failed stay distinct in every read path.
    fn records_missing_enrichment(&self, limit: u32) -> SinkResult<Vec<FetchedRecord>>;

    // ===== Failed-fetch ledger =====

    /// Records a fetch failure, creating or updating the ledger entry
    ///
    /// `first_seen`, `source_unit`, and `parent_id` are fixed at insert;
    /// every failure increments `attempt_count` and overwrites
    /// `last_attempt`/`last_error`.
    fn record_fetch_failure(
        &mut self,
        item_id: &str,
        source_unit: &str,
        parent_id: Option<&str>,
        error: &str,
    ) -> SinkResult<()>;

    /// Ledger entries still eligible for re-drive, oldest attempt first
    ///
    /// Entries at or above `max_attempts` are excluded (frozen for triage).
    /// The page is bounded to keep one re-drive batch finite.
    fn list_retryable(&self, max_attempts: u32) -> SinkResult<Vec<RetryEntry>>;

    /// Removes a ledger entry after a successful fetch; idempotent
    fn clear_fetch_failure(&mut self, source_unit: &str, item_id: &str) -> SinkResult<()>;

    /// Count of ledger entries frozen at or above the attempt cap
    fn count_frozen_failures(&self, max_attempts: u32) -> SinkResult<u64>;

    /// Total failed-fetch ledger size
    fn count_fetch_failures(&self) -> SinkResult<u64>;

    // ===== Failed-enrichment ledger =====

    /// Records an exhausted enrichment attempt for triage
    fn record_enrichment_failure(
        &mut self,
        item_id: &str,
        source_unit: &str,
        error: &str,
    ) -> SinkResult<()>;

    /// Total failed-enrichment ledger size
    fn count_enrichment_failures(&self) -> SinkResult<u64>;
}
