//! Persistence sink for fetched records and failure ledgers
//!
//! This module handles all record-store operations:
//! - Idempotent upsert of normalized records keyed by (source unit, id)
//! - The failed-fetch retry ledger feeding the periodic re-drive job
//! - The failed-enrichment ledger kept for manual triage
//! - Read paths used by re-drive and reporting (time ranges, missing-field)

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteSink;
pub use traits::{Sink, SinkError, SinkResult};

use crate::enrich::EnrichmentResult;
use chrono::{DateTime, Utc};

/// A normalized unit of persisted content
///
/// Uniquely identified by `id` within its source unit; storing the same
/// record twice overwrites the payload rather than duplicating it, which is
/// what makes redelivered fetch jobs safe.
#[derive(Debug, Clone)]
pub struct FetchedRecord {
    pub id: String,
    pub source_unit: String,
    pub parent_id: Option<String>,
    pub payload: serde_json::Value,
    pub collected_at: DateTime<Utc>,
    /// `None` when the record was not sampled for classification
    pub enrichment: Option<EnrichmentResult>,
}

impl FetchedRecord {
    pub fn new(
        id: impl Into<String>,
        source_unit: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            source_unit: source_unit.into(),
            parent_id: None,
            payload,
            collected_at: Utc::now(),
            enrichment: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// One entry in the failed-fetch retry ledger
///
/// An item id appears here iff its most recent fetch attempt failed.
/// Entries reaching the configured attempt cap are frozen in place for
/// manual triage instead of being deleted.
#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub item_id: String,
    pub source_unit: String,
    pub parent_id: Option<String>,
    pub attempt_count: u32,
    pub last_attempt: String,
    pub last_error: String,
    pub first_seen: String,
}
