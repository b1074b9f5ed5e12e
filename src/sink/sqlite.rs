//! SQLite implementation of the Sink trait

use crate::enrich::EnrichmentResult;
use crate::sink::schema::initialize_schema;
use crate::sink::traits::{Sink, SinkResult};
use crate::sink::{FetchedRecord, RetryEntry};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// Page size for one re-drive batch
const RETRYABLE_PAGE_SIZE: u32 = 50;

/// SQLite storage backend for records and ledgers
pub struct SqliteSink {
    conn: Connection,
}

fn to_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl SqliteSink {
    /// Opens or creates a sink database at the given path
    pub fn new(path: &Path) -> SinkResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory sink (for testing)
    pub fn new_in_memory() -> SinkResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FetchedRecord> {
        let source_unit: String = row.get(0)?;
        let id: String = row.get(1)?;
        let parent_id: Option<String> = row.get(2)?;
        let payload: String = row.get(3)?;
        let collected_at: String = row.get(4)?;
        let class: Option<String> = row.get(5)?;
        let confidence: Option<f64> = row.get(6)?;
        let enriched_at: Option<String> = row.get(7)?;

        let enrichment = match (class, confidence, enriched_at) {
            (Some(class), Some(confidence), Some(at)) => Some(EnrichmentResult {
                class,
                confidence,
                processed_at: at
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
            }),
            _ => None,
        };

        Ok(FetchedRecord {
            id,
            source_unit,
            parent_id,
            payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            collected_at: collected_at
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now()),
            enrichment,
        })
    }

    fn query_records(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> SinkResult<Vec<FetchedRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::record_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

const RECORD_COLUMNS: &str = "source_unit, id, parent_id, payload, collected_at, \
     enrichment_class, enrichment_confidence, enrichment_at";

impl Sink for SqliteSink {
    // ===== Records =====

    fn upsert_record(&mut self, record: &FetchedRecord) -> SinkResult<()> {
        let (class, confidence, enriched_at) = match &record.enrichment {
            Some(e) => (
                Some(e.class.as_str()),
                Some(e.confidence),
                Some(to_ts(e.processed_at)),
            ),
            None => (None, None, None),
        };

        self.conn.execute(
            "INSERT INTO records (source_unit, id, parent_id, payload, collected_at,
                                  enrichment_class, enrichment_confidence, enrichment_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(source_unit, id) DO UPDATE SET
                 parent_id = excluded.parent_id,
                 payload = excluded.payload,
                 collected_at = excluded.collected_at,
                 enrichment_class = COALESCE(excluded.enrichment_class, enrichment_class),
                 enrichment_confidence = COALESCE(excluded.enrichment_confidence, enrichment_confidence),
                 enrichment_at = COALESCE(excluded.enrichment_at, enrichment_at)",
            params![
                record.source_unit,
                record.id,
                record.parent_id,
                record.payload.to_string(),
                to_ts(record.collected_at),
                class,
                confidence,
                enriched_at,
            ],
        )?;
        Ok(())
    }

    fn get_record(&self, source_unit: &str, id: &str) -> SinkResult<Option<FetchedRecord>> {
        let sql = format!(
            "SELECT {} FROM records WHERE source_unit = ?1 AND id = ?2",
            RECORD_COLUMNS
        );
        let record = self
            .conn
            .query_row(&sql, params![source_unit, id], Self::record_from_row)
            .optional()?;
        Ok(record)
    }

    fn count_records(&self) -> SinkResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_records_for_unit(&self, source_unit: &str) -> SinkResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE source_unit = ?1",
            params![source_unit],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn records_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SinkResult<Vec<FetchedRecord>> {
        let sql = format!(
            "SELECT {} FROM records
             WHERE collected_at >= ?1 AND collected_at < ?2
             ORDER BY collected_at ASC",
            RECORD_COLUMNS
        );
        self.query_records(&sql, params![to_ts(from), to_ts(to)])
    }

    fn records_missing_enrichment(&self, limit: u32) -> SinkResult<Vec<FetchedRecord>> {
        // NULL only: the NA sentinel means attempted, which is not missing
        let sql = format!(
            "SELECT {} FROM records
             WHERE enrichment_class IS NULL
             ORDER BY collected_at ASC
             LIMIT ?1",
            RECORD_COLUMNS
        );
        self.query_records(&sql, params![limit])
    }

    // ===== Failed-fetch ledger =====

    fn record_fetch_failure(
        &mut self,
        item_id: &str,
        source_unit: &str,
        parent_id: Option<&str>,
        error: &str,
    ) -> SinkResult<()> {
        let now = to_ts(Utc::now());
        self.conn.execute(
            "INSERT INTO failed_fetches
                 (source_unit, item_id, parent_id, attempt_count, last_attempt, last_error, first_seen)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?4)
             ON CONFLICT(source_unit, item_id) DO UPDATE SET
                 attempt_count = attempt_count + 1,
                 last_attempt = excluded.last_attempt,
                 last_error = excluded.last_error",
            params![source_unit, item_id, parent_id, now, error],
        )?;
        Ok(())
    }

    fn list_retryable(&self, max_attempts: u32) -> SinkResult<Vec<RetryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_unit, item_id, parent_id, attempt_count, last_attempt, last_error, first_seen
             FROM failed_fetches
             WHERE attempt_count < ?1
             ORDER BY last_attempt ASC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![max_attempts, RETRYABLE_PAGE_SIZE], |row| {
            Ok(RetryEntry {
                source_unit: row.get(0)?,
                item_id: row.get(1)?,
                parent_id: row.get(2)?,
                attempt_count: row.get(3)?,
                last_attempt: row.get(4)?,
                last_error: row.get(5)?,
                first_seen: row.get(6)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn clear_fetch_failure(&mut self, source_unit: &str, item_id: &str) -> SinkResult<()> {
        self.conn.execute(
            "DELETE FROM failed_fetches WHERE source_unit = ?1 AND item_id = ?2",
            params![source_unit, item_id],
        )?;
        Ok(())
    }

    fn count_frozen_failures(&self, max_attempts: u32) -> SinkResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM failed_fetches WHERE attempt_count >= ?1",
            params![max_attempts],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_fetch_failures(&self) -> SinkResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM failed_fetches", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Failed-enrichment ledger =====

    fn record_enrichment_failure(
        &mut self,
        item_id: &str,
        source_unit: &str,
        error: &str,
    ) -> SinkResult<()> {
        let now = to_ts(Utc::now());
        self.conn.execute(
            "INSERT INTO failed_enrichments
                 (source_unit, item_id, attempt_count, last_attempt, last_error, first_seen)
             VALUES (?1, ?2, 1, ?3, ?4, ?3)
             ON CONFLICT(source_unit, item_id) DO UPDATE SET
                 attempt_count = attempt_count + 1,
                 last_attempt = excluded.last_attempt,
                 last_error = excluded.last_error",
            params![source_unit, item_id, now, error],
        )?;
        Ok(())
    }

    fn count_enrichment_failures(&self) -> SinkResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM failed_enrichments",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sink() -> SqliteSink {
        SqliteSink::new_in_memory().unwrap()
    }

    fn record(id: &str, text: &str) -> FetchedRecord {
        FetchedRecord::new(id, "memes", json!({ "id": id, "text": text }))
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut s = sink();
        s.upsert_record(&record("a", "first")).unwrap();
        s.upsert_record(&record("a", "second")).unwrap();

        assert_eq!(s.count_records().unwrap(), 1);
        let stored = s.get_record("memes", "a").unwrap().unwrap();
        assert_eq!(stored.payload["text"], "second");
    }

    #[test]
    fn test_same_id_different_unit_is_distinct() {
        let mut s = sink();
        s.upsert_record(&record("a", "x")).unwrap();
        s.upsert_record(&FetchedRecord::new("a", "rust", json!({})))
            .unwrap();

        assert_eq!(s.count_records().unwrap(), 2);
        assert_eq!(s.count_records_for_unit("memes").unwrap(), 1);
    }

    #[test]
    fn test_upsert_keeps_existing_enrichment() {
        let mut s = sink();

        let mut enriched = record("a", "text");
        enriched.enrichment = Some(EnrichmentResult {
            class: "normal".to_string(),
            confidence: 0.93,
            processed_at: Utc::now(),
        });
        s.upsert_record(&enriched).unwrap();

        // A redelivered fetch without a sampling hit must not erase the score
        s.upsert_record(&record("a", "text")).unwrap();

        let stored = s.get_record("memes", "a").unwrap().unwrap();
        let enrichment = stored.enrichment.unwrap();
        assert_eq!(enrichment.class, "normal");
        assert_eq!(enrichment.confidence, 0.93);
    }

    #[test]
    fn test_ledger_lifecycle() {
        let mut s = sink();

        // Failure then success leaves zero entries
        s.record_fetch_failure("a", "memes", None, "timeout").unwrap();
        assert_eq!(s.count_fetch_failures().unwrap(), 1);
        s.clear_fetch_failure("memes", "a").unwrap();
        assert_eq!(s.count_fetch_failures().unwrap(), 0);

        // Clearing again is idempotent
        s.clear_fetch_failure("memes", "a").unwrap();
        assert_eq!(s.count_fetch_failures().unwrap(), 0);
    }

    #[test]
    fn test_consecutive_failures_increment_one_entry() {
        let mut s = sink();
        for _ in 0..3 {
            s.record_fetch_failure("a", "memes", Some("p"), "HTTP 500")
                .unwrap();
        }

        assert_eq!(s.count_fetch_failures().unwrap(), 1);
        let entries = s.list_retryable(5).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempt_count, 3);
        assert_eq!(entries[0].parent_id.as_deref(), Some("p"));
    }

    #[test]
    fn test_first_seen_fixed_at_insert() {
        let mut s = sink();
        s.record_fetch_failure("a", "memes", None, "one").unwrap();
        let first = s.list_retryable(5).unwrap().remove(0);

        s.record_fetch_failure("a", "memes", None, "two").unwrap();
        let second = s.list_retryable(5).unwrap().remove(0);

        assert_eq!(first.first_seen, second.first_seen);
        assert_eq!(second.last_error, "two");
    }

    #[test]
    fn test_exhausted_entries_are_frozen() {
        let mut s = sink();
        for _ in 0..5 {
            s.record_fetch_failure("a", "memes", None, "err").unwrap();
        }

        // At the cap: excluded from re-drive but still present
        assert!(s.list_retryable(5).unwrap().is_empty());
        assert_eq!(s.count_fetch_failures().unwrap(), 1);
        assert_eq!(s.count_frozen_failures(5).unwrap(), 1);
    }

    #[test]
    fn test_list_retryable_is_bounded() {
        let mut s = sink();
        for i in 0..80 {
            s.record_fetch_failure(&format!("item{}", i), "memes", None, "err")
                .unwrap();
        }

        assert_eq!(s.list_retryable(5).unwrap().len(), 50);
    }

    #[test]
    fn test_records_in_range() {
        let mut s = sink();
        let mut old = record("old", "x");
        old.collected_at = "2026-01-01T00:00:00Z".parse().unwrap();
        let mut new = record("new", "y");
        new.collected_at = "2026-02-01T00:00:00Z".parse().unwrap();
        s.upsert_record(&old).unwrap();
        s.upsert_record(&new).unwrap();

        let found = s
            .records_in_range(
                "2026-01-15T00:00:00Z".parse().unwrap(),
                "2026-03-01T00:00:00Z".parse().unwrap(),
            )
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "new");
    }

    #[test]
    fn test_missing_enrichment_excludes_sentinel() {
        let mut s = sink();

        s.upsert_record(&record("plain", "x")).unwrap();

        let mut failed = record("failed", "y");
        failed.enrichment = Some(EnrichmentResult::not_usable());
        s.upsert_record(&failed).unwrap();

        let missing = s.records_missing_enrichment(10).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, "plain");
    }

    #[test]
    fn test_enrichment_failure_ledger() {
        let mut s = sink();
        s.record_enrichment_failure("a", "memes", "retries exhausted")
            .unwrap();
        s.record_enrichment_failure("a", "memes", "retries exhausted")
            .unwrap();
        assert_eq!(s.count_enrichment_failures().unwrap(), 1);
    }
}
