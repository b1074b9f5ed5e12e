//! Database schema definitions for the record store

/// SQL schema for the sink database
pub const SCHEMA_SQL: &str = r#"
-- Normalized fetched records, upserted by (source_unit, id).
-- Enrichment columns are NULL when the record was never sampled; the
-- NA/-1 sentinel row values mean classification was attempted and failed.
CREATE TABLE IF NOT EXISTS records (
    source_unit TEXT NOT NULL,
    id TEXT NOT NULL,
    parent_id TEXT,
    payload TEXT NOT NULL,
    collected_at TEXT NOT NULL,
    enrichment_class TEXT,
    enrichment_confidence REAL,
    enrichment_at TEXT,
    PRIMARY KEY (source_unit, id)
);

CREATE INDEX IF NOT EXISTS idx_records_collected_at ON records(collected_at);
CREATE INDEX IF NOT EXISTS idx_records_parent ON records(parent_id);

-- Retry ledger for failed fetches
CREATE TABLE IF NOT EXISTS failed_fetches (
    source_unit TEXT NOT NULL,
    item_id TEXT NOT NULL,
    parent_id TEXT,
    attempt_count INTEGER NOT NULL DEFAULT 1,
    last_attempt TEXT NOT NULL,
    last_error TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    PRIMARY KEY (source_unit, item_id)
);

CREATE INDEX IF NOT EXISTS idx_failed_fetches_attempts ON failed_fetches(attempt_count);

-- Exhausted enrichment calls, kept for manual triage
CREATE TABLE IF NOT EXISTS failed_enrichments (
    source_unit TEXT NOT NULL,
    item_id TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 1,
    last_attempt TEXT NOT NULL,
    last_error TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    PRIMARY KEY (source_unit, item_id)
);
"#;

/// Initializes the sink schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_initializes() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["records", "failed_fetches", "failed_enrichments"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }
}
