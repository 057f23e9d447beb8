//! Postgres backend for the verdict cache
//!
//! Newtype over a `PgPool`. Queries are runtime-checked (`sqlx::query`, not
//! `sqlx::query!`) so building the crate never needs a live database.

use crate::content_id::ContentId;
use crate::error::StoreError;
use crate::verdict_cache::record::{RawRecord, VerdictRecord};
use crate::verdict_cache::CacheStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_CONNECTIONS: u32 = 5;

pub(crate) const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS verdicts (
        content_id TEXT PRIMARY KEY,
        title TEXT,
        safe BOOLEAN NOT NULL,
        reasons TEXT NOT NULL,
        scanned_at TIMESTAMPTZ NOT NULL,
        scan_stage TEXT NOT NULL
    )
"#;

pub(crate) const SELECT_ONE_SQL: &str = r#"
    SELECT content_id, title, safe, reasons, scanned_at, scan_stage
    FROM verdicts
    WHERE content_id = $1
"#;

pub(crate) const SELECT_ALL_SQL: &str = r#"
    SELECT content_id, title, safe, reasons, scanned_at, scan_stage
    FROM verdicts
    ORDER BY scanned_at DESC, content_id
"#;

pub(crate) const UPSERT_SQL: &str = r#"
    INSERT INTO verdicts (content_id, title, safe, reasons, scanned_at, scan_stage)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (content_id) DO UPDATE SET
        title = EXCLUDED.title,
        safe = EXCLUDED.safe,
        reasons = EXCLUDED.reasons,
        scanned_at = EXCLUDED.scanned_at,
        scan_stage = EXCLUDED.scan_stage
"#;

type PgVerdictRow = (String, Option<String>, bool, String, DateTime<Utc>, String);

fn raw_from_row(row: PgVerdictRow) -> RawRecord {
    let (content_id, title, safe, reasons, scanned_at, scan_stage) = row;
    RawRecord {
        content_id,
        title,
        safe,
        reasons,
        scanned_at: Ok(scanned_at),
        scan_stage,
    }
}

/// Networked relational verdict store
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the table exists
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;
        let store = Self::new(pool);
        store.init_schema().await?;
        debug!("postgres verdict store ready");
        Ok(store)
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CacheStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn get(&self, id: &ContentId) -> Result<Option<VerdictRecord>, StoreError> {
        let row = sqlx::query_as::<_, PgVerdictRow>(SELECT_ONE_SQL)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| raw_from_row(r).decode()).transpose()
    }

    async fn upsert(&self, record: &VerdictRecord) -> Result<(), StoreError> {
        sqlx::query(UPSERT_SQL)
            .bind(record.content_id.as_str())
            .bind(record.title.as_deref())
            .bind(record.safe)
            .bind(record.reasons_json())
            .bind(record.scanned_at)
            .bind(record.scan_stage.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &ContentId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM verdicts WHERE content_id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<VerdictRecord>, StoreError> {
        let rows = sqlx::query_as::<_, PgVerdictRow>(SELECT_ALL_SQL)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match raw_from_row(row).decode() {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping unreadable cache row: {}", e),
            }
        }
        Ok(records)
    }

    async fn purge_safe(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM verdicts WHERE safe = TRUE")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholders(sql: &str) -> Vec<usize> {
        let mut found = Vec::new();
        let bytes = sql.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' {
                let digits: String = sql[i + 1..]
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                if let Ok(n) = digits.parse() {
                    found.push(n);
                }
            }
            i += 1;
        }
        found
    }

    #[test]
    fn test_upsert_uses_native_conflict_clause() {
        assert!(UPSERT_SQL.contains("ON CONFLICT (content_id) DO UPDATE SET"));
        assert!(!UPSERT_SQL.contains('?'));
        assert!(!UPSERT_SQL.contains("datetime('now')"));
        assert_eq!(placeholders(UPSERT_SQL), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_upsert_replaces_every_non_key_column() {
        for column in ["title", "safe", "reasons", "scanned_at", "scan_stage"] {
            let assignment = format!("{} = EXCLUDED.{}", column, column);
            assert!(UPSERT_SQL.contains(&assignment), "missing {}", assignment);
        }
        assert!(!UPSERT_SQL.contains("content_id = EXCLUDED"));
    }

    #[test]
    fn test_row_conversion_keeps_columns() {
        let now = Utc::now();
        let raw = raw_from_row((
            "abc12345678".to_string(),
            None,
            true,
            "[]".to_string(),
            now,
            "quick".to_string(),
        ));
        let record = raw.decode().unwrap();
        assert_eq!(record.scanned_at, now);
        assert!(record.safe);
        assert_eq!(record.scan_stage.as_str(), "quick");
    }
}
