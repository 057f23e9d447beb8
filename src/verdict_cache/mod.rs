//! Persistent verdict cache
//!
//! One record per content ID, written as whole-row upserts. The pipeline only
//! talks to [`CacheStore`]; each backend expresses the upsert with its own
//! native conflict clause, parameter style and timestamp type.

pub mod memory;
pub mod postgres;
pub mod record;
pub mod sqlite;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use record::{ScanStage, VerdictRecord};
pub use sqlite::SqliteStore;

use crate::content_id::ContentId;
use crate::error::StoreError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

/// Storage interface for verdict records
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Look up the record for a content ID. No side effects.
    async fn get(&self, id: &ContentId) -> Result<Option<VerdictRecord>, StoreError>;

    /// Insert or fully replace the record keyed by `record.content_id`
    async fn upsert(&self, record: &VerdictRecord) -> Result<(), StoreError>;

    /// Remove the record; absent records are not an error
    async fn delete(&self, id: &ContentId) -> Result<(), StoreError>;

    /// All records, most recently scanned first
    async fn list(&self) -> Result<Vec<VerdictRecord>, StoreError>;

    /// Delete every safe verdict, returning how many were removed
    async fn purge_safe(&self) -> Result<u64, StoreError>;

    /// Timestamp used for `scanned_at` on new writes
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Parsed store location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUrl {
    Sqlite(PathBuf),
    Postgres(String),
    Memory,
}

impl StoreUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("sqlite:") {
            let path = rest.trim_start_matches("//").trim();
            if path.is_empty() {
                anyhow::bail!("sqlite URL missing path: {raw}");
            }
            return Ok(Self::Sqlite(PathBuf::from(path)));
        }
        if raw.starts_with("postgres://") || raw.starts_with("postgresql://") {
            return Ok(Self::Postgres(raw.to_string()));
        }
        if raw == "memory:" || raw == "memory" {
            return Ok(Self::Memory);
        }
        anyhow::bail!("Unsupported store URL: {raw}")
    }
}

/// Open the backend named by `url`
pub async fn open_store(url: &StoreUrl) -> Result<Arc<dyn CacheStore>> {
    match url {
        StoreUrl::Sqlite(path) => {
            let path = path.clone();
            let store = tokio::task::spawn_blocking(move || SqliteStore::open(&path))
                .await
                .context("sqlite open task panicked")??;
            Ok(Arc::new(store))
        }
        StoreUrl::Postgres(conn) => {
            let store = PgStore::connect(conn)
                .await
                .context("Failed to connect to postgres verdict store")?;
            Ok(Arc::new(store))
        }
        StoreUrl::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_store_urls() {
        assert_eq!(
            StoreUrl::parse("sqlite:/tmp/v.db").unwrap(),
            StoreUrl::Sqlite(PathBuf::from("/tmp/v.db"))
        );
        assert_eq!(
            StoreUrl::parse("sqlite:///tmp/v.db").unwrap(),
            StoreUrl::Sqlite(PathBuf::from("/tmp/v.db"))
        );
        assert!(matches!(
            StoreUrl::parse("postgresql://u@h/db").unwrap(),
            StoreUrl::Postgres(_)
        ));
        assert_eq!(StoreUrl::parse("memory:").unwrap(), StoreUrl::Memory);
        assert!(StoreUrl::parse("sqlite:").is_err());
        assert!(StoreUrl::parse("mysql://h/db").is_err());
    }

    #[tokio::test]
    async fn test_open_sqlite_store_from_url() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = StoreUrl::Sqlite(dir.path().join("nested").join("verdicts.db"));
        let store = open_store(&url).await.unwrap();
        assert_eq!(store.backend(), "sqlite");
        let id = ContentId::parse("abc12345678").unwrap();
        assert!(store.get(&id).await.unwrap().is_none());
    }
}
