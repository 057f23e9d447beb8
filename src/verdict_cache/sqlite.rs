//! SQLite backend for the verdict cache

use crate::content_id::ContentId;
use crate::error::StoreError;
use crate::verdict_cache::record::{RawRecord, VerdictRecord};
use crate::verdict_cache::CacheStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SCHEMA_VERSION: i32 = 1;

const SELECT_COLUMNS: &str =
    "SELECT content_id, title, safe, reasons, scanned_at, scan_stage FROM verdicts";

const UPSERT_SQL: &str = "INSERT INTO verdicts (content_id, title, safe, reasons, scanned_at, scan_stage)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     ON CONFLICT(content_id) DO UPDATE SET
        title = excluded.title,
        safe = excluded.safe,
        reasons = excluded.reasons,
        scanned_at = excluded.scanned_at,
        scan_stage = excluded.scan_stage";

/// Embedded single-file verdict store
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create the database at `db_path`
    ///
    /// A file whose schema cannot be initialized is backed up and recreated.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create cache directory: {}", parent.display())
                })?;
            }
        }

        let store = match Self::open_file(db_path) {
            Ok(store) => store,
            Err(e) => {
                warn!(
                    "failed to initialize verdict cache at {}: {:#}; attempting recovery",
                    db_path.display(),
                    e
                );

                let backup_path = db_path.with_extension("db.backup");
                let _ = std::fs::copy(db_path, &backup_path);
                let _ = std::fs::remove_file(db_path);

                Self::open_file(db_path)
                    .with_context(|| "Failed to initialize schema after recovery")?
            }
        };

        debug!("verdict cache opened at {}", db_path.display());
        Ok(store)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let mut store = Self {
            db: Arc::new(Mutex::new(db)),
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn open_file(db_path: &Path) -> Result<Self> {
        let db = Self::connect(db_path)?;
        let mut store = Self {
            db: Arc::new(Mutex::new(db)),
            path: Some(db_path.to_path_buf()),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn connect(db_path: &Path) -> Result<Connection> {
        let db = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        // WAL lets readers proceed while the pipeline writes
        db.pragma_update(None, "journal_mode", "WAL")
            .with_context(|| "Failed to enable WAL mode")?;
        db.busy_timeout(Duration::from_secs(30))
            .with_context(|| "Failed to set busy timeout")?;
        Ok(db)
    }

    fn init_schema(&mut self) -> Result<()> {
        let mut db = self.db.lock();

        let version: i32 = db
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .or_else(|_| {
                db.execute(
                    "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
                    [],
                )?;
                db.execute("INSERT INTO schema_version (version) VALUES (0)", [])?;
                Ok::<i32, rusqlite::Error>(0)
            })?;

        if version < SCHEMA_VERSION {
            migrate_schema(&mut db, version)?;
        }
        Ok(())
    }

    /// Run a blocking closure against the connection off the async runtime
    async fn with_db<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock();
            f(&mut *conn)
        })
        .await?
    }
}

fn migrate_schema(db: &mut Connection, from_version: i32) -> Result<()> {
    let tx = db
        .transaction()
        .with_context(|| "Failed to start migration transaction")?;

    if from_version == 0 {
        tx.execute(
            "CREATE TABLE IF NOT EXISTS verdicts (
                content_id TEXT PRIMARY KEY,
                title TEXT,
                safe INTEGER NOT NULL,
                reasons TEXT NOT NULL,
                scanned_at TEXT NOT NULL,
                scan_stage TEXT NOT NULL
            )",
            [],
        )
        .with_context(|| "Failed to create verdicts table")?;

        tx.execute(
            "CREATE INDEX IF NOT EXISTS idx_verdicts_scanned_at ON verdicts(scanned_at)",
            [],
        )
        .with_context(|| "Failed to create scanned_at index")?;

        tx.execute("UPDATE schema_version SET version = ?1", [SCHEMA_VERSION])
            .with_context(|| "Failed to update schema version")?;
    }

    tx.commit()
        .with_context(|| "Failed to commit migration transaction")?;
    Ok(())
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("{:?}: {}", raw, e))
}

fn raw_from_row(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    let scanned_at: String = row.get(4)?;
    Ok(RawRecord {
        content_id: row.get(0)?,
        title: row.get(1)?,
        safe: row.get::<_, i64>(2)? != 0,
        reasons: row.get(3)?,
        scanned_at: parse_timestamp(&scanned_at),
        scan_stage: row.get(5)?,
    })
}

#[async_trait]
impl CacheStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, id: &ContentId) -> Result<Option<VerdictRecord>, StoreError> {
        let key = id.to_string();
        self.with_db(move |db| {
            let raw = db
                .query_row(
                    &format!("{} WHERE content_id = ?1", SELECT_COLUMNS),
                    [&key],
                    raw_from_row,
                )
                .optional()?;
            raw.map(RawRecord::decode).transpose()
        })
        .await
    }

    async fn upsert(&self, record: &VerdictRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_db(move |db| {
            db.execute(
                UPSERT_SQL,
                params![
                    record.content_id.as_str(),
                    record.title,
                    record.safe as i64,
                    record.reasons_json(),
                    format_timestamp(&record.scanned_at),
                    record.scan_stage.as_str(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &ContentId) -> Result<(), StoreError> {
        let key = id.to_string();
        self.with_db(move |db| {
            db.execute("DELETE FROM verdicts WHERE content_id = ?1", [&key])?;
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<VerdictRecord>, StoreError> {
        self.with_db(|db| {
            let mut stmt = db.prepare(&format!(
                "{} ORDER BY scanned_at DESC, content_id",
                SELECT_COLUMNS
            ))?;
            let rows = stmt.query_map([], raw_from_row)?;

            let mut records = Vec::new();
            for row in rows {
                match row?.decode() {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("skipping unreadable cache row: {}", e),
                }
            }
            Ok(records)
        })
        .await
    }

    async fn purge_safe(&self) -> Result<u64, StoreError> {
        self.with_db(|db| {
            let removed = db.execute("DELETE FROM verdicts WHERE safe = 1", [])?;
            Ok(removed as u64)
        })
        .await
    }
}
