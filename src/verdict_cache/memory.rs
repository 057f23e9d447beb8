//! In-process verdict store

use crate::content_id::ContentId;
use crate::error::StoreError;
use crate::verdict_cache::record::VerdictRecord;
use crate::verdict_cache::CacheStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Verdict store that lives and dies with the process
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<ContentId, VerdictRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, id: &ContentId) -> Result<Option<VerdictRecord>, StoreError> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn upsert(&self, record: &VerdictRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .insert(record.content_id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &ContentId) -> Result<(), StoreError> {
        self.records.write().remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<VerdictRecord>, StoreError> {
        let mut records: Vec<VerdictRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| {
            b.scanned_at
                .cmp(&a.scanned_at)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });
        Ok(records)
    }

    async fn purge_safe(&self) -> Result<u64, StoreError> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| !record.safe);
        Ok((before - records.len()) as u64)
    }
}
