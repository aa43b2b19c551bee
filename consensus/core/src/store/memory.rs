//! In-memory run store

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{sort_summaries, RunStore, StoreError};
use crate::model::{RunId, RunRecord, RunSummary};

/// Run store keeping records in a concurrent map
///
/// Records live as long as the store. Used by tests and by runs that are
/// not meant to be persisted.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    records: DashMap<RunId, RunRecord>,
}

impl MemoryRunStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of saved records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if nothing has been saved
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save(&self, record: &RunRecord) -> Result<RunId, StoreError> {
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(record.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record.id.clone())
            }
        }
    }

    async fn get(&self, id: &RunId) -> Result<RunRecord, StoreError> {
        self.records
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn list(&self) -> Result<Vec<RunSummary>, StoreError> {
        let mut summaries: Vec<_> = self.records.iter().map(|r| r.value().summary()).collect();
        sort_summaries(&mut summaries);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Document;
    use chrono::Utc;

    fn record(id: &str) -> RunRecord {
        RunRecord {
            id: RunId::from(id),
            created_at: Utc::now(),
            label: None,
            input: Document::new("memo"),
            results: Vec::new(),
            consolidation_model: None,
            consolidated: None,
            consolidation_error: None,
            consolidation_latency: None,
        }
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryRunStore::new();
        let saved = record("a");
        store.save(&saved).await.unwrap();

        assert_eq!(store.get(&RunId::from("a")).await.unwrap(), saved);
        assert!(matches!(
            store.save(&saved).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.get(&RunId::from("b")).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
