//! DashMap Entry Store
//!
//! In-memory EntryStore. Each collection is a DashMap shard entry, so the
//! uniqueness check and the insert happen under the same shard lock.

use crate::domain::errors::StoreError;
use crate::domain::filter::Filter;
use crate::domain::ports::EntryStore;
use crate::domain::value_objects::{CollectionAddress, InsertOutcome};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct StoredEntry {
    id: String,
    entry_id: String,
    document: Value,
}

/// DashMap-backed entry store. Contents are lost on restart.
pub struct DashMapEntryStore {
    collections: Arc<DashMap<String, Vec<StoredEntry>>>,
    connected: AtomicBool,
}

impl DashMapEntryStore {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(DashMap::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Mark the store available or unavailable.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Number of entries stored under `collection`.
    pub fn len(&self, collection: &CollectionAddress) -> usize {
        self.collections
            .get(collection.as_str())
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// Whether `entry_id` is stored under `collection`.
    pub fn contains(&self, collection: &CollectionAddress, entry_id: &str) -> bool {
        self.collections
            .get(collection.as_str())
            .map(|docs| docs.iter().any(|d| d.entry_id == entry_id))
            .unwrap_or(false)
    }
}

impl Default for DashMapEntryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntryStore for DashMapEntryStore {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn insert_unique(
        &self,
        collection: &CollectionAddress,
        entry_id: &str,
        document: &Value,
    ) -> Result<InsertOutcome, StoreError> {
        if !self.is_connected() {
            return Err(StoreError::NotConnected);
        }

        let mut docs = self
            .collections
            .entry(collection.as_str().to_string())
            .or_default();
        if docs.iter().any(|d| d.entry_id == entry_id) {
            return Ok(InsertOutcome::AlreadyExists);
        }

        let id = uuid::Uuid::new_v4().to_string();
        docs.push(StoredEntry {
            id: id.clone(),
            entry_id: entry_id.to_string(),
            document: document.clone(),
        });
        Ok(InsertOutcome::Inserted { inserted_id: id })
    }

    async fn find(
        &self,
        collection: &CollectionAddress,
        filter: &Filter,
    ) -> Result<Vec<Value>, StoreError> {
        if !self.is_connected() {
            return Err(StoreError::NotConnected);
        }
        filter.validate()?;

        let Some(docs) = self.collections.get(collection.as_str()) else {
            return Ok(Vec::new());
        };

        Ok(docs
            .iter()
            .map(|stored| {
                let mut document = stored.document.clone();
                if let Value::Object(map) = &mut document {
                    map.insert("_id".to_string(), Value::String(stored.id.clone()));
                }
                document
            })
            .filter(|document| filter.matches(document))
            .collect())
    }
}
