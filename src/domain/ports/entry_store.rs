//! Entry Store Port
//!
//! Defines the interface of the collection-scoped document store that
//! backs the replication engine.

use crate::domain::errors::StoreError;
use crate::domain::filter::Filter;
use crate::domain::value_objects::{CollectionAddress, InsertOutcome};
use async_trait::async_trait;
use serde_json::Value;

/// Collection-scoped document store with a uniqueness constraint on the
/// entry identifier.
///
/// This is an outbound port. The collection address is the only
/// namespacing mechanism; adapters need not understand its structure.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Whether the adapter can currently serve requests.
    fn is_connected(&self) -> bool;

    /// Insert `document` unless `entry_id` already exists in `collection`.
    ///
    /// A uniqueness violation is reported as `InsertOutcome::AlreadyExists`,
    /// never as an error.
    async fn insert_unique(
        &self,
        collection: &CollectionAddress,
        entry_id: &str,
        document: &Value,
    ) -> Result<InsertOutcome, StoreError>;

    /// Documents of `collection` matching `filter`, in insertion order.
    /// Non-matching documents are skipped while reading; only matches are
    /// collected.
    async fn find(
        &self,
        collection: &CollectionAddress,
        filter: &Filter,
    ) -> Result<Vec<Value>, StoreError>;
}
