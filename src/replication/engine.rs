//! Replication Engine
//!
//! Validates and applies signed inserts, then re-propagates first inserts to
//! peers not already known to hold the entry. Local writes and writes
//! received from peers go through the same `insert_one` path.

use crate::domain::entities::Entry;
use crate::domain::errors::{SignatureError, StoreError};
use crate::domain::filter::Filter;
use crate::domain::ports::EntryStore;
use crate::domain::services::signature::verify_entry;
use crate::domain::value_objects::{CollectionAddress, InsertOutcome};
use crate::replication::gossip::Propagator;
use crate::replication::types::{InsertOneMessage, ReplicationMessage};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Errors from the replication engine.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("storage adapter is not connected")]
    NotConnected,
    #[error("malformed entry: {0}")]
    MalformedEntry(String),
    #[error("no owner public key: none given and entryId has no key prefix")]
    MissingOwner,
    #[error("signature rejected: {0}")]
    SignatureInvalid(String),
    #[error("storage error: {0}")]
    Storage(#[source] StoreError),
    #[error("query failed: {0}")]
    QueryFailed(String),
}

impl From<SignatureError> for ReplicationError {
    fn from(e: SignatureError) -> Self {
        ReplicationError::SignatureInvalid(e.to_string())
    }
}

impl ReplicationError {
    /// Whether the entry itself was at fault, as opposed to this node.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ReplicationError::MalformedEntry(_)
                | ReplicationError::MissingOwner
                | ReplicationError::SignatureInvalid(_)
        )
    }
}

/// Documents returned by `find`.
///
/// The storage adapter filters while it reads and the matches are buffered
/// before `find` returns, so the result is a snapshot: inserts made while
/// the caller iterates are not seen. Each `find` call starts a fresh walk.
#[derive(Debug)]
pub struct Entries {
    inner: std::vec::IntoIter<Value>,
}

impl Entries {
    fn new(documents: Vec<Value>) -> Self {
        Self {
            inner: documents.into_iter(),
        }
    }
}

impl Iterator for Entries {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Entries {}

/// Key that must have signed `entry`: the explicit owner if given, else the
/// hex prefix of its `entryId`.
pub fn resolve_owner<'a>(
    owner_public_key: Option<&'a str>,
    entry: &'a Entry,
) -> Result<&'a str, ReplicationError> {
    owner_public_key
        .or_else(|| entry.owner_prefix())
        .ok_or(ReplicationError::MissingOwner)
}

/// Exclusion set carried by a propagated message: every address that holds
/// the entry or is about to receive it from this node.
pub fn next_exclusion<'a, I>(received: &[String], self_address: &str, connected: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut next: BTreeSet<String> = received.iter().cloned().collect();
    next.insert(self_address.to_string());
    next.extend(connected.into_iter().cloned());
    next
}

/// The replication engine.
pub struct ReplicationEngine {
    store: Arc<dyn EntryStore>,
    propagator: Arc<dyn Propagator>,
}

impl ReplicationEngine {
    pub fn new(store: Arc<dyn EntryStore>, propagator: Arc<dyn Propagator>) -> Self {
        Self { store, propagator }
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    /// Validate, store and propagate one signed entry.
    ///
    /// `exclude_addresses` lists peers already known to hold the entry; it is
    /// empty for local writes.
    pub async fn insert_one(
        &self,
        name: &str,
        owner_public_key: Option<&str>,
        entry: Entry,
        exclude_addresses: &[String],
    ) -> Result<InsertOutcome, ReplicationError> {
        if !self.store.is_connected() {
            return Err(ReplicationError::NotConnected);
        }
        if entry.entry_id.is_empty() {
            return Err(ReplicationError::MalformedEntry("entryId is missing".to_string()));
        }

        let owner_public_key = owner_public_key.filter(|key| !key.is_empty());
        let signer = resolve_owner(owner_public_key, &entry)?;
        verify_entry(&entry, signer)?;

        let collection = CollectionAddress::resolve(name, owner_public_key);
        let document = entry
            .to_document()
            .map_err(|e| ReplicationError::Storage(StoreError::Encoding(e)))?;

        let outcome = self
            .store
            .insert_unique(&collection, &entry.entry_id, &document)
            .await
            .map_err(|e| match e {
                StoreError::NotConnected => ReplicationError::NotConnected,
                other => ReplicationError::Storage(other),
            })?;

        if let InsertOutcome::Inserted { inserted_id } = &outcome {
            let self_address = self.propagator.self_address();
            let connected = self.propagator.connected_addresses();
            let next = next_exclusion(exclude_addresses, &self_address, &connected);

            let mut known: BTreeSet<String> = exclude_addresses.iter().cloned().collect();
            known.insert(self_address);

            let entry_id = entry.entry_id.clone();
            let message = ReplicationMessage::insert_one(
                name,
                owner_public_key.map(str::to_string),
                entry,
                next.into_iter().collect(),
            );
            let sent = self.propagator.propagate(&message, &known);

            tracing::debug!(
                "inserted {} into {} as {} (propagated to {} peers)",
                entry_id,
                collection,
                inserted_id,
                sent
            );
        } else {
            tracing::debug!("{} already stored in {}", entry.entry_id, collection);
        }

        Ok(outcome)
    }

    /// Documents of a collection that match `filter`, in insertion order.
    pub async fn find(
        &self,
        name: &str,
        owner_public_key: Option<&str>,
        filter: &Filter,
    ) -> Result<Entries, ReplicationError> {
        let owner_public_key = owner_public_key.filter(|key| !key.is_empty());
        let collection = CollectionAddress::resolve(name, owner_public_key);

        let documents = self
            .store
            .find(&collection, filter)
            .await
            .map_err(|e| match e {
                StoreError::NotConnected => ReplicationError::NotConnected,
                other => ReplicationError::QueryFailed(other.to_string()),
            })?;
        Ok(Entries::new(documents))
    }

    /// Apply a decoded replication message received from `from`.
    pub async fn handle_message(
        &self,
        message: ReplicationMessage,
        from: Option<&str>,
    ) -> Result<InsertOutcome, ReplicationError> {
        match message {
            ReplicationMessage::InsertOne(InsertOneMessage {
                exclude_addresses,
                name,
                owner_public_key,
                entry,
            }) => {
                tracing::debug!(
                    "InsertOne {} for {} from {}",
                    entry.entry_id,
                    name,
                    from.unwrap_or("<provisional>")
                );
                self.insert_one(&name, owner_public_key.as_deref(), entry, &exclude_addresses)
                    .await
            }
        }
    }

    /// Entry point for data frames delivered by the transport.
    pub async fn handle_payload(&self, payload: Value, from: Option<&str>) {
        let message: ReplicationMessage = match serde_json::from_value(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    "dropping undecodable message from {}: {}",
                    from.unwrap_or("<provisional>"),
                    e
                );
                return;
            }
        };

        match self.handle_message(message, from).await {
            Ok(_) => {}
            Err(e) if e.is_rejection() => {
                tracing::warn!("rejected entry from {}: {}", from.unwrap_or("<provisional>"), e)
            }
            Err(e) => {
                tracing::error!("failed to apply entry from {}: {}", from.unwrap_or("<provisional>"), e)
            }
        }
    }
}
