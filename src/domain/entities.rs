//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the document store.
//! Entries are schema-free apart from their identifier and signature.

use crate::domain::errors::SignatureError;
use crate::domain::services::signature::sign_entry;
use crate::domain::value_objects::is_hex;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A signed application document targeted at a collection.
///
/// Any field other than `entryId` and `signature` is kept verbatim in
/// `fields` and takes part in the signed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Identifier, unique within a collection address.
    /// May be prefixed with `<hex-public-key>/` to bind ownership.
    #[serde(rename = "entryId", default)]
    pub entry_id: String,
    /// Hex-encoded Ed25519 signature over the canonical form of the entry.
    #[serde(default)]
    pub signature: String,
    /// Schema-free payload.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entry {
    /// Create an unsigned entry.
    pub fn new(entry_id: impl Into<String>) -> Self {
        Self {
            entry_id: entry_id.into(),
            signature: String::new(),
            fields: Map::new(),
        }
    }

    /// Add a payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Sign this entry with `key`, replacing any previous signature.
    pub fn sign(mut self, key: &SigningKey) -> Result<Self, SignatureError> {
        sign_entry(&mut self, key)?;
        Ok(self)
    }

    /// Hex public key bound through an `entryId` of the form `<hex>/...`.
    pub fn owner_prefix(&self) -> Option<&str> {
        let (prefix, _) = self.entry_id.split_once('/')?;
        is_hex(prefix).then_some(prefix)
    }

    /// The JSON document stored for this entry.
    pub fn to_document(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Rebuild an entry from a stored or received JSON document.
    pub fn from_document(document: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(document)
    }
}
