//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};

/// Storage namespace for a set of entries.
///
/// A public collection is addressed by its `name` alone. An owner-scoped
/// collection is addressed by `name/ownerPublicKey`. The storage adapter
/// treats the address as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionAddress(String);

impl CollectionAddress {
    /// Resolve the address of a collection.
    ///
    /// # Examples
    /// ```
    /// use gossip_store::domain::value_objects::CollectionAddress;
    ///
    /// assert_eq!(CollectionAddress::resolve("songs", None).as_str(), "songs");
    /// assert_eq!(CollectionAddress::resolve("songs", Some("ab01")).as_str(), "songs/ab01");
    /// ```
    pub fn resolve(name: &str, owner_public_key: Option<&str>) -> Self {
        match owner_public_key {
            Some(owner) => Self(format!("{}/{}", name, owner)),
            None => Self(name.to_string()),
        }
    }

    /// Wrap an already-resolved address.
    pub fn from_raw(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this address names a public collection.
    pub fn is_public(&self) -> bool {
        !self.0.contains('/')
    }
}

impl std::fmt::Display for CollectionAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a unique insert into a collection.
///
/// `AlreadyExists` is the expected steady state of gossip convergence:
/// the entry was applied earlier, locally or through another hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InsertOutcome {
    /// First-time insert; carries the storage-assigned identifier.
    #[serde(rename_all = "camelCase")]
    Inserted { inserted_id: String },
    /// An entry with the same `entryId` is already stored.
    AlreadyExists,
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }

    pub fn inserted_id(&self) -> Option<&str> {
        match self {
            Self::Inserted { inserted_id } => Some(inserted_id),
            Self::AlreadyExists => None,
        }
    }
}

/// Returns true if `s` is a non-empty string of hex digits.
pub fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}
