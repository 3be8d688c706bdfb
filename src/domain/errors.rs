//! Domain Errors
//!
//! Error types shared by the storage port and the signature service.

/// Errors raised by a storage adapter.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage adapter is not connected")]
    NotConnected,
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors raised while verifying an entry signature.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed public key: {0}")]
    MalformedKey(String),
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("signature does not match entry")]
    Mismatch,
    #[error("entry cannot be encoded: {0}")]
    Encoding(String),
}
