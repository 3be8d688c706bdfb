//! Domain Layer
//!
//! Entries, collection addressing, filters and signatures. Nothing here
//! knows about sockets or storage engines.

pub mod entities;
pub mod errors;
pub mod filter;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use entities::Entry;
pub use errors::{SignatureError, StoreError};
pub use filter::Filter;
pub use value_objects::{CollectionAddress, InsertOutcome};
