//! gossip-store Library
//!
//! This module exposes the gossip-store components for use in integration
//! tests and as a library.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod replication;

// Re-export commonly used types
pub use config::load_config;
pub use domain::entities::Entry;
pub use domain::filter::Filter;
pub use domain::ports::EntryStore;
pub use domain::value_objects::{CollectionAddress, InsertOutcome};
pub use replication::{ReplicationAgent, ReplicationConfig, ReplicationError};
