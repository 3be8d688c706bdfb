//! Adapters Layer
//!
//! Inbound adapters drive the node (HTTP); outbound adapters implement the
//! domain ports (entry storage).

pub mod inbound;
pub mod outbound;
