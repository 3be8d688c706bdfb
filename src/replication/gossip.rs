//! Gossip Broadcaster
//!
//! Floods a replication message to every directly connected peer outside an
//! exclusion set. No acknowledgement, no retry.

use crate::replication::transport::PeerTransport;
use crate::replication::types::ReplicationMessage;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Outbound side of replication, as seen by the engine.
pub trait Propagator: Send + Sync {
    /// This node's own address.
    fn self_address(&self) -> String;

    /// Addresses of the peers currently connected.
    fn connected_addresses(&self) -> Vec<String>;

    /// Send `message` to every connected peer not in `exclude`.
    /// Returns the number of peers it was queued for.
    fn propagate(&self, message: &ReplicationMessage, exclude: &BTreeSet<String>) -> usize;
}

/// Propagator backed by the peer transport.
pub struct GossipBroadcaster {
    transport: Arc<PeerTransport>,
}

impl GossipBroadcaster {
    pub fn new(transport: Arc<PeerTransport>) -> Self {
        Self { transport }
    }
}

impl Propagator for GossipBroadcaster {
    fn self_address(&self) -> String {
        self.transport.self_address()
    }

    fn connected_addresses(&self) -> Vec<String> {
        self.transport.connected_addresses()
    }

    fn propagate(&self, message: &ReplicationMessage, exclude: &BTreeSet<String>) -> usize {
        let payload = match serde_json::to_value(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("failed to encode {} message: {}", message.action_name(), e);
                return 0;
            }
        };

        match self.transport.broadcast(&payload, exclude) {
            Ok(sent) => {
                tracing::debug!(
                    "propagated {} to {} peers (excluded {})",
                    message.action_name(),
                    sent,
                    exclude.len()
                );
                sent
            }
            Err(e) => {
                tracing::error!("failed to propagate {}: {}", message.action_name(), e);
                0
            }
        }
    }
}
