//! Replication
//!
//! Peer-to-peer propagation of signed inserts between nodes.
//!
//! ## Architecture
//!
//! - **Transport (TCP)**: length-prefixed JSON frames over direct connections,
//!   a handshake announcing each dialer's listening address, and a dial loop
//!   keeping `min(max_connections, peers / 2)` connections up
//! - **Registry**: the bidirectional address ↔ connection map
//! - **Gossip**: floods a message to connected peers outside an exclusion set
//! - **Engine**: verifies, stores and re-propagates inserts
//! - **Agent**: wires everything together for one node
//!
//! ## How It Works
//!
//! 1. A write is verified against its owner's Ed25519 key
//! 2. It is stored with a uniqueness constraint on `entryId`; a duplicate is a no-op
//! 3. A first insert is sent to every connected peer that is not known to hold it
//! 4. The message carries every address known to hold it, so receivers do not
//!    send it back
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gossip_store::adapters::outbound::DashMapEntryStore;
//! use gossip_store::replication::{ReplicationAgent, ReplicationConfig};
//!
//! let config = ReplicationConfig::new("10.0.0.1")
//!     .listen_port(4002)
//!     .peer_addresses(vec!["10.0.0.2:4002".to_string()]);
//!
//! let agent = ReplicationAgent::new(config, Arc::new(DashMapEntryStore::new()))?;
//! agent.start().await?;
//! ```

mod agent;
mod config;
mod engine;
mod gossip;
mod registry;
mod transport;
mod types;

pub use agent::ReplicationAgent;
pub use config::{ConfigError, ReplicationConfig};
pub use engine::{next_exclusion, resolve_owner, Entries, ReplicationEngine, ReplicationError};
pub use gossip::{GossipBroadcaster, Propagator};
pub use registry::{ConnectionId, ConnectionRegistry, Direction, PeerConnection, SendError};
pub use transport::{
    accept_backoff, connection_target, decode_frame, decode_length, encode_frame, is_self_address,
    next_candidate, read_frame, InboundPayload, PeerTransport, ReceiveHandler, TransportError,
};
pub use types::{
    canonical_address, format_address, is_loopback_alias, split_address, Frame, InsertOneMessage,
    ReplicationMessage,
};
