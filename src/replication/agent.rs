//! Replication Agent
//!
//! Node glue: owns the peer transport and the replication engine, feeds
//! received data frames into the engine and exposes local reads and writes.

use crate::domain::entities::Entry;
use crate::domain::filter::Filter;
use crate::domain::ports::EntryStore;
use crate::domain::value_objects::InsertOutcome;
use crate::replication::config::ReplicationConfig;
use crate::replication::engine::{Entries, ReplicationEngine, ReplicationError};
use crate::replication::gossip::GossipBroadcaster;
use crate::replication::transport::{PeerTransport, TransportError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A replicating node.
pub struct ReplicationAgent {
    config: ReplicationConfig,
    transport: Arc<PeerTransport>,
    engine: Arc<ReplicationEngine>,
    running: AtomicBool,
}

impl ReplicationAgent {
    /// Create an agent over `store`. Nothing is bound until `start()`.
    pub fn new(config: ReplicationConfig, store: Arc<dyn EntryStore>) -> anyhow::Result<Self> {
        config.validate()?;

        let transport = Arc::new(PeerTransport::new(config.clone()));
        let broadcaster = Arc::new(GossipBroadcaster::new(transport.clone()));
        let engine = Arc::new(ReplicationEngine::new(store, broadcaster));

        Ok(Self {
            config,
            transport,
            engine,
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<PeerTransport> {
        &self.transport
    }

    pub fn engine(&self) -> &Arc<ReplicationEngine> {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wire the engine to the transport and start listening.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn start(&self) -> anyhow::Result<SocketAddr> {
        let engine = self.engine.clone();
        self.transport.on_receive(move |inbound| {
            let engine = engine.clone();
            async move {
                engine
                    .handle_payload(inbound.payload, inbound.from.as_deref())
                    .await
            }
        });

        let local_addr = self.transport.start().await?;
        self.running.store(true, Ordering::SeqCst);

        tracing::info!(
            "replication agent started address={} peers={} max_connections={}",
            self.transport.self_address(),
            self.config.peer_addresses.len(),
            self.config.max_connections
        );
        Ok(local_addr)
    }

    /// Stop the transport. Stored entries are left untouched.
    pub async fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("stopping replication agent");
        }
        self.transport.stop().await;
    }

    /// Insert a locally submitted entry and gossip it to connected peers.
    pub async fn insert_one(
        &self,
        name: &str,
        owner_public_key: Option<&str>,
        entry: Entry,
    ) -> Result<InsertOutcome, ReplicationError> {
        self.engine.insert_one(name, owner_public_key, entry, &[]).await
    }

    /// Query the local replica.
    pub async fn find(
        &self,
        name: &str,
        owner_public_key: Option<&str>,
        filter: &Filter,
    ) -> Result<Entries, ReplicationError> {
        self.engine.find(name, owner_public_key, filter).await
    }

    /// Dial a peer immediately instead of waiting for the dial loop.
    pub async fn connect(&self, address: &str) -> Result<(), TransportError> {
        self.transport.connect(address).await
    }

    pub fn self_address(&self) -> String {
        self.transport.self_address()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn connected_peers(&self) -> Vec<String> {
        self.transport.connected_addresses()
    }
}
