//! Connection Registry
//!
//! Owns every live peer connection and the bidirectional mapping between
//! peer address and connection. An address maps to at most one connection
//! and a connection to at most one address. Connections without an address
//! are provisional: they deliver data but cannot be targeted by address.
//! A provisional connection that announced an address already taken is
//! parked and takes the address over when the holder goes away.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

pub type ConnectionId = u64;

/// Which side dialed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Why a frame could not be queued on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    QueueFull,
    Closed,
}

/// Handle to one live socket session.
///
/// Frames are queued to a dedicated writer task; dropping the last handle
/// ends that task.
#[derive(Debug)]
pub struct PeerConnection {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub direction: Direction,
    tx: mpsc::Sender<Bytes>,
    closed: Arc<Notify>,
}

impl PeerConnection {
    pub fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        direction: Direction,
        tx: mpsc::Sender<Bytes>,
        closed: Arc<Notify>,
    ) -> Self {
        Self {
            id,
            remote_addr,
            direction,
            tx,
            closed,
        }
    }

    /// Queue an encoded frame without waiting.
    pub fn send(&self, frame: Bytes) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Ask the reader task to end the session.
    pub fn close(&self) {
        self.closed.notify_one();
    }

    /// Resolves once `close()` has been called.
    pub async fn closed(&self) {
        self.closed.notified().await
    }
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Arc<PeerConnection>>,
    by_address: HashMap<String, ConnectionId>,
    by_connection: HashMap<ConnectionId, String>,
    parked: HashMap<ConnectionId, String>,
}

impl Inner {
    fn attach(&mut self, id: ConnectionId, address: &str) {
        self.by_address.insert(address.to_string(), id);
        self.by_connection.insert(id, address.to_string());
    }
}

/// The single owner of connection state. All access goes through one lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an identifier for a new connection.
    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Track a new, provisional connection.
    pub fn add(&self, conn: Arc<PeerConnection>) {
        self.inner.lock().connections.insert(conn.id, conn);
    }

    /// Attribute `address` to connection `id`.
    ///
    /// Returns false, leaving the registry unchanged, when the connection is
    /// unknown, already has an address, or the address is already taken.
    pub fn register(&self, id: ConnectionId, address: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.connections.contains_key(&id)
            || inner.by_connection.contains_key(&id)
            || inner.by_address.contains_key(address)
        {
            return false;
        }
        inner.attach(id, address);
        true
    }

    /// Like `register`, but a connection whose address is already taken is
    /// parked under it instead of being refused.
    ///
    /// Returns true when the address was attributed now.
    pub fn register_or_park(&self, id: ConnectionId, address: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.connections.contains_key(&id) || inner.by_connection.contains_key(&id) {
            return false;
        }
        if inner.by_address.contains_key(address) {
            inner.parked.insert(id, address.to_string());
            return false;
        }
        inner.attach(id, address);
        true
    }

    /// Forget connection `id` and both sides of its mapping.
    /// Returns the address it was registered under, if any.
    ///
    /// The address passes to the oldest connection parked under it, if any.
    pub fn remove(&self, id: ConnectionId) -> Option<String> {
        let mut inner = self.inner.lock();
        inner.connections.remove(&id);
        inner.parked.remove(&id);
        let address = inner.by_connection.remove(&id)?;
        inner.by_address.remove(&address);

        let heir = inner
            .parked
            .iter()
            .filter(|(_, parked)| **parked == address)
            .map(|(id, _)| *id)
            .min();
        if let Some(heir) = heir {
            inner.parked.remove(&heir);
            inner.attach(heir, &address);
        }
        Some(address)
    }

    /// Drop every connection, returning them so the caller can close them.
    pub fn clear(&self) -> Vec<Arc<PeerConnection>> {
        let mut inner = self.inner.lock();
        inner.by_address.clear();
        inner.by_connection.clear();
        inner.parked.clear();
        inner.connections.drain().map(|(_, conn)| conn).collect()
    }

    pub fn get(&self, address: &str) -> Option<Arc<PeerConnection>> {
        let inner = self.inner.lock();
        let id = inner.by_address.get(address)?;
        inner.connections.get(id).cloned()
    }

    pub fn address_of(&self, id: ConnectionId) -> Option<String> {
        self.inner.lock().by_connection.get(&id).cloned()
    }

    pub fn contains_address(&self, address: &str) -> bool {
        self.inner.lock().by_address.contains_key(address)
    }

    /// Registered peer addresses, sorted.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.inner.lock().by_address.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Registered peers with their connections.
    pub fn peers(&self) -> Vec<(String, Arc<PeerConnection>)> {
        let inner = self.inner.lock();
        inner
            .by_address
            .iter()
            .filter_map(|(address, id)| {
                inner
                    .connections
                    .get(id)
                    .map(|conn| (address.clone(), conn.clone()))
            })
            .collect()
    }

    /// Number of registered (addressable) connections.
    pub fn len(&self) -> usize {
        self.inner.lock().by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live connections, provisional ones included.
    pub fn live_count(&self) -> usize {
        self.inner.lock().connections.len()
    }
}
