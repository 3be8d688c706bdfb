//! Peer Transport
//!
//! Direct TCP connections between nodes. Every frame is a 4-byte
//! big-endian length followed by that many bytes of JSON.
//!
//! Uses Sans-IO pattern: frame encoding/decoding and dial-candidate selection
//! are separated from I/O for testability.

use crate::infrastructure::shutdown::ShutdownController;
use crate::replication::config::{ConfigError, ReplicationConfig};
use crate::replication::registry::{ConnectionRegistry, Direction, PeerConnection, SendError};
use crate::replication::types::{canonical_address, format_address, is_loopback_alias, split_address, Frame};
use bytes::{BufMut, Bytes, BytesMut};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};

/// Errors from the peer transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind peer listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection attempt timed out")]
    Timeout,
    #[error("frame of {0} bytes exceeds the size limit")]
    FrameTooLarge(usize),
    #[error("malformed frame: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("transport not started")]
    NotStarted,
    #[error("refusing to connect to own address {0}")]
    SelfConnection(String),
    #[error("already connected to {0}")]
    AlreadyConnected(String),
    #[error("invalid peer address {0}")]
    InvalidAddress(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

// ==================== Sans-IO Functions ====================

/// Encode a frame for transport.
/// Returns length-prefixed JSON ready for sending.
pub fn encode_frame(frame: &Frame) -> Result<Bytes, TransportError> {
    let data = serde_json::to_vec(frame)?;
    let mut buf = BytesMut::with_capacity(4 + data.len());
    buf.put_u32(data.len() as u32);
    buf.put_slice(&data);
    Ok(buf.freeze())
}

/// Decode a length from the first 4 bytes.
pub fn decode_length(buf: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*buf)
}

/// Decode a frame body (without its length prefix).
pub fn decode_frame(data: &[u8]) -> Result<Frame, TransportError> {
    Ok(serde_json::from_slice(data)?)
}

/// Read one frame from a byte stream.
///
/// Returns `Ok(None)` on a clean end of stream. An oversized frame is
/// drained and reported as `FrameTooLarge`; a body that is not a valid
/// frame is reported as `Protocol`. In both cases the stream stays aligned
/// on the next frame.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Frame>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = decode_length(&len_buf) as usize;
    if len > max_frame_size {
        tokio::io::copy(&mut (&mut *reader).take(len as u64), &mut tokio::io::sink()).await?;
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    decode_frame(&data).map(Some)
}

/// How many connections the dial loop maintains.
pub fn connection_target(max_connections: usize, peer_count: usize) -> usize {
    max_connections.min(peer_count / 2)
}

/// Whether `candidate` denotes this node: a loopback alias or our own host,
/// on our listening port.
pub fn is_self_address(candidate: &str, self_host: &str, listen_port: u16) -> bool {
    match split_address(candidate) {
        Some((host, port)) => port == listen_port && (is_loopback_alias(host) || host == self_host),
        None => false,
    }
}

/// Pause before the next `accept()` after `failures` consecutive errors.
/// Doubles from 10ms and caps at one second.
pub fn accept_backoff(failures: u32) -> Duration {
    let millis = 10u64.saturating_mul(1u64 << failures.saturating_sub(1).min(10));
    Duration::from_millis(millis.min(1000))
}

/// Pick the first peer at or after `start` (wrapping) that is not skipped.
/// Returns its index and address.
pub fn next_candidate<'a, F>(peers: &'a [String], start: usize, skip: F) -> Option<(usize, &'a str)>
where
    F: Fn(&str) -> bool,
{
    if peers.is_empty() {
        return None;
    }
    (0..peers.len())
        .map(|offset| (start + offset) % peers.len())
        .map(|index| (index, peers[index].as_str()))
        .find(|(_, address)| !skip(address))
}

// ==================== Transport ====================

/// A data frame received from a peer.
#[derive(Debug, Clone)]
pub struct InboundPayload {
    /// Registered address of the sender; `None` while the connection is provisional.
    pub from: Option<String>,
    pub remote_addr: SocketAddr,
    pub payload: Value,
}

/// Handler invoked for every received data frame.
pub type ReceiveHandler = Arc<dyn Fn(InboundPayload) -> BoxFuture<'static, ()> + Send + Sync>;

/// Peer transport: listener, connection registry and dial loop.
pub struct PeerTransport {
    config: ReplicationConfig,
    registry: Arc<ConnectionRegistry>,
    handler: RwLock<Option<ReceiveHandler>>,
    local_addr: RwLock<Option<SocketAddr>>,
    shutdown: ShutdownController,
    cursor: AtomicUsize,
}

impl PeerTransport {
    /// Create a new transport.
    pub fn new(config: ReplicationConfig) -> Self {
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            handler: RwLock::new(None),
            local_addr: RwLock::new(None),
            shutdown: ShutdownController::new(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// Port peers should dial.
    pub fn listen_port(&self) -> u16 {
        self.local_addr()
            .map(|addr| addr.port())
            .unwrap_or(self.config.listen_port)
    }

    /// This node's own `host:port`, as peers know it.
    pub fn self_address(&self) -> String {
        canonical_address(&format_address(&self.config.self_host, self.listen_port()))
    }

    /// Addresses of registered peers, sorted.
    pub fn connected_addresses(&self) -> Vec<String> {
        self.registry.addresses()
    }

    /// Number of registered peers.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_connected_to(&self, address: &str) -> bool {
        self.registry.contains_address(&canonical_address(address))
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_shutdown()
    }

    /// Register the handler for received data frames, replacing any previous one.
    pub fn on_receive<F, Fut>(&self, handler: F)
    where
        F: Fn(InboundPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: ReceiveHandler = Arc::new(move |payload| Box::pin(handler(payload)));
        *self.handler.write() = Some(handler);
    }

    /// Bind the listener and spawn the accept and dial loops.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, TransportError> {
        self.config.validate()?;

        let listener = TcpListener::bind((self.config.bind_addr, self.config.listen_port))
            .await
            .map_err(TransportError::Bind)?;
        let local_addr = listener.local_addr().map_err(TransportError::Bind)?;
        *self.local_addr.write() = Some(local_addr);

        tracing::info!(
            "peer transport listening on {} (announcing {})",
            local_addr,
            self.self_address()
        );

        self.spawn_accept_loop(listener);
        self.spawn_dial_loop();

        Ok(local_addr)
    }

    /// Close every connection and the listener. The registry is cleared.
    pub async fn stop(&self) {
        if self.shutdown.is_shutdown() {
            return;
        }
        tracing::info!("stopping peer transport {}", self.self_address());
        self.shutdown.shutdown();

        for conn in self.registry.clear() {
            conn.close();
        }
        self.shutdown.wait_for_drain(Duration::from_secs(2)).await;
    }

    /// Dial `address` and perform the handshake.
    ///
    /// The peer is registered under the canonical spelling of `address`, so
    /// `localhost:p` and `127.0.0.1:p` name the same peer.
    pub async fn connect(self: &Arc<Self>, address: &str) -> Result<(), TransportError> {
        let local_addr = self.local_addr().ok_or(TransportError::NotStarted)?;
        if split_address(address).is_none() {
            return Err(TransportError::InvalidAddress(address.to_string()));
        }
        if is_self_address(address, &self.config.self_host, local_addr.port()) {
            return Err(TransportError::SelfConnection(address.to_string()));
        }
        let peer = canonical_address(address);
        if self.registry.contains_address(&peer) {
            return Err(TransportError::AlreadyConnected(peer));
        }

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| TransportError::Timeout)??;
        let remote_addr = stream.peer_addr()?;

        let conn = self.spawn_connection(stream, remote_addr, Direction::Outbound);

        let handshake = encode_frame(&Frame::PeerInfo {
            listen_address: self.config.self_host.clone(),
            listen_port: local_addr.port(),
        })?;
        if conn.send(handshake).is_err() || !self.registry.register(conn.id, &peer) {
            conn.close();
            return Err(TransportError::AlreadyConnected(peer));
        }

        tracing::info!("connected to peer {} ({})", peer, remote_addr);
        Ok(())
    }

    /// Send a data frame to one registered peer.
    /// Returns false when there is no live connection for `address`.
    pub fn send(&self, address: &str, payload: &Value) -> Result<bool, TransportError> {
        let Some(conn) = self.registry.get(&canonical_address(address)) else {
            return Ok(false);
        };
        let frame = encode_frame(&Frame::PeerData {
            payload: payload.clone(),
        })?;
        Ok(Self::queue(address, &conn, frame))
    }

    /// Send a data frame to every registered peer outside `exclude`.
    /// Returns the number of peers the frame was queued for.
    pub fn broadcast(&self, payload: &Value, exclude: &BTreeSet<String>) -> Result<usize, TransportError> {
        let frame = encode_frame(&Frame::PeerData {
            payload: payload.clone(),
        })?;

        let mut sent = 0;
        for (address, conn) in self.registry.peers() {
            if exclude.contains(&address) {
                continue;
            }
            if Self::queue(&address, &conn, frame.clone()) {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// One iteration of the dial loop. Returns the address dialed, if any.
    pub async fn dial_once(self: &Arc<Self>) -> Option<String> {
        let peers = &self.config.peer_addresses;
        let target = connection_target(self.config.max_connections, peers.len());
        if self.registry.len() >= target {
            return None;
        }

        let listen_port = self.listen_port();
        let start = self.cursor.load(Ordering::SeqCst);
        let (index, candidate) = next_candidate(peers, start, |address| {
            is_self_address(address, &self.config.self_host, listen_port)
                || self.registry.contains_address(&canonical_address(address))
        })?;
        self.cursor.store(index + 1, Ordering::SeqCst);

        let candidate = candidate.to_string();
        if let Err(e) = self.connect(&candidate).await {
            tracing::debug!("connection to {} failed: {}", candidate, e);
        }
        Some(candidate)
    }

    fn queue(address: &str, conn: &PeerConnection, frame: Bytes) -> bool {
        match conn.send(frame) {
            Ok(()) => true,
            Err(SendError::QueueFull) => {
                tracing::warn!("send queue full for {}, dropping frame", address);
                false
            }
            Err(SendError::Closed) => {
                tracing::debug!("connection to {} is closing, dropping frame", address);
                false
            }
        }
    }

    fn spawn_accept_loop(self: &Arc<Self>, listener: TcpListener) {
        let this = self.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                if this.shutdown.is_shutdown() {
                    break;
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote_addr)) => {
                            failures = 0;
                            tracing::debug!("accepted connection from {}", remote_addr);
                            this.spawn_connection(stream, remote_addr, Direction::Inbound);
                        }
                        Err(e) => {
                            failures = failures.saturating_add(1);
                            let pause = accept_backoff(failures);
                            tracing::warn!("failed to accept connection: {:?}, retrying in {:?}", e, pause);
                            tokio::select! {
                                _ = shutdown_rx.recv() => break,
                                _ = sleep(pause) => {}
                            }
                        }
                    }
                }
            }
            tracing::debug!("accept loop stopped");
        });
    }

    fn spawn_dial_loop(self: &Arc<Self>) {
        let this = self.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(this.config.reconnect_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                if this.shutdown.is_shutdown() {
                    break;
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        this.dial_once().await;
                    }
                }
            }
            tracing::debug!("dial loop stopped");
        });
    }

    fn spawn_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        direction: Direction,
    ) -> Arc<PeerConnection> {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(self.config.send_queue_capacity);
        let closed = Arc::new(Notify::new());

        let conn = Arc::new(PeerConnection::new(
            self.registry.next_id(),
            remote_addr,
            direction,
            tx,
            closed.clone(),
        ));
        self.registry.add(conn.clone());

        tokio::spawn(write_loop(
            write_half,
            rx,
            closed,
            self.config.write_timeout,
            remote_addr,
        ));

        let this = self.clone();
        let reader_conn = conn.clone();
        tokio::spawn(async move { this.read_loop(read_half, reader_conn).await });

        conn
    }

    async fn read_loop(self: Arc<Self>, read_half: OwnedReadHalf, conn: Arc<PeerConnection>) {
        let _guard = self.shutdown.connection_guard();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut reader = BufReader::new(read_half);

        loop {
            if self.shutdown.is_shutdown() {
                break;
            }
            let result = tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = conn.closed() => break,
                result = read_frame(&mut reader, self.config.max_frame_size) => result,
            };

            match result {
                Ok(Some(frame)) => self.handle_frame(&conn, frame).await,
                Ok(None) => {
                    tracing::debug!("peer {} closed the connection", conn.remote_addr);
                    break;
                }
                Err(e @ (TransportError::Protocol(_) | TransportError::FrameTooLarge(_))) => {
                    tracing::warn!("dropping frame from {}: {}", conn.remote_addr, e);
                }
                Err(e) => {
                    tracing::warn!("connection error from {}: {}", conn.remote_addr, e);
                    break;
                }
            }
        }

        let address = self.registry.remove(conn.id);
        conn.close();
        tracing::info!(
            "connection closed remote={} address={}",
            conn.remote_addr,
            address.as_deref().unwrap_or("<provisional>")
        );
        if let Some(address) = address {
            if let Some(heir) = self.registry.get(&address) {
                tracing::info!("peer {} now reached via {}", address, heir.remote_addr);
            }
        }
    }

    async fn handle_frame(&self, conn: &PeerConnection, frame: Frame) {
        match frame {
            Frame::PeerInfo { listen_port, .. } => {
                if conn.direction == Direction::Outbound {
                    tracing::debug!("ignoring handshake on outbound connection to {}", conn.remote_addr);
                    return;
                }
                let address = canonical_address(&format_address(&conn.remote_addr.ip().to_string(), listen_port));
                if self.registry.register_or_park(conn.id, &address) {
                    tracing::info!("peer registered address={} remote={}", address, conn.remote_addr);
                } else {
                    tracing::debug!(
                        "peer {} already registered, connection from {} parked until it closes",
                        address,
                        conn.remote_addr
                    );
                }
            }
            Frame::PeerData { payload } => {
                let handler = self.handler.read().clone();
                match handler {
                    Some(handler) => {
                        handler(InboundPayload {
                            from: self.registry.address_of(conn.id),
                            remote_addr: conn.remote_addr,
                            payload,
                        })
                        .await
                    }
                    None => tracing::debug!("no receive handler, dropping data from {}", conn.remote_addr),
                }
            }
        }
    }
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
    closed: Arc<Notify>,
    write_timeout: Duration,
    remote_addr: SocketAddr,
) {
    while let Some(frame) = rx.recv().await {
        match timeout(write_timeout, write_half.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!("write to {} failed: {}", remote_addr, e);
                break;
            }
            Err(_) => {
                tracing::warn!("write to {} timed out", remote_addr);
                break;
            }
        }
    }
    closed.notify_one();
    let _ = write_half.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn peers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_encode_frame_prefix() {
        let frame = Frame::PeerData { payload: json!({ "a": 1 }) };
        let encoded = encode_frame(&frame).unwrap();

        let len = decode_length(&[encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len as usize, encoded.len() - 4);
        assert_eq!(decode_frame(&encoded[4..]).unwrap(), frame);
    }

    #[test]
    fn test_decode_length() {
        assert_eq!(decode_length(&[0x00, 0x00, 0x01, 0x00]), 256);
        assert_eq!(decode_length(&[0x00, 0x01, 0x00, 0x00]), 65536);
    }

    #[test]
    fn test_decode_frame_invalid() {
        assert!(matches!(decode_frame(b"not json"), Err(TransportError::Protocol(_))));
        assert!(matches!(
            decode_frame(br#"{"kind":"Nope"}"#),
            Err(TransportError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_read_frame_coalesced() {
        let first = Frame::PeerInfo { listen_address: "127.0.0.1".to_string(), listen_port: 7 };
        let second = Frame::PeerData { payload: json!("x") };
        let mut bytes = encode_frame(&first).unwrap().to_vec();
        bytes.extend_from_slice(&encode_frame(&second).unwrap());

        let mut reader = &bytes[..];
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), Some(first));
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), Some(second));
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_frame_fragmented() {
        let frame = Frame::PeerData { payload: json!({ "title": "Blue" }) };
        let bytes = encode_frame(&frame).unwrap();
        let (mut client, mut server) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            for chunk in bytes.chunks(3) {
                client.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        assert_eq!(read_frame(&mut server, 1024).await.unwrap(), Some(frame));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_frame_split_prefix() {
        let frame = Frame::PeerData { payload: json!([1, 2, 3]) };
        let bytes = encode_frame(&frame).unwrap();

        let mut reader = tokio_test::io::Builder::new()
            .read(&bytes[..2])
            .read(&bytes[2..6])
            .read(&bytes[6..])
            .build();
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), Some(frame));
    }

    #[tokio::test]
    async fn test_read_frame_skips_malformed_and_oversized() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(8u32).to_be_bytes());
        bytes.extend_from_slice(b"garbage!");
        bytes.extend_from_slice(&(100u32).to_be_bytes());
        bytes.extend_from_slice(&[b'x'; 100]);
        let good = Frame::PeerData { payload: json!(1) };
        bytes.extend_from_slice(&encode_frame(&good).unwrap());

        let mut reader = &bytes[..];
        assert!(matches!(read_frame(&mut reader, 64).await, Err(TransportError::Protocol(_))));
        assert!(matches!(read_frame(&mut reader, 64).await, Err(TransportError::FrameTooLarge(100))));
        assert_eq!(read_frame(&mut reader, 64).await.unwrap(), Some(good));
    }

    #[tokio::test]
    async fn test_read_frame_truncated_prefix_is_end() {
        let bytes = [0u8, 0u8];
        let mut reader = &bytes[..];
        assert_eq!(read_frame(&mut reader, 16).await.unwrap(), None);
    }

    #[test]
    fn test_connection_target() {
        assert_eq!(connection_target(2, 7), 2);
        assert_eq!(connection_target(10, 7), 3);
        assert_eq!(connection_target(8, 1), 0);
        assert_eq!(connection_target(0, 10), 0);
    }

    #[test]
    fn test_is_self_address() {
        assert!(is_self_address("127.0.0.1:4002", "10.0.0.1", 4002));
        assert!(is_self_address("localhost:4002", "10.0.0.1", 4002));
        assert!(is_self_address("10.0.0.1:4002", "10.0.0.1", 4002));
        assert!(!is_self_address("10.0.0.1:4003", "10.0.0.1", 4002));
        assert!(!is_self_address("10.0.0.2:4002", "10.0.0.1", 4002));
        assert!(!is_self_address("garbage", "10.0.0.1", 4002));
    }

    #[test]
    fn test_next_candidate_round_robin() {
        let list = peers(&["a:1", "b:1", "c:1"]);
        assert_eq!(next_candidate(&list, 0, |_| false), Some((0, "a:1")));
        assert_eq!(next_candidate(&list, 1, |_| false), Some((1, "b:1")));
        assert_eq!(next_candidate(&list, 4, |_| false), Some((1, "b:1")));
    }

    #[test]
    fn test_next_candidate_skips() {
        let list = peers(&["a:1", "b:1", "c:1"]);
        assert_eq!(next_candidate(&list, 0, |a| a == "a:1"), Some((1, "b:1")));
        assert_eq!(next_candidate(&list, 2, |a| a != "a:1"), Some((0, "a:1")));
        assert_eq!(next_candidate(&list, 0, |_| true), None);
        assert_eq!(next_candidate(&[], 0, |_| false), None);
    }

    #[test]
    fn test_transport_creation() {
        let transport = PeerTransport::new(ReplicationConfig::new("127.0.0.1").listen_port(4500));
        assert!(transport.local_addr().is_none());
        assert_eq!(transport.self_address(), "127.0.0.1:4500");
        assert_eq!(transport.connection_count(), 0);
        assert!(!transport.is_shutdown());
    }

    #[tokio::test]
    async fn test_connect_without_start() {
        let transport = Arc::new(PeerTransport::new(ReplicationConfig::default()));
        let result = transport.connect("127.0.0.1:9").await;
        assert!(matches!(result, Err(TransportError::NotStarted)));
    }

    #[tokio::test]
    async fn test_start_binds_ephemeral_port() {
        let config = ReplicationConfig::new("127.0.0.1").bind_addr("127.0.0.1".parse().unwrap());
        let transport = Arc::new(PeerTransport::new(config));
        let addr = transport.start().await.unwrap();

        assert_ne!(addr.port(), 0);
        assert_eq!(transport.self_address(), format!("127.0.0.1:{}", addr.port()));

        transport.stop().await;
        assert!(transport.is_shutdown());
    }

    #[tokio::test]
    async fn test_start_bind_failure_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let config = ReplicationConfig::new("127.0.0.1")
            .bind_addr("127.0.0.1".parse().unwrap())
            .listen_port(port);
        let transport = Arc::new(PeerTransport::new(config));
        assert!(matches!(transport.start().await, Err(TransportError::Bind(_))));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let config = ReplicationConfig::new("127.0.0.1")
            .bind_addr("127.0.0.1".parse().unwrap())
            .peer_addresses(vec!["127.0.0.1:1".to_string(), "127.0.0.1:2".to_string()])
            .reconnect_interval(Duration::ZERO);
        let transport = Arc::new(PeerTransport::new(config));

        let result = transport.start().await;
        assert!(matches!(
            result,
            Err(TransportError::Config(ConfigError::ZeroReconnectInterval))
        ));
        assert!(transport.local_addr().is_none());
    }

    #[test]
    fn test_accept_backoff() {
        assert_eq!(accept_backoff(0), Duration::from_millis(10));
        assert_eq!(accept_backoff(1), Duration::from_millis(10));
        assert_eq!(accept_backoff(2), Duration::from_millis(20));
        assert_eq!(accept_backoff(5), Duration::from_millis(160));
        assert_eq!(accept_backoff(8), Duration::from_secs(1));
        assert_eq!(accept_backoff(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_connect_to_self_refused() {
        let config = ReplicationConfig::new("127.0.0.1").bind_addr("127.0.0.1".parse().unwrap());
        let transport = Arc::new(PeerTransport::new(config));
        let addr = transport.start().await.unwrap();

        let result = transport.connect(&format!("localhost:{}", addr.port())).await;
        assert!(matches!(result, Err(TransportError::SelfConnection(_))));
        transport.stop().await;
    }

    #[tokio::test]
    async fn test_send_and_broadcast_without_peers() {
        let transport = PeerTransport::new(ReplicationConfig::default());
        assert!(!transport.send("10.0.0.9:1", &json!({})).unwrap());
        assert_eq!(transport.broadcast(&json!({}), &BTreeSet::new()).unwrap(), 0);
    }
}
