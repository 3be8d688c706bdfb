//! Replication Configuration
//!
//! Configuration for the peer transport and the replication engine.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Configuration for a replicating node.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Host announced to peers in the handshake and used as this node's
    /// own address in exclusion sets (default: 127.0.0.1)
    pub self_host: String,

    /// Interface the peer listener binds to (default: 0.0.0.0)
    pub bind_addr: IpAddr,

    /// Peer listener port, 0 picks any available port (default: 0)
    pub listen_port: u16,

    /// Candidate peers to dial, as `host:port`
    pub peer_addresses: Vec<String>,

    /// Upper bound on live connections maintained by the dial loop (default: 8)
    pub max_connections: usize,

    /// Dial loop period (default: 5s)
    pub reconnect_interval: Duration,

    /// Timeout for a single connection attempt (default: 5s)
    pub connect_timeout: Duration,

    /// Timeout for writing one frame to a peer (default: 10s)
    pub write_timeout: Duration,

    /// Largest accepted frame body in bytes (default: 10MB)
    pub max_frame_size: usize,

    /// Frames queued per connection before new ones are dropped (default: 1024)
    pub send_queue_capacity: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            self_host: "127.0.0.1".to_string(),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: 0,
            peer_addresses: Vec::new(),
            max_connections: 8,
            reconnect_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            max_frame_size: 10 * 1024 * 1024, // 10 MB
            send_queue_capacity: 1024,
        }
    }
}

impl ReplicationConfig {
    /// Create a new configuration announcing `self_host`.
    pub fn new(self_host: impl Into<String>) -> Self {
        Self {
            self_host: self_host.into(),
            ..Default::default()
        }
    }

    /// Set the listener bind interface.
    pub fn bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the listener port.
    pub fn listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Set the candidate peers.
    pub fn peer_addresses(mut self, peers: Vec<String>) -> Self {
        self.peer_addresses = peers;
        self
    }

    /// Set the connection bound.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the dial loop period.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-frame write timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the largest accepted frame body.
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Set the per-connection send queue length.
    pub fn send_queue_capacity(mut self, frames: usize) -> Self {
        self.send_queue_capacity = frames;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.self_host.is_empty() {
            return Err(ConfigError::MissingSelfHost);
        }
        if self.reconnect_interval.is_zero() {
            return Err(ConfigError::ZeroReconnectInterval);
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::ZeroFrameSize);
        }
        if self.send_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("self_host is required")]
    MissingSelfHost,
    #[error("reconnect_interval must be greater than zero")]
    ZeroReconnectInterval,
    #[error("max_frame_size must be greater than zero")]
    ZeroFrameSize,
    #[error("send_queue_capacity must be greater than zero")]
    ZeroQueueCapacity,
}
