use crate::replication::ReplicationConfig;
use serde::Deserialize;
use std::time::Duration;

/// Which entry store backs the node.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Sqlite,
    Memory,
}

impl StorageKind {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "sqlite" => Some(StorageKind::Sqlite),
            "memory" | "mem" => Some(StorageKind::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Peer transport settings
    pub self_address: String,
    pub listen_port: u16,
    pub peers: Vec<String>,
    pub max_connections: usize,
    pub reconnect_interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub write_timeout_secs: u64,

    // Storage settings
    pub storage: StorageKind,
    pub db_path: String,

    // HTTP API settings
    pub api_listen_addr: String,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            self_address: "127.0.0.1".to_string(),
            listen_port: 0,
            peers: Vec::new(),
            max_connections: 8,
            reconnect_interval_secs: 5,
            connect_timeout_secs: 5,
            write_timeout_secs: 10,
            storage: StorageKind::Sqlite,
            db_path: "entries.db".to_string(),
            api_listen_addr: "0.0.0.0:8080".to_string(),
            debug: false,
        }
    }
}

impl Config {
    /// Replication settings derived from this configuration.
    pub fn replication_config(&self) -> ReplicationConfig {
        ReplicationConfig::new(self.self_address.clone())
            .listen_port(self.listen_port)
            .peer_addresses(self.peers.clone())
            .max_connections(self.max_connections)
            .reconnect_interval(Duration::from_secs(self.reconnect_interval_secs))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .write_timeout(Duration::from_secs(self.write_timeout_secs))
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    Ok(load_from(|key| std::env::var(key).ok()))
}

/// Build a configuration from `lookup`. Unset or unparseable values fall
/// back to their defaults.
pub fn load_from<F>(lookup: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();

    let self_address = lookup("GOSSIP_STORE_SELF_ADDRESS")
        .filter(|v| !v.is_empty())
        .unwrap_or(defaults.self_address);

    let listen_port = lookup("GOSSIP_STORE_LISTEN_PORT")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.listen_port);

    let peers = lookup("GOSSIP_STORE_PEERS")
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let max_connections = lookup("GOSSIP_STORE_MAX_CONNECTIONS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.max_connections);

    let reconnect_interval_secs = lookup("GOSSIP_STORE_RECONNECT_INTERVAL_SECS")
        .and_then(|v| v.parse().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(defaults.reconnect_interval_secs);

    let connect_timeout_secs = lookup("GOSSIP_STORE_CONNECT_TIMEOUT_SECS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.connect_timeout_secs);

    let write_timeout_secs = lookup("GOSSIP_STORE_WRITE_TIMEOUT_SECS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.write_timeout_secs);

    let storage = lookup("GOSSIP_STORE_STORAGE")
        .and_then(|v| StorageKind::parse(&v))
        .unwrap_or(defaults.storage);

    let db_path = lookup("GOSSIP_STORE_DB_PATH").unwrap_or(defaults.db_path);

    let api_listen_addr = lookup("GOSSIP_STORE_API_LISTEN_ADDR").unwrap_or(defaults.api_listen_addr);

    let debug = lookup("DEBUG").is_some();

    Config {
        self_address,
        listen_port,
        peers,
        max_connections,
        reconnect_interval_secs,
        connect_timeout_secs,
        write_timeout_secs,
        storage,
        db_path,
        api_listen_addr,
        debug,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_from(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.self_address, "127.0.0.1");
        assert_eq!(config.listen_port, 0);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.storage, StorageKind::Sqlite);
        assert_eq!(config.db_path, "entries.db");
        assert_eq!(config.api_listen_addr, "0.0.0.0:8080");
        assert!(!config.debug);
    }

    #[test]
    fn test_load_with_nothing_set() {
        let config = load(&[]);
        assert_eq!(config.self_address, "127.0.0.1");
        assert_eq!(config.reconnect_interval_secs, 5);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn test_load_overrides() {
        let config = load(&[
            ("GOSSIP_STORE_SELF_ADDRESS", "10.0.0.1"),
            ("GOSSIP_STORE_LISTEN_PORT", "4002"),
            ("GOSSIP_STORE_PEERS", "10.0.0.2:4002, 10.0.0.3:4002,,"),
            ("GOSSIP_STORE_MAX_CONNECTIONS", "2"),
            ("GOSSIP_STORE_STORAGE", "Memory"),
            ("DEBUG", "1"),
        ]);

        assert_eq!(config.self_address, "10.0.0.1");
        assert_eq!(config.listen_port, 4002);
        assert_eq!(config.peers, vec!["10.0.0.2:4002", "10.0.0.3:4002"]);
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.storage, StorageKind::Memory);
        assert!(config.debug);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = load(&[
            ("GOSSIP_STORE_LISTEN_PORT", "99999"),
            ("GOSSIP_STORE_MAX_CONNECTIONS", "many"),
            ("GOSSIP_STORE_RECONNECT_INTERVAL_SECS", "0"),
            ("GOSSIP_STORE_STORAGE", "postgres"),
            ("GOSSIP_STORE_SELF_ADDRESS", ""),
        ]);

        assert_eq!(config.listen_port, 0);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.reconnect_interval_secs, 5);
        assert_eq!(config.storage, StorageKind::Sqlite);
        assert_eq!(config.self_address, "127.0.0.1");
    }

    #[test]
    fn test_replication_config() {
        let config = load(&[
            ("GOSSIP_STORE_SELF_ADDRESS", "10.0.0.1"),
            ("GOSSIP_STORE_LISTEN_PORT", "4002"),
            ("GOSSIP_STORE_WRITE_TIMEOUT_SECS", "3"),
        ]);
        let replication = config.replication_config();

        assert_eq!(replication.self_host, "10.0.0.1");
        assert_eq!(replication.listen_port, 4002);
        assert_eq!(replication.write_timeout, Duration::from_secs(3));
        assert!(replication.validate().is_ok());
    }

    #[test]
    fn test_load_config_from_env() {
        std::env::set_var("GOSSIP_STORE_DB_PATH", "/tmp/gossip-store-test.db");
        let config = load_config().unwrap();
        std::env::remove_var("GOSSIP_STORE_DB_PATH");

        assert_eq!(config.db_path, "/tmp/gossip-store-test.db");
    }
}
