//! Replication Types
//!
//! Wire frames, replication messages and peer address helpers.

use crate::domain::entities::Entry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::IpAddr;

/// A frame exchanged between peers, tagged by `kind`.
///
/// Unknown kinds fail to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Frame {
    /// Handshake sent once by the dialing side, announcing where it listens.
    PeerInfo {
        #[serde(rename = "listenAddress")]
        listen_address: String,
        #[serde(rename = "listenPort")]
        listen_port: u16,
    },
    /// Opaque application payload.
    PeerData { payload: Value },
}

impl Frame {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::PeerInfo { .. } => "PeerInfo",
            Frame::PeerData { .. } => "PeerData",
        }
    }
}

/// Application message carried in `PeerData`, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ReplicationMessage {
    InsertOne(InsertOneMessage),
}

/// Propagated insert of one signed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOneMessage {
    /// Every address known to already hold the entry.
    #[serde(default)]
    pub exclude_addresses: Vec<String>,
    pub name: String,
    #[serde(default)]
    pub owner_public_key: Option<String>,
    pub entry: Entry,
}

impl ReplicationMessage {
    pub fn insert_one(
        name: impl Into<String>,
        owner_public_key: Option<String>,
        entry: Entry,
        exclude_addresses: Vec<String>,
    ) -> Self {
        Self::InsertOne(InsertOneMessage {
            exclude_addresses,
            name: name.into(),
            owner_public_key,
            entry,
        })
    }

    pub fn action_name(&self) -> &'static str {
        match self {
            ReplicationMessage::InsertOne(_) => "InsertOne",
        }
    }
}

/// Format a `host:port` peer address.
pub fn format_address(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Split a `host:port` peer address. Brackets around IPv6 hosts are removed.
pub fn split_address(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    Some((host, port))
}

/// Hosts that always denote the local machine.
pub fn is_loopback_alias(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "0.0.0.0" | "::")
}

/// One spelling per peer: loopback aliases become `127.0.0.1`, IP literals
/// are written in their canonical form and other hosts are kept as given.
/// Addresses that do not parse are returned unchanged.
pub fn canonical_address(address: &str) -> String {
    let Some((host, port)) = split_address(address) else {
        return address.to_string();
    };
    let host = match host.parse::<IpAddr>() {
        Ok(ip) => ip.to_canonical().to_string(),
        Err(_) => host.to_string(),
    };
    if is_loopback_alias(&host) {
        format_address("127.0.0.1", port)
    } else {
        format_address(&host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_peer_info_wire_shape() {
        let frame = Frame::PeerInfo {
            listen_address: "10.0.0.1".to_string(),
            listen_port: 4002,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            json!({ "kind": "PeerInfo", "listenAddress": "10.0.0.1", "listenPort": 4002 })
        );
    }

    #[test]
    fn test_peer_data_wire_shape() {
        let frame = Frame::PeerData {
            payload: json!({ "x": 1 }),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json, json!({ "kind": "PeerData", "payload": { "x": 1 } }));
        assert_eq!(frame.kind_name(), "PeerData");
    }

    #[test]
    fn test_unknown_frame_kind_rejected() {
        let result: Result<Frame, _> =
            serde_json::from_value(json!({ "kind": "PeerGossip", "payload": {} }));
        assert!(result.is_err());

        let result: Result<Frame, _> = serde_json::from_value(json!({ "payload": {} }));
        assert!(result.is_err());
    }

    #[test]
    fn test_insert_one_wire_shape() {
        let entry = Entry::new("e1").with_field("title", "Blue");
        let msg = ReplicationMessage::insert_one(
            "songs",
            Some("ab".to_string()),
            entry,
            vec!["127.0.0.1:4002".to_string()],
        );

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["action"], "InsertOne");
        assert_eq!(json["name"], "songs");
        assert_eq!(json["ownerPublicKey"], "ab");
        assert_eq!(json["excludeAddresses"], json!(["127.0.0.1:4002"]));
        assert_eq!(json["entry"]["entryId"], "e1");
        assert_eq!(json["entry"]["title"], "Blue");
        assert_eq!(msg.action_name(), "InsertOne");
    }

    #[test]
    fn test_insert_one_defaults() {
        let msg: ReplicationMessage = serde_json::from_value(json!({
            "action": "InsertOne",
            "name": "songs",
            "entry": { "entryId": "e1", "signature": "" }
        }))
        .unwrap();

        let ReplicationMessage::InsertOne(insert) = msg;
        assert!(insert.exclude_addresses.is_empty());
        assert!(insert.owner_public_key.is_none());
    }

    #[test]
    fn test_unknown_action_rejected() {
        let result: Result<ReplicationMessage, _> =
            serde_json::from_value(json!({ "action": "DeleteOne", "name": "songs" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_address_helpers() {
        assert_eq!(format_address("127.0.0.1", 4002), "127.0.0.1:4002");
        assert_eq!(format_address("::1", 4002), "[::1]:4002");
        assert_eq!(split_address("127.0.0.1:4002"), Some(("127.0.0.1", 4002)));
        assert_eq!(split_address("[::1]:4002"), Some(("::1", 4002)));
        assert_eq!(split_address("localhost:80"), Some(("localhost", 80)));
        assert_eq!(split_address("no-port"), None);
        assert_eq!(split_address("host:notaport"), None);
    }

    #[test]
    fn test_loopback_aliases() {
        assert!(is_loopback_alias("localhost"));
        assert!(is_loopback_alias("127.0.0.1"));
        assert!(is_loopback_alias("::1"));
        assert!(is_loopback_alias("0.0.0.0"));
        assert!(!is_loopback_alias("10.0.0.1"));
    }

    #[test]
    fn test_canonical_address() {
        assert_eq!(canonical_address("localhost:4002"), "127.0.0.1:4002");
        assert_eq!(canonical_address("127.0.0.1:4002"), "127.0.0.1:4002");
        assert_eq!(canonical_address("[::1]:4002"), "127.0.0.1:4002");
        assert_eq!(canonical_address("[0:0:0:0:0:0:0:1]:4002"), "127.0.0.1:4002");
        assert_eq!(canonical_address("127.0.0.5:4002"), "127.0.0.5:4002");
        assert_eq!(canonical_address("[::ffff:10.0.0.1]:4002"), "10.0.0.1:4002");
        assert_eq!(canonical_address("[fe80::1]:4002"), "[fe80::1]:4002");
        assert_eq!(canonical_address("node-b:4002"), "node-b:4002");
        assert_eq!(canonical_address("garbage"), "garbage");
    }
}
