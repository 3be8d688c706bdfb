//! Entry Signatures
//!
//! Entries are signed with Ed25519 over their canonical JSON form: object
//! keys sorted at every depth, no whitespace, and `signature` set to `""`.
//! Signer and verifier must produce byte-identical payloads.

use crate::domain::entities::Entry;
use crate::domain::errors::SignatureError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::{Map, Value};

/// Rebuild `value` with object keys inserted in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));

            let mut sorted = Map::new();
            for (key, inner) in pairs {
                sorted.insert(key.clone(), canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Bytes covered by an entry's signature.
pub fn signing_payload(entry: &Entry) -> Result<Vec<u8>, SignatureError> {
    let mut document =
        serde_json::to_value(entry).map_err(|e| SignatureError::Encoding(e.to_string()))?;
    if let Value::Object(map) = &mut document {
        map.insert("signature".to_string(), Value::String(String::new()));
    }
    serde_json::to_vec(&canonicalize(&document)).map_err(|e| SignatureError::Encoding(e.to_string()))
}

/// Sign `entry` in place with `key`.
pub fn sign_entry(entry: &mut Entry, key: &SigningKey) -> Result<(), SignatureError> {
    let payload = signing_payload(entry)?;
    entry.signature = hex::encode(key.sign(&payload).to_bytes());
    Ok(())
}

/// Hex encoding of the verifying half of `key`.
pub fn public_key_hex(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_bytes())
}

/// Verify `entry.signature` against the hex-encoded public key.
pub fn verify_entry(entry: &Entry, public_key_hex: &str) -> Result<(), SignatureError> {
    let key_bytes: [u8; 32] = hex::decode(public_key_hex)
        .map_err(|e| SignatureError::MalformedKey(e.to_string()))?
        .try_into()
        .map_err(|bytes: Vec<u8>| {
            SignatureError::MalformedKey(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| SignatureError::MalformedKey(e.to_string()))?;

    let signature_bytes: [u8; 64] = hex::decode(&entry.signature)
        .map_err(|e| SignatureError::MalformedSignature(e.to_string()))?
        .try_into()
        .map_err(|bytes: Vec<u8>| {
            SignatureError::MalformedSignature(format!("expected 64 bytes, got {}", bytes.len()))
        })?;
    let signature = Signature::from_bytes(&signature_bytes);

    let payload = signing_payload(entry)?;
    key.verify(&payload, &signature)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn test_canonicalize_sorts_keys_recursively() {
        let value = json!({ "b": 1, "a": { "z": true, "m": [ { "y": 1, "x": 2 } ] } });
        let encoded = serde_json::to_string(&canonicalize(&value)).unwrap();
        assert_eq!(encoded, r#"{"a":{"m":[{"x":2,"y":1}],"z":true},"b":1}"#);
    }

    #[test]
    fn test_payload_ignores_signature_value() {
        let mut entry = Entry::new("e1").with_field("title", "Blue");
        let before = signing_payload(&entry).unwrap();
        entry.signature = "ffff".to_string();
        let after = signing_payload(&entry).unwrap();

        assert_eq!(before, after);
        assert_eq!(
            String::from_utf8(before).unwrap(),
            r#"{"entryId":"e1","signature":"","title":"Blue"}"#
        );
    }

    #[test]
    fn test_sign_then_verify() {
        let signer = key(7);
        let mut entry = Entry::new("e1").with_field("title", "Blue");
        sign_entry(&mut entry, &signer).unwrap();

        assert_eq!(entry.signature.len(), 128);
        assert!(verify_entry(&entry, &public_key_hex(&signer)).is_ok());
    }

    #[test]
    fn test_tampered_entry_fails() {
        let signer = key(7);
        let mut entry = Entry::new("e1").with_field("title", "Blue");
        sign_entry(&mut entry, &signer).unwrap();
        entry.fields.insert("title".to_string(), json!("Court and Spark"));

        assert_eq!(
            verify_entry(&entry, &public_key_hex(&signer)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let mut entry = Entry::new("e1");
        sign_entry(&mut entry, &key(7)).unwrap();

        assert_eq!(
            verify_entry(&entry, &public_key_hex(&key(8))),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_malformed_signature() {
        let mut entry = Entry::new("e1");
        entry.signature = "not-hex".to_string();
        let result = verify_entry(&entry, &public_key_hex(&key(7)));
        assert!(matches!(result, Err(SignatureError::MalformedSignature(_))));

        entry.signature = "abcd".to_string();
        let result = verify_entry(&entry, &public_key_hex(&key(7)));
        assert!(matches!(result, Err(SignatureError::MalformedSignature(_))));
    }

    #[test]
    fn test_malformed_key() {
        let mut entry = Entry::new("e1");
        sign_entry(&mut entry, &key(7)).unwrap();

        let result = verify_entry(&entry, "zz");
        assert!(matches!(result, Err(SignatureError::MalformedKey(_))));

        let result = verify_entry(&entry, "abcd");
        assert!(matches!(result, Err(SignatureError::MalformedKey(_))));
    }
}
