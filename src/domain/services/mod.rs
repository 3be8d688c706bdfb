pub mod signature;

pub use signature::{canonicalize, public_key_hex, sign_entry, signing_payload, verify_entry};
