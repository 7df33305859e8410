// src/utils/serialization.rs
//! Serialization utilities for the vault.
//!
//! Provides:
//! - Deterministic (canonical) JSON encoding used for hashing and signing
//! - Serde adapters for binary fields carried as hex or base64 strings

use serde::Serialize;
use serde_json::{Map, Value};

/// Rebuilds every object in `value` with its keys in ascending order.
///
/// `serde_json::Map` keeps insertion order when the `preserve_order` feature
/// is enabled anywhere in the dependency graph, so ordering is enforced here
/// rather than assumed.
pub fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Compact JSON with all object keys sorted. Used where no fixed field order
/// is prescribed.
pub fn to_canonical_json<T: Serialize>(data: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(data)?;
    serde_json::to_vec(&sort_keys(value))
}

/// `0x`-prefixed hex encoding for byte vectors.
pub mod hex_bytes {
    use ethers::utils::hex;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

/// Standard base64 encoding for byte vectors.
pub mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Base64 encoding for the 12-byte AEAD nonce.
pub mod base64_nonce {
    use crate::utils::crypto::NONCE_LEN;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(nonce: &[u8; NONCE_LEN], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(nonce))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; NONCE_LEN], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = base64::decode(s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| serde::de::Error::custom(format!("nonce must be {} bytes, got {}", NONCE_LEN, v.len())))
    }
}
