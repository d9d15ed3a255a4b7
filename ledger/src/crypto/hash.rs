//! # Hashing Utilities
//!
//! Hash functions used by the audit pipeline and the searchable tokenizer.
//! Two functions, two jobs:
//!
//! - **SHA-256**: the audit digest. Every record, log entry and
//!   notification carries the hex SHA-256 of its canonical payload, because
//!   that's what the auditors' tooling already understands.
//!
//! - **BLAKE3 (keyed)**: searchable tokens. BLAKE3's keyed mode is a PRF
//!   out of the box, so we don't need to bolt HMAC on top of anything.
//!
//! ## Canonical payloads
//!
//! A hash is only useful as tamper evidence if semantically identical
//! payloads always produce identical bytes. [`canonical_json`] gets there by
//! routing the payload through `serde_json::Value`, whose object map is a
//! `BTreeMap`, so keys come out sorted no matter what order the struct
//! declared them in, at every nesting level.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
///
/// # Example
///
/// ```
/// use safepay_ledger::crypto::sha256;
///
/// let hash = sha256(b"safepay");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// SHA-256 rendered as lowercase hex. 64 characters, the form stored on
/// every audited row.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Compute the plain BLAKE3 hash of the input data.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Keyed BLAKE3 (a PRF): the same key and input always give the same
/// output, and without the key the output is indistinguishable from random.
pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> blake3::Hash {
    blake3::keyed_hash(key, data)
}

/// Serialize `payload` into canonical bytes with sorted object keys.
///
/// Fails only if the payload can't be represented as JSON at all (maps with
/// non-string keys, for instance). Callers in the audit pipeline treat that
/// as a degraded step, not a hard error.
pub fn canonical_json<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = sort_keys(serde_json::to_value(payload)?);
    serde_json::to_vec(&value)
}

/// Rebuilds every object with keys inserted in sorted order. A no-op with
/// the default `BTreeMap` backing, but keeps the output stable if anything
/// in the dependency graph turns on serde_json's `preserve_order`.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
