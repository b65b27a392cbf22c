//! Content hashing for lineage records and derived natural keys.

use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 over the key-sorted canonical JSON encoding of a record.
///
/// `serde_json::Value` maps are ordered by key, so two records with equal
/// fields hash identically regardless of struct field order.
pub fn record_hash<T: Serialize>(record: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(record)?;
    let canonical = serde_json::to_string(&value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Collapse inner whitespace and trim; supporter names arrive with uneven
/// spacing across files.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Derived natural key for a supporter: the first 16 hex characters of the
/// SHA-256 of the normalized parliamentarian name. Stable across runs.
pub fn supporter_key(nome: &str) -> String {
    let normalized = normalize_name(nome);
    sha256_hex(normalized.as_bytes())[..16].to_string()
}
