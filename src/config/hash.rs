//! Content hashing for deployable identities.
//!
//! Anonymous deployables (utilities) are identified by a hash of the
//! attributes that define them, so the hash has to be deterministic across
//! runs and independent of attribute order.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::params::{Params, diffable};

/// Number of hex characters kept in identity suffixes.
const SHORT_HASH_LEN: usize = 32;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hashes the given attributes of a parameter map.
    ///
    /// Missing attributes hash as `null`; lists hash as sets.
    #[must_use]
    pub fn hash_attributes(&self, params: &Params, keys: &[&str]) -> String {
        let mut hasher = Sha256::new();

        let mut sorted = keys.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        for key in sorted {
            let value = params
                .get(key)
                .map_or(serde_json::Value::Null, diffable);
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
            hasher.update(b";");
        }

        Self::short(&hex::encode(hasher.finalize()))
    }

    /// Hashes a file's contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn hash_file(&self, path: impl AsRef<Path>) -> std::io::Result<String> {
        let content = std::fs::read(path)?;
        Ok(Self::hash_bytes(&content))
    }

    /// Hashes raw bytes.
    #[must_use]
    pub fn hash_bytes(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Truncates a hash to the identity suffix length.
    #[must_use]
    pub fn short(hash: &str) -> String {
        hash.chars().take(SHORT_HASH_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn params(value: serde_json::Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_hash_is_deterministic() {
        let hasher = ConfigHasher::new();
        let a = params(json!({"domains": ["a.com", "b.com"], "is_cdn_certificate": false}));
        let b = params(json!({"is_cdn_certificate": false, "domains": ["b.com", "a.com"]}));

        assert_eq!(
            hasher.hash_attributes(&a, &["domains", "is_cdn_certificate"]),
            hasher.hash_attributes(&b, &["is_cdn_certificate", "domains"])
        );
    }

    #[test]
    fn test_hash_ignores_unlisted_attributes() {
        let hasher = ConfigHasher::new();
        let a = params(json!({"export": "DB_HOST", "value": "db1"}));
        let b = params(json!({"export": "DB_HOST", "value": "db2"}));

        assert_eq!(
            hasher.hash_attributes(&a, &["export"]),
            hasher.hash_attributes(&b, &["export"])
        );
        assert_ne!(
            hasher.hash_attributes(&a, &["export", "value"]),
            hasher.hash_attributes(&b, &["export", "value"])
        );
    }

    #[test]
    fn test_short_hash_length() {
        let hasher = ConfigHasher::new();
        let hash = hasher.hash_attributes(&Params::new(), &["anything"]);
        assert_eq!(hash.len(), SHORT_HASH_LEN);
    }

    #[test]
    fn test_hash_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "production:\n  adapter: mysql2\n").unwrap();

        let hasher = ConfigHasher::new();
        let first = hasher.hash_file(file.path()).unwrap();
        assert_eq!(first.len(), 64);
        assert_eq!(first, hasher.hash_file(file.path()).unwrap());
    }
}
