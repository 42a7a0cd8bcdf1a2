//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of the configuration and of
//! resolved attribute maps. Both are serialized to JSON first; every map in
//! them is a `BTreeMap`, so the byte stream is canonical.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::graph::AttrMap;

use super::spec::TerraceConfig;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire configuration.
    ///
    /// This hash changes when any part of the configuration changes.
    #[must_use]
    pub fn hash_config(&self, config: &TerraceConfig) -> String {
        Self::hash_serialized(config)
    }

    /// Computes a hash of a resolved attribute map.
    #[must_use]
    pub fn hash_attributes(&self, attributes: &AttrMap) -> String {
        Self::hash_serialized(attributes)
    }

    fn hash_serialized<T: Serialize>(value: &T) -> String {
        let mut hasher = Sha256::new();
        // Serializing plain data into a Vec cannot fail; an empty buffer still hashes.
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Value;

    fn parse(yaml: &str) -> TerraceConfig {
        serde_yaml::from_str(yaml).expect("valid yaml")
    }

    #[test]
    fn test_config_hash_deterministic() {
        let hasher = ConfigHasher::new();
        let yaml = r"
project: { name: net }
resources:
  - type: network
    name: main
    attributes: { cidr_block: 10.0.0.0/16, tags: { Name: main } }
";
        assert_eq!(hasher.hash_config(&parse(yaml)), hasher.hash_config(&parse(yaml)));
    }

    #[test]
    fn test_attribute_change_changes_hash() {
        let hasher = ConfigHasher::new();
        let mut attrs = AttrMap::new();
        attrs.insert(String::from("port"), Value::Int(80));
        let before = hasher.hash_attributes(&attrs);

        attrs.insert(String::from("port"), Value::Int(443));
        let after = hasher.hash_attributes(&attrs);

        assert_ne!(before, after);
        assert_eq!(before.len(), 64);
    }
}
