//! Fingerprint catalog lookups
//!
//! The index maps a favicon content hash to the software records known to
//! serve that icon. It is built once at startup and only read afterwards, so
//! it can be shared across every probe without locking.

pub mod dataset;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub use dataset::load_dataset;

/// A known piece of software identified by its favicon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl FingerprintRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Read-only lookup interface consumed by the scan engine
pub trait FingerprintLookup: Send + Sync {
    /// Records registered for `hash`; empty when unknown
    fn lookup(&self, hash: &str) -> Vec<FingerprintRecord>;
}

/// Hash-keyed fingerprint index
#[derive(Debug, Clone, Default)]
pub struct FingerprintIndex {
    by_hash: HashMap<String, Vec<FingerprintRecord>>,
}

impl FingerprintIndex {
    pub fn builder() -> FingerprintIndexBuilder {
        FingerprintIndexBuilder::default()
    }

    /// Number of distinct hashes
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Total number of hash-to-record entries
    pub fn entry_count(&self) -> usize {
        self.by_hash.values().map(Vec::len).sum()
    }
}

impl FingerprintLookup for FingerprintIndex {
    fn lookup(&self, hash: &str) -> Vec<FingerprintRecord> {
        let key = hash.trim().to_ascii_lowercase();
        self.by_hash.get(&key).cloned().unwrap_or_default()
    }
}

/// Accumulates records before the index is frozen
#[derive(Debug, Default)]
pub struct FingerprintIndexBuilder {
    by_hash: HashMap<String, Vec<FingerprintRecord>>,
}

impl FingerprintIndexBuilder {
    /// Register `record` under `hash`; records for the same hash keep insertion order
    pub fn insert(&mut self, hash: &str, record: FingerprintRecord) -> &mut Self {
        let key = hash.trim().to_ascii_lowercase();
        self.by_hash.entry(key).or_default().push(record);
        self
    }

    pub fn with(mut self, hash: &str, record: FingerprintRecord) -> Self {
        self.insert(hash, record);
        self
    }

    pub fn build(self) -> FingerprintIndex {
        FingerprintIndex {
            by_hash: self.by_hash,
        }
    }
}
