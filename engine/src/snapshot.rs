//! Snapshot types for persisting and restoring the purchase cache.
//!
//! Snapshots are the bridge between the in-memory cache and the opaque
//! blob store. They serialize deterministically so identical caches always
//! produce identical blobs.

use crate::{cache::CacheMap, error::Result, Error, ProductId, PurchaseRecord, PurchaseState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of the purchase cache.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Cached purchases keyed by product id
    pub entries: BTreeMap<ProductId, PurchaseRecord>,
}

impl CacheSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            entries: BTreeMap::new(),
        }
    }

    /// Capture the contents of a cache map.
    pub fn capture(map: &CacheMap) -> Self {
        let entries = map
            .iter()
            .map(|(id, record)| (id.clone(), PurchaseRecord::clone(record)))
            .collect();
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            entries,
        }
    }

    /// Add an entry.
    pub fn add(&mut self, product_id: impl Into<ProductId>, record: PurchaseRecord) {
        self.entries.insert(product_id.into(), record);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the snapshot has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the cache invariants hold for every entry.
    pub fn validate(&self) -> Result<()> {
        for (product_id, record) in &self.entries {
            if record.state == PurchaseState::Cancelled {
                return Err(Error::InvalidSnapshot(format!(
                    "cancelled purchase cached for '{product_id}'"
                )));
            }
            if !record.covers(product_id) {
                return Err(Error::InvalidSnapshot(format!(
                    "purchase {} does not cover '{product_id}'",
                    record.purchase_token
                )));
            }
        }
        Ok(())
    }

    /// Convert into cache entries, sharing one record per purchase token.
    pub fn into_cache_entries(self) -> Vec<(ProductId, Arc<PurchaseRecord>)> {
        let mut shared: BTreeMap<String, Arc<PurchaseRecord>> = BTreeMap::new();
        self.entries
            .into_iter()
            .map(|(product_id, record)| {
                let record = match shared.get(&record.purchase_token) {
                    Some(existing) if **existing == record => Arc::clone(existing),
                    _ => {
                        let record = Arc::new(record);
                        shared.insert(record.purchase_token.clone(), Arc::clone(&record));
                        record
                    }
                };
                (product_id, record)
            })
            .collect()
    }

    /// Serialize to bytes with deterministic ordering.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_slice(bytes).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        // Validate format version
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

impl Default for CacheSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PurchaseCache;

    #[test]
    fn create_empty_snapshot() {
        let snapshot = CacheSnapshot::new();
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn bytes_roundtrip() {
        let cache = PurchaseCache::new();
        cache.put_record(
            PurchaseRecord::new("a", "T1")
                .with_product("b")
                .with_original_json(r#"{"k": "v"}"#),
        );
        cache.put("c", PurchaseRecord::new("c", "T2").with_acknowledged(true));

        let snapshot = CacheSnapshot::capture(&cache.snapshot());
        let bytes = snapshot.to_bytes().unwrap();
        let restored = CacheSnapshot::from_bytes(&bytes).unwrap();

        assert_eq!(snapshot, restored);
        assert_eq!(restored.len(), 3);
    }

    #[test]
    fn deterministic_serialization() {
        let mut first = CacheSnapshot::new();
        let mut second = CacheSnapshot::new();

        first.add("a", PurchaseRecord::new("a", "T1"));
        first.add("b", PurchaseRecord::new("b", "T2"));

        // Add in reverse order
        second.add("b", PurchaseRecord::new("b", "T2"));
        second.add("a", PurchaseRecord::new("a", "T1"));

        assert_eq!(first.to_bytes().unwrap(), second.to_bytes().unwrap());
    }

    #[test]
    fn restored_bundle_shares_record() {
        let mut snapshot = CacheSnapshot::new();
        let bundle = PurchaseRecord::new("a", "T").with_product("b");
        snapshot.add("a", bundle.clone());
        snapshot.add("b", bundle);

        let entries = snapshot.into_cache_entries();
        assert_eq!(entries.len(), 2);
        assert!(Arc::ptr_eq(&entries[0].1, &entries[1].1));
    }

    #[test]
    fn validate_rejects_cancelled() {
        let mut snapshot = CacheSnapshot::new();
        snapshot.add(
            "a",
            PurchaseRecord::new("a", "T").with_state(PurchaseState::Cancelled),
        );

        assert!(matches!(
            snapshot.validate(),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn validate_rejects_foreign_key() {
        let mut snapshot = CacheSnapshot::new();
        snapshot.add("b", PurchaseRecord::new("a", "T"));

        assert!(matches!(
            snapshot.validate(),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn reject_future_format_version() {
        let json = br#"{"formatVersion": 999, "entries": {}}"#;
        let result = CacheSnapshot::from_bytes(json);
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn reject_garbage() {
        assert!(matches!(
            CacheSnapshot::from_bytes(b"not json"),
            Err(Error::InvalidSnapshot(_))
        ));
    }
}
