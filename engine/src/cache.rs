//! Purchase cache - the in-memory entitlement state.
//!
//! Readers load an immutable map through [`ArcSwap`] and never block.
//! Every writer goes through one mutex and publishes a complete new map,
//! so a reader sees either the old contents or the new contents, never a
//! mix of both.

use crate::{ProductId, PurchaseRecord};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable view of the cache contents.
pub type CacheMap = HashMap<ProductId, Arc<PurchaseRecord>>;

/// Mapping from product id to the last known purchase covering it.
///
/// Cancelled records are never stored.
#[derive(Debug)]
pub struct PurchaseCache {
    entries: ArcSwap<CacheMap>,
    write_lock: Mutex<()>,
}

impl PurchaseCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the purchase covering a product.
    pub fn get(&self, product_id: &str) -> Option<Arc<PurchaseRecord>> {
        self.entries.load().get(product_id).cloned()
    }

    /// Check whether a product has a cached purchase.
    pub fn contains(&self, product_id: &str) -> bool {
        self.entries.load().contains_key(product_id)
    }

    /// Number of cached product ids.
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Immutable copy of the current contents.
    pub fn snapshot(&self) -> Arc<CacheMap> {
        self.entries.load_full()
    }

    /// Insert or overwrite the entry for one product.
    ///
    /// Cancelled records are ignored.
    pub fn put(&self, product_id: impl Into<ProductId>, record: PurchaseRecord) {
        if !Self::storable(&record) {
            return;
        }
        let product_id = product_id.into();
        let record = Arc::new(record);
        self.update(|map| {
            map.insert(product_id, record);
        });
    }

    /// Insert or overwrite entries for every product the record covers.
    pub fn put_record(&self, record: PurchaseRecord) {
        if !Self::storable(&record) {
            return;
        }
        let record = Arc::new(record);
        self.update(|map| {
            for product_id in &record.products {
                map.insert(product_id.clone(), Arc::clone(&record));
            }
        });
    }

    /// Remove the entry for a product, returning it.
    pub fn remove(&self, product_id: &str) -> Option<Arc<PurchaseRecord>> {
        let mut removed = None;
        self.update(|map| removed = map.remove(product_id));
        removed
    }

    /// Remove every entry backed by the given purchase token.
    pub fn remove_token(&self, token: &str) -> usize {
        let mut removed = 0;
        self.update(|map| {
            let before = map.len();
            map.retain(|_, r| r.purchase_token != token);
            removed = before - map.len();
        });
        removed
    }

    /// Mark every entry backed by the given token as acknowledged.
    pub fn mark_acknowledged(&self, token: &str) -> usize {
        let mut marked = 0;
        self.update(|map| {
            for record in map.values_mut() {
                if record.purchase_token == token && !record.acknowledged {
                    Arc::make_mut(record).acknowledged = true;
                    marked += 1;
                }
            }
        });
        marked
    }

    /// Replace the whole contents at once.
    ///
    /// The new map is fully built before it is published.
    pub fn replace_all(&self, entries: impl IntoIterator<Item = (ProductId, Arc<PurchaseRecord>)>) {
        let map: CacheMap = entries
            .into_iter()
            .filter(|(_, record)| Self::storable(record))
            .collect();
        let _guard = self.write_lock.lock();
        self.entries.store(Arc::new(map));
    }

    fn update(&self, mutate: impl FnOnce(&mut CacheMap)) {
        let _guard = self.write_lock.lock();
        let mut map = (*self.entries.load_full()).clone();
        mutate(&mut map);
        self.entries.store(Arc::new(map));
    }

    fn storable(record: &PurchaseRecord) -> bool {
        record.state != crate::PurchaseState::Cancelled
    }
}

impl Default for PurchaseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PurchaseState;

    #[test]
    fn put_get_remove() {
        let cache = PurchaseCache::new();
        cache.put("coins_100", PurchaseRecord::new("coins_100", "T1"));

        assert!(cache.contains("coins_100"));
        assert_eq!(cache.get("coins_100").unwrap().purchase_token, "T1");

        let removed = cache.remove("coins_100").unwrap();
        assert_eq!(removed.purchase_token, "T1");
        assert!(cache.is_empty());
        assert!(cache.remove("coins_100").is_none());
    }

    #[test]
    fn bundle_shares_one_record() {
        let cache = PurchaseCache::new();
        cache.put_record(PurchaseRecord::new("a", "T").with_product("b"));

        assert_eq!(cache.len(), 2);
        let a = cache.get("a").unwrap();
        let b = cache.get("b").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn cancelled_records_are_never_stored() {
        let cache = PurchaseCache::new();
        cache.put(
            "a",
            PurchaseRecord::new("a", "T").with_state(PurchaseState::Cancelled),
        );
        cache.put_record(PurchaseRecord::new("b", "T").with_state(PurchaseState::Cancelled));
        cache.replace_all(vec![(
            "c".to_string(),
            Arc::new(PurchaseRecord::new("c", "T").with_state(PurchaseState::Cancelled)),
        )]);

        assert!(cache.is_empty());
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let cache = PurchaseCache::new();
        cache.put("a", PurchaseRecord::new("a", "T1"));

        let before = cache.snapshot();
        cache.replace_all(vec![(
            "b".to_string(),
            Arc::new(PurchaseRecord::new("b", "T2")),
        )]);

        assert!(before.contains_key("a"));
        assert!(!before.contains_key("b"));
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn mark_acknowledged_updates_all_keys_of_token() {
        let cache = PurchaseCache::new();
        cache.put_record(PurchaseRecord::new("a", "T").with_product("b"));
        cache.put("c", PurchaseRecord::new("c", "other"));

        assert_eq!(cache.mark_acknowledged("T"), 2);
        assert!(cache.get("a").unwrap().acknowledged);
        assert!(cache.get("b").unwrap().acknowledged);
        assert!(!cache.get("c").unwrap().acknowledged);
        assert_eq!(cache.mark_acknowledged("T"), 0);
    }

    #[test]
    fn remove_token_drops_every_key() {
        let cache = PurchaseCache::new();
        cache.put_record(PurchaseRecord::new("a", "T").with_product("b"));
        cache.put("c", PurchaseRecord::new("c", "U"));

        assert_eq!(cache.remove_token("T"), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_writers_never_lose_entries() {
        let cache = Arc::new(PurchaseCache::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let id = format!("p_{t}_{i}");
                        cache.put(id.clone(), PurchaseRecord::new(id, "T"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 8 * 50);
    }
}
