//! Persistent storage seam.
//!
//! The engine treats storage as an opaque key/blob store and owns the
//! encoding of the purchase cache through [`CacheSnapshot`].

use crate::{error::Result, CacheSnapshot, PurchaseCache};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Opaque key/blob storage consumed by the engine.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Load the blob stored under `key`, if any.
    async fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key`, replacing any previous blob.
    async fn save_blob(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
}

/// In-memory blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Raw contents under a key.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(key).cloned()
    }

    /// Overwrite the raw contents under a key.
    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.blobs.lock().insert(key.into(), bytes);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(key))
    }

    async fn save_blob(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.insert(key, bytes);
        Ok(())
    }
}

/// Mirrors the purchase cache into a blob store.
///
/// Saving is best-effort: failures are logged and the in-memory cache stays
/// authoritative. Saves are serialized and each captures the cache only once
/// it holds the write lock, so the last blob written is never older than the
/// last save requested.
#[derive(Clone)]
pub(crate) struct CacheMirror {
    store: Option<Arc<dyn BlobStore>>,
    key: String,
    writing: Arc<tokio::sync::Mutex<()>>,
}

impl CacheMirror {
    pub(crate) fn new(store: Option<Arc<dyn BlobStore>>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            writing: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Persist the current cache contents. Returns whether a blob was written.
    pub(crate) async fn save(&self, cache: &PurchaseCache) -> bool {
        let Some(store) = &self.store else {
            return false;
        };

        let _writing = self.writing.lock().await;
        let snapshot = CacheSnapshot::capture(&cache.snapshot());
        let written = match snapshot.to_bytes() {
            Ok(bytes) => store.save_blob(&self.key, bytes).await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                tracing::debug!(key = %self.key, entries = snapshot.len(), "Purchase cache persisted");
                true
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to persist purchase cache");
                false
            }
        }
    }

    /// Load and validate the persisted snapshot.
    pub(crate) async fn restore(&self) -> Result<Option<CacheSnapshot>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(bytes) = store.load_blob(&self.key).await? else {
            return Ok(None);
        };
        let snapshot = CacheSnapshot::from_bytes(&bytes)?;
        snapshot.validate()?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, PurchaseRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct FailingStore;

    /// Holds the first save back until later ones could have landed.
    #[derive(Default)]
    struct SlowFirstSave {
        inner: MemoryBlobStore,
        saves: AtomicUsize,
        first_started: Notify,
    }

    #[async_trait]
    impl BlobStore for SlowFirstSave {
        async fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.load_blob(key).await
        }

        async fn save_blob(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
            if self.saves.fetch_add(1, Ordering::SeqCst) == 0 {
                self.first_started.notify_one();
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            self.inner.save_blob(key, bytes).await
        }
    }

    #[async_trait]
    impl BlobStore for FailingStore {
        async fn load_blob(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err(Error::Storage("disk unavailable".into()))
        }

        async fn save_blob(&self, _key: &str, _bytes: Vec<u8>) -> Result<()> {
            Err(Error::Storage("disk unavailable".into()))
        }
    }

    #[tokio::test]
    async fn save_then_restore() {
        let store = MemoryBlobStore::new_shared();
        let mirror = CacheMirror::new(Some(store.clone()), "purchases");

        let cache = PurchaseCache::new();
        cache.put("coins_100", PurchaseRecord::new("coins_100", "T1"));

        assert!(mirror.save(&cache).await);
        assert!(store.get("purchases").is_some());

        let restored = mirror.restore().await.unwrap().unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.entries["coins_100"].purchase_token, "T1");
    }

    #[tokio::test]
    async fn restore_without_blob() {
        let mirror = CacheMirror::new(Some(MemoryBlobStore::new_shared()), "purchases");
        assert_eq!(mirror.restore().await.unwrap(), None);

        let detached = CacheMirror::new(None, "purchases");
        assert_eq!(detached.restore().await.unwrap(), None);
        assert!(!detached.save(&PurchaseCache::new()).await);
    }

    #[tokio::test]
    async fn save_failure_is_swallowed() {
        let mirror = CacheMirror::new(Some(Arc::new(FailingStore)), "purchases");
        assert!(!mirror.save(&PurchaseCache::new()).await);
    }

    #[tokio::test]
    async fn later_save_is_never_overwritten_by_earlier_one() {
        let store = Arc::new(SlowFirstSave::default());
        let mirror = CacheMirror::new(Some(store.clone()), "purchases");
        let cache = Arc::new(PurchaseCache::new());
        cache.put_record(PurchaseRecord::new("coins_100", "T1"));

        let first = tokio::spawn({
            let mirror = mirror.clone();
            let cache = Arc::clone(&cache);
            async move { mirror.save(&cache).await }
        });
        store.first_started.notified().await;

        cache.remove_token("T1");
        assert!(mirror.save(&cache).await);
        assert!(first.await.unwrap());

        let restored = mirror.restore().await.unwrap().unwrap();
        assert!(restored.is_empty());
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restore_rejects_corrupt_blob() {
        let store = MemoryBlobStore::new_shared();
        store.insert("purchases", b"{broken".to_vec());
        let mirror = CacheMirror::new(Some(store), "purchases");

        assert!(matches!(
            mirror.restore().await,
            Err(Error::InvalidSnapshot(_))
        ));
    }
}
