//! File-backed blob store.
//!
//! One file per key under a directory. Each write goes to its own temporary
//! file that is renamed over the target, so a crash never leaves a
//! half-written blob and concurrent writers never share a temporary file.

use async_trait::async_trait;
use entitle_engine::{BlobStore, Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Stores blobs as files in a directory.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

fn storage_error(path: &Path, e: std::io::Error) -> Error {
    Error::Storage(format!("{}: {e}", path.display()))
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(&path, e)),
        }
    }

    async fn save_blob(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_error(&self.dir, e))?;

        let path = self.path_for(key);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| storage_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error(&path, e))?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Blob written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("entitle-demo-{}-{name}", std::process::id()))
    }

    #[tokio::test]
    async fn missing_blob_is_none() {
        let store = FileBlobStore::new(scratch_dir("missing"));
        assert_eq!(store.load_blob("purchases").await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = scratch_dir("roundtrip");
        let store = FileBlobStore::new(&dir);

        store.save_blob("purchases", b"{}".to_vec()).await.unwrap();
        store.save_blob("purchases", b"{\"a\":1}".to_vec()).await.unwrap();

        assert_eq!(
            store.load_blob("purchases").await.unwrap(),
            Some(b"{\"a\":1}".to_vec())
        );
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn concurrent_saves_all_land() {
        let dir = scratch_dir("concurrent");
        let store = FileBlobStore::new(&dir);

        let writes: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .save_blob("purchases", format!("{{\"n\":{i}}}").into_bytes())
                        .await
                })
            })
            .collect();
        for write in writes {
            write.await.unwrap().unwrap();
        }

        let stored = store.load_blob("purchases").await.unwrap().unwrap();
        assert!(String::from_utf8(stored).unwrap().starts_with("{\"n\":"));

        let mut leftovers = tokio::fs::read_dir(&dir).await.unwrap();
        let mut files = 0;
        while let Some(entry) = leftovers.next_entry().await.unwrap() {
            assert_eq!(entry.file_name(), "purchases.json");
            files += 1;
        }
        assert_eq!(files, 1);
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[test]
    fn keys_are_sanitized() {
        let store = FileBlobStore::new("/data");
        assert_eq!(
            store.path_for("../etc/passwd"),
            PathBuf::from("/data/___etc_passwd.json")
        );
    }
}
