use std::future::Future;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use lobby_types::blob::{BlobError, BlobStore};

/// On-disk blob storage.
///
/// A blob put at `a/b.png` lives at `{dir}/a/b.png` and is served at
/// `{base_url}/blobs/a/b.png` by [`crate::router`].
pub struct BlobStorage {
    dir: PathBuf,
    base_url: String,
}

impl BlobStorage {
    pub async fn new(dir: PathBuf, base_url: impl Into<String>) -> Result<Self, BlobError> {
        fs::create_dir_all(&dir).await?;
        info!("Blob storage directory: {}", dir.display());
        Ok(Self {
            dir,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a blob path inside the storage directory. Only plain relative
    /// components are accepted.
    pub fn file_path(&self, path: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(path);
        let plain = !path.is_empty()
            && !path.contains('\\')
            && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(BlobError::InvalidPath(path.to_string()));
        }
        Ok(self.dir.join(relative))
    }

    pub async fn read(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        Ok(fs::read(self.file_path(path)?).await?)
    }
}

impl BlobStore for BlobStorage {
    fn put(&self, path: &str, blob: Bytes) -> impl Future<Output = Result<(), BlobError>> + Send {
        let target = self.file_path(path);
        async move {
            let target = target?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }

            let mut file = fs::File::create(&target).await?;
            file.write_all(&blob).await?;
            file.flush().await?;

            debug!("Stored {} bytes at {}", blob.len(), target.display());
            Ok(())
        }
    }

    fn public_url_for(&self, path: &str) -> String {
        format!("{}/blobs/{}", self.base_url, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> BlobStorage {
        let dir = std::env::temp_dir().join(format!("lobby_blob_test_{}", uuid::Uuid::new_v4()));
        BlobStorage::new(dir, "http://localhost:3000/").await.unwrap()
    }

    #[tokio::test]
    async fn put_writes_nested_file() {
        let storage = storage().await;
        storage
            .put("user/one.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(storage.read("user/one.txt").await.unwrap(), b"hello");
        let _ = std::fs::remove_dir_all(storage.dir());
    }

    #[tokio::test]
    async fn rejects_paths_outside_the_directory() {
        let storage = storage().await;
        for bad in ["", "../escape", "/etc/passwd", "a/../../b", "a\\b", "./a"] {
            let result = storage.put(bad, Bytes::from_static(b"x")).await;
            assert!(
                matches!(result, Err(BlobError::InvalidPath(_))),
                "{bad:?} was accepted"
            );
        }
        let _ = std::fs::remove_dir_all(storage.dir());
    }

    #[tokio::test]
    async fn public_url_joins_base_and_path() {
        let storage = storage().await;
        assert_eq!(
            storage.public_url_for("u/cat.png"),
            "http://localhost:3000/blobs/u/cat.png"
        );
        let _ = std::fs::remove_dir_all(storage.dir());
    }
}
