use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob path '{0}'")]
    InvalidPath(String),

    #[error("blob storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Content storage that hands back a retrievable URL for stored blobs.
pub trait BlobStore: Send + Sync + 'static {
    fn put(&self, path: &str, blob: Bytes) -> impl Future<Output = Result<(), BlobError>> + Send;

    fn public_url_for(&self, path: &str) -> String;
}

impl<B: BlobStore> BlobStore for Arc<B> {
    fn put(&self, path: &str, blob: Bytes) -> impl Future<Output = Result<(), BlobError>> + Send {
        (**self).put(path, blob)
    }

    fn public_url_for(&self, path: &str) -> String {
        (**self).public_url_for(path)
    }
}
