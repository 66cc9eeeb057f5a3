//! Filesystem-backed object store.
//!
//! Objects live at `{root}/{namespace}/{bucket}/{object}`. Useful when the
//! issuance tool drops bundles on a shared volume instead of a bucket.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::ObjectStore;
use crate::error::RemoteError;

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, namespace: &str, bucket: &str, object: &str) -> PathBuf {
        self.root.join(namespace).join(bucket).join(object)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn head(&self, namespace: &str, bucket: &str, object: &str) -> Result<bool, RemoteError> {
        let path = self.object_path(namespace, bucket, object);
        let exists = tokio::fs::try_exists(&path).await?;
        trace!(path = %path.display(), exists, "Checked local object");
        Ok(exists)
    }

    async fn get(&self, namespace: &str, bucket: &str, object: &str) -> Result<Bytes, RemoteError> {
        let path = self.object_path(namespace, bucket, object);
        match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!(path = %path.display(), bytes = data.len(), "Read local object");
                Ok(Bytes::from(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RemoteError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
