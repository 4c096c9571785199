//! Local filesystem blob store. References are `file://` URIs that must
//! resolve inside the configured base directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use portal_core::error::PortalError;
use portal_core::ports::{BlobStore, Result};

pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for_key(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(PortalError::Validation(format!("invalid storage key {key}")));
        }
        Ok(self.base_path.join(relative))
    }

    /// Extract path from blob_ref (file:// URI)
    fn path_from_ref(&self, blob_ref: &str) -> Result<PathBuf> {
        let path = blob_ref
            .strip_prefix("file://")
            .map(PathBuf::from)
            .ok_or_else(|| {
                PortalError::Internal(anyhow::anyhow!("expected file:// prefix: {blob_ref}"))
            })?;
        let escapes = path.components().any(|c| matches!(c, Component::ParentDir));
        if escapes || !path.starts_with(&self.base_path) {
            return Err(PortalError::Internal(anyhow::anyhow!(
                "blob reference outside storage root: {blob_ref}"
            )));
        }
        Ok(path)
    }
}

fn io_error(e: std::io::Error) -> PortalError {
    PortalError::Internal(e.into())
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn store(&self, key: &str, content: &[u8], _content_type: &str) -> Result<String> {
        let path = self.path_for_key(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        tokio::fs::write(&path, content).await.map_err(io_error)?;
        Ok(format!("file://{}", path.display()))
    }

    async fn fetch(&self, blob_ref: &str) -> Result<Vec<u8>> {
        let path = self.path_from_ref(blob_ref)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PortalError::NotFound(format!("blob {blob_ref}")))
            }
            Err(e) => Err(io_error(e)),
        }
    }

    async fn delete(&self, blob_ref: &str) -> Result<()> {
        let path = self.path_from_ref(blob_ref)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_fetch_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        let blob_ref = store
            .store("proposals/abc/document/file.pdf", b"%PDF-1.4", "application/pdf")
            .await
            .unwrap();
        assert!(blob_ref.starts_with("file://"));
        assert_eq!(store.fetch(&blob_ref).await.unwrap(), b"%PDF-1.4");

        store.delete(&blob_ref).await.unwrap();
        assert!(matches!(
            store.fetch(&blob_ref).await,
            Err(PortalError::NotFound(_))
        ));
        // Deleting again is fine.
        store.delete(&blob_ref).await.unwrap();
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(store.store("../escape.txt", b"x", "text/plain").await.is_err());
        assert!(store.fetch("file:///etc/passwd").await.is_err());
        assert!(store.fetch("s3://bucket/key").await.is_err());
    }
}
