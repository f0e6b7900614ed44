//! Boot-asset filesystem for the TFTP daemon.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use ursa_tftp::FileProvider;

/// Read-only provider over a directory tree. Serves `ipxe.efi` and
/// anything else dropped next to the static boot files.
pub struct DirectoryFileProvider {
    root: PathBuf,
}

impl DirectoryFileProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let path = path.trim_start_matches('/');
        if path.split('/').any(|part| part == "..") {
            warn!(path = %path, "blocked path traversal attempt");
            return None;
        }
        Some(self.root.join(path))
    }
}

#[async_trait]
impl FileProvider for DirectoryFileProvider {
    async fn get_file(&self, path: &str) -> Option<Bytes> {
        let full_path = self.resolve(path)?;
        match tokio::fs::read(&full_path).await {
            Ok(contents) => Some(Bytes::from(contents)),
            Err(e) => {
                debug!(path = %full_path.display(), error = %e, "file not found");
                None
            }
        }
    }

    async fn get_file_size(&self, path: &str) -> Option<u64> {
        let full_path = self.resolve(path)?;
        tokio::fs::metadata(&full_path).await.ok().map(|m| m.len())
    }
}
