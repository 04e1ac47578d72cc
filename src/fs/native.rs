//! Disk-backed filesystem adaptor built on `tokio::fs`.

use async_trait::async_trait;
use std::path::Path;

use super::{FileMetadata, InputFileSystem, OutputFileSystem};

/// The production filesystem: straight passthrough to the host OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFileSystem;

impl NativeFileSystem {
    /// Create the adaptor.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InputFileSystem for NativeFileSystem {
    async fn stat(&self, path: &Path) -> std::io::Result<FileMetadata> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(FileMetadata {
            is_file: meta.is_file(),
            is_dir: meta.is_dir(),
            size: meta.len(),
            mtime: meta.modified().ok(),
        })
    }

    async fn read_file(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }
}

#[async_trait]
impl OutputFileSystem for NativeFileSystem {
    async fn write_file(&self, path: &Path, content: &[u8]) -> std::io::Result<()> {
        tokio::fs::write(path, content).await
    }

    async fn mkdir(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir(path).await
    }
}
