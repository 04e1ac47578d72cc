//! # Filesystem Abstraction
//!
//! The driver consumes four filesystem surfaces: input (module reads),
//! output (asset writes), intermediate (records sidecar), and watch (change
//! events). All of them are trait objects so tests and child compilers can
//! swap in the in-memory implementation.
//!
//! The only algorithmic helper owned by the driver is [`mkdirp`].

mod memory;
mod native;
mod watcher;

pub use memory::MemoryFileSystem;
pub use native::NativeFileSystem;
pub use watcher::{NotifyWatchFileSystem, WatchEventBatch, WatchFileSystem, WatchSubscription};

use async_trait::async_trait;
use std::path::Path;
use std::time::SystemTime;

// =============================================================================
// Metadata
// =============================================================================

/// Result of a `stat` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    /// The path names a regular file
    pub is_file: bool,
    /// The path names a directory
    pub is_dir: bool,
    /// Content length in bytes; zero for directories
    pub size: u64,
    /// Last modification time when the backend reports one
    pub mtime: Option<SystemTime>,
}

// =============================================================================
// Filesystem Surfaces
// =============================================================================

/// Read surface used for module sources and the records sidecar.
#[async_trait]
pub trait InputFileSystem: Send + Sync {
    /// Stat a path.
    async fn stat(&self, path: &Path) -> std::io::Result<FileMetadata>;

    /// Read a whole file.
    async fn read_file(&self, path: &Path) -> std::io::Result<Vec<u8>>;

    /// Drop any caches the backend keeps between builds.
    fn purge(&self) {}
}

/// Write surface used for asset emission and records persistence.
#[async_trait]
pub trait OutputFileSystem: InputFileSystem {
    /// Write a whole file, replacing existing contents on success.
    async fn write_file(&self, path: &Path, content: &[u8]) -> std::io::Result<()>;

    /// Create a single directory. The parent must already exist.
    async fn mkdir(&self, path: &Path) -> std::io::Result<()>;
}

// =============================================================================
// Recursive Mkdir
// =============================================================================

/// Create every missing ancestor of `path`, in order.
///
/// An ancestor that already exists as a directory is fine; one that exists
/// as anything else fails the call.
pub async fn mkdirp(fs: &dyn OutputFileSystem, path: &Path) -> std::io::Result<()> {
    let mut ancestors: Vec<&Path> = path.ancestors().collect();
    ancestors.reverse();
    for dir in ancestors {
        if dir.as_os_str().is_empty() {
            continue;
        }
        match fs.mkdir(dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let meta = fs.stat(dir).await?;
                if !meta.is_dir {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("{} exists and is not a directory", dir.display()),
                    ));
                }
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_mkdirp_creates_missing_ancestors() {
        let fs = MemoryFileSystem::new();
        mkdirp(&fs, Path::new("/a/b/c")).await.unwrap();
        assert!(fs.stat(Path::new("/a")).await.unwrap().is_dir);
        assert!(fs.stat(Path::new("/a/b/c")).await.unwrap().is_dir);
    }

    #[tokio::test]
    async fn test_mkdirp_tolerates_existing_directories() {
        let fs = MemoryFileSystem::new();
        mkdirp(&fs, Path::new("/a/b")).await.unwrap();
        mkdirp(&fs, Path::new("/a/b/c")).await.unwrap();
        assert!(fs.stat(Path::new("/a/b/c")).await.unwrap().is_dir);
    }

    #[tokio::test]
    async fn test_mkdirp_rejects_file_in_the_way() {
        let fs = MemoryFileSystem::new();
        mkdirp(&fs, Path::new("/a")).await.unwrap();
        fs.write_file(Path::new("/a/b"), b"file").await.unwrap();
        assert!(mkdirp(&fs, &PathBuf::from("/a/b/c")).await.is_err());
    }
}
