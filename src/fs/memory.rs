//! In-memory filesystem for tests and detached child-compiler outputs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::{FileMetadata, InputFileSystem, OutputFileSystem};

enum Node {
    File { content: Vec<u8>, mtime: SystemTime },
    Directory,
}

/// A filesystem held entirely in memory.
///
/// Paths are stored verbatim and compared case-sensitively; the root `/` is
/// always present. `mkdir` requires the parent to exist, which keeps the
/// recursive-mkdir helper honest in tests.
#[derive(Default)]
pub struct MemoryFileSystem {
    nodes: Mutex<HashMap<PathBuf, Node>>,
}

impl MemoryFileSystem {
    /// Create an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// All file paths currently stored, unordered.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.nodes
            .lock()
            .iter()
            .filter_map(|(path, node)| matches!(node, Node::File { .. }).then(|| path.clone()))
            .collect()
    }

    /// Number of files currently stored.
    pub fn file_count(&self) -> usize {
        self.nodes
            .lock()
            .values()
            .filter(|node| matches!(node, Node::File { .. }))
            .count()
    }

    fn parent_exists(&self, path: &Path) -> bool {
        match path.parent() {
            None => true,
            Some(parent) if parent.as_os_str().is_empty() => true,
            Some(parent) if parent == Path::new("/") => true,
            Some(parent) => matches!(self.nodes.lock().get(parent), Some(Node::Directory)),
        }
    }
}

#[async_trait]
impl InputFileSystem for MemoryFileSystem {
    async fn stat(&self, path: &Path) -> std::io::Result<FileMetadata> {
        if path == Path::new("/") {
            return Ok(FileMetadata {
                is_file: false,
                is_dir: true,
                size: 0,
                mtime: None,
            });
        }
        match self.nodes.lock().get(path) {
            Some(Node::File { content, mtime }) => Ok(FileMetadata {
                is_file: true,
                is_dir: false,
                size: content.len() as u64,
                mtime: Some(*mtime),
            }),
            Some(Node::Directory) => Ok(FileMetadata {
                is_file: false,
                is_dir: true,
                size: 0,
                mtime: None,
            }),
            None => Err(Error::new(ErrorKind::NotFound, "no such file or directory")),
        }
    }

    async fn read_file(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        match self.nodes.lock().get(path) {
            Some(Node::File { content, .. }) => Ok(content.clone()),
            Some(Node::Directory) => Err(Error::new(ErrorKind::Other, "is a directory")),
            None => Err(Error::new(ErrorKind::NotFound, "no such file")),
        }
    }
}

#[async_trait]
impl OutputFileSystem for MemoryFileSystem {
    async fn write_file(&self, path: &Path, content: &[u8]) -> std::io::Result<()> {
        if !self.parent_exists(path) {
            return Err(Error::new(ErrorKind::NotFound, "parent directory missing"));
        }
        let mut nodes = self.nodes.lock();
        if matches!(nodes.get(path), Some(Node::Directory)) {
            return Err(Error::new(ErrorKind::Other, "is a directory"));
        }
        nodes.insert(
            path.to_path_buf(),
            Node::File {
                content: content.to_vec(),
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn mkdir(&self, path: &Path) -> std::io::Result<()> {
        if path == Path::new("/") {
            return Err(Error::new(ErrorKind::AlreadyExists, "root exists"));
        }
        if !self.parent_exists(path) {
            return Err(Error::new(ErrorKind::NotFound, "parent directory missing"));
        }
        let mut nodes = self.nodes.lock();
        match nodes.get(path) {
            Some(Node::Directory) | Some(Node::File { .. }) => {
                Err(Error::new(ErrorKind::AlreadyExists, "path exists"))
            }
            None => {
                nodes.insert(path.to_path_buf(), Node::Directory);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_requires_parent() {
        let fs = MemoryFileSystem::new();
        assert!(fs.write_file(Path::new("/missing/x"), b"x").await.is_err());
        fs.mkdir(Path::new("/missing")).await.unwrap();
        fs.write_file(Path::new("/missing/x"), b"x").await.unwrap();
        assert_eq!(fs.read_file(Path::new("/missing/x")).await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_write_replaces_content() {
        let fs = MemoryFileSystem::new();
        fs.write_file(Path::new("/x"), b"one").await.unwrap();
        fs.write_file(Path::new("/x"), b"two").await.unwrap();
        assert_eq!(fs.read_file(Path::new("/x")).await.unwrap(), b"two");
        assert_eq!(fs.file_count(), 1);
    }

    #[tokio::test]
    async fn test_stat_reports_size() {
        let fs = MemoryFileSystem::new();
        fs.write_file(Path::new("/x"), b"abc").await.unwrap();
        let meta = fs.stat(Path::new("/x")).await.unwrap();
        assert!(meta.is_file);
        assert_eq!(meta.size, 3);
    }
}
