//! # Records Store
//!
//! Records are a JSON sidecar persisted between builds so plugins can keep
//! identity information (module ids, chunk ids) stable across runs. The
//! driver preserves their contents without interpreting them.
//!
//! A [`Records`] value is a cheap-to-clone handle: the whole tree lives
//! behind one shared lock, and each handle addresses a subtree. The
//! top-level compiler holds the root; a child compiler holds an alias of
//! `records[rel_name][index]` and writes through it.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

use crate::error::{BinderyError, BinderyResult};
use crate::fs::{mkdirp, InputFileSystem, OutputFileSystem};

// =============================================================================
// Canonical Serialisation
// =============================================================================

/// Serialise records canonically: 2-space indentation, object keys sorted at
/// every level.
///
/// `serde_json::Value` stores objects in a `BTreeMap`, so key order is
/// already lexicographic; the pretty writer emits 2-space indentation. The
/// canonical form makes the sidecar diffable and stable under plugin
/// reordering.
pub fn to_canonical_json(value: &Value) -> BinderyResult<String> {
    serde_json::to_string_pretty(value).map_err(|err| BinderyError::Internal {
        message: format!("records serialisation failed: {err}"),
    })
}

// =============================================================================
// Subtree Addressing
// =============================================================================

#[derive(Debug, Clone)]
enum Segment {
    Key(String),
    Index(usize),
}

fn resolve<'a>(mut node: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    for segment in segments {
        node = match segment {
            Segment::Key(key) => node.as_object()?.get(key)?,
            Segment::Index(index) => node.as_array()?.get(*index)?,
        };
    }
    Some(node)
}

fn resolve_or_create<'a>(mut node: &'a mut Value, segments: &[Segment]) -> &'a mut Value {
    for segment in segments {
        let current = node;
        node = match segment {
            Segment::Key(key) => {
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                match current {
                    Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                    other => other,
                }
            }
            Segment::Index(index) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                match current {
                    Value::Array(items) => {
                        while items.len() <= *index {
                            items.push(Value::Object(Map::new()));
                        }
                        &mut items[*index]
                    }
                    other => other,
                }
            }
        };
    }
    node
}

// =============================================================================
// Records Handle
// =============================================================================

/// Handle to a records tree or one of its subtrees.
#[derive(Clone)]
pub struct Records {
    tree: Arc<RwLock<Value>>,
    segments: Vec<Segment>,
}

impl Records {
    /// A fresh, empty root records tree.
    pub fn new() -> Self {
        Self {
            tree: Arc::new(RwLock::new(Value::Object(Map::new()))),
            segments: Vec::new(),
        }
    }

    /// Clone of the addressed subtree; `Null` if it no longer exists.
    pub fn snapshot(&self) -> Value {
        let tree = self.tree.read();
        resolve(&tree, &self.segments).cloned().unwrap_or(Value::Null)
    }

    /// Replace the addressed subtree wholesale.
    pub fn replace(&self, value: Value) {
        let mut tree = self.tree.write();
        *resolve_or_create(&mut tree, &self.segments) = value;
    }

    /// Mutate the addressed subtree in place.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut Value) -> R) -> R {
        let mut tree = self.tree.write();
        mutate(resolve_or_create(&mut tree, &self.segments))
    }

    /// Slice out the subtree for a child compiler.
    ///
    /// Ensures `self[rel_name]` is an array. An existing entry at `index` is
    /// aliased; otherwise a fresh object is appended and aliased. The
    /// returned handle shares the tree, so child writes are visible to the
    /// parent.
    pub fn child(&self, rel_name: &str, index: usize) -> Records {
        let slot = self.update(|node| {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            let Value::Object(map) = node else {
                return 0;
            };
            let entry = map
                .entry(rel_name.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            let Value::Array(items) = entry else {
                return 0;
            };
            if index < items.len() {
                index
            } else {
                items.push(Value::Object(Map::new()));
                items.len() - 1
            }
        });

        let mut segments = self.segments.clone();
        segments.push(Segment::Key(rel_name.to_string()));
        segments.push(Segment::Index(slot));
        Records {
            tree: self.tree.clone(),
            segments,
        }
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Load records from the sidecar.
    ///
    /// An unset path or a missing file both reset to an empty tree; only a
    /// present-but-unparsable file is an error.
    pub async fn load(
        &self,
        fs: &dyn InputFileSystem,
        path: Option<&Path>,
    ) -> BinderyResult<()> {
        let Some(path) = path else {
            self.replace(Value::Object(Map::new()));
            return Ok(());
        };
        if fs.stat(path).await.is_err() {
            self.replace(Value::Object(Map::new()));
            return Ok(());
        }
        let bytes = fs
            .read_file(path)
            .await
            .map_err(|err| BinderyError::FileRead {
                path: path.to_path_buf(),
                source: err,
            })?;
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|err| BinderyError::RecordsParse {
                message: err.to_string(),
            })?;
        self.replace(value);
        Ok(())
    }

    /// Persist records to the sidecar in canonical form.
    ///
    /// An unset path is a no-op. The parent directory is created on demand.
    pub async fn persist(
        &self,
        fs: &dyn OutputFileSystem,
        path: Option<&Path>,
    ) -> BinderyResult<()> {
        let Some(path) = path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                mkdirp(fs, parent)
                    .await
                    .map_err(|err| BinderyError::io_at(parent, err))?;
            }
        }
        let json = to_canonical_json(&self.snapshot())?;
        fs.write_file(path, json.as_bytes())
            .await
            .map_err(|err| BinderyError::FileWrite {
                path: path.to_path_buf(),
                source: err,
            })
    }
}

impl Default for Records {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Records {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Records")
            .field("segments", &self.segments)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
