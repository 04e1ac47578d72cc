//! # Asset Emission Engine
//!
//! Materialises a compilation's assets to the output filesystem with
//! incremental-write semantics: per-path generation counters, a by-identity
//! source cache, byte comparison against existing output, and a
//! case-collision guard for case-insensitive filesystems. Writes run in a
//! bounded pool; `after_emit` fires only once every write has completed.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::sync::Semaphore;

use crate::compilation::Compilation;
use crate::compiler::Compiler;
use crate::error::{BinderyError, BinderyResult};
use crate::fs::{mkdirp, InputFileSystem, OutputFileSystem};
use crate::source::{source_content, AssetEntry, SizeOnlySource, Source};

/// Upper bound on concurrently in-flight asset writes per emission.
const ASSET_WRITE_CONCURRENCY: usize = 15;

// =============================================================================
// Asset Emitted Payload
// =============================================================================

/// Payload of the `asset_emitted` hook: everything known about one file that
/// just reached the output filesystem.
#[derive(Clone)]
pub struct AssetEmittedInfo {
    /// The bytes that were written
    pub content: Bytes,
    /// The source the bytes came from
    pub source: Arc<dyn Source>,
    /// The emission root directory
    pub output_path: PathBuf,
    /// The compilation that produced the asset
    pub compilation: Arc<Compilation>,
    /// The absolute path that was written
    pub target_path: PathBuf,
}

// =============================================================================
// Per-Compiler Emission State
// =============================================================================

struct SourceCacheEntry {
    source: Weak<dyn Source>,
    size_only: Option<Arc<SizeOnlySource>>,
    written_to: HashMap<PathBuf, u64>,
}

/// Cross-emission incremental-write state, one per compiler.
pub(crate) struct EmitState {
    /// Generation counter per written target path; strictly non-decreasing
    written_files: Mutex<HashMap<PathBuf, u64>>,
    /// By-identity source cache, keyed on the source allocation address
    source_cache: Mutex<HashMap<usize, SourceCacheEntry>>,
}

fn source_identity(source: &Arc<dyn Source>) -> usize {
    Arc::as_ptr(source) as *const () as usize
}

impl EmitState {
    pub(crate) fn new() -> Self {
        Self {
            written_files: Mutex::new(HashMap::new()),
            source_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Current generation of a target path.
    pub(crate) fn generation_of(&self, path: &Path) -> Option<u64> {
        self.written_files.lock().get(path).copied()
    }

    /// Snapshot of all generations, for tests and diagnostics.
    pub(crate) fn written_files(&self) -> HashMap<PathBuf, u64> {
        self.written_files.lock().clone()
    }

    /// Drop cache entries whose sources no compilation references anymore.
    fn sweep(&self) {
        self.source_cache
            .lock()
            .retain(|_, entry| entry.source.strong_count() > 0);
    }

    /// The generation this source was last written to `path` with, if any.
    fn written_generation(&self, source: &Arc<dyn Source>, path: &Path) -> Option<u64> {
        self.source_cache
            .lock()
            .get(&source_identity(source))
            .and_then(|entry| entry.written_to.get(path).copied())
    }

    /// Record a completed write of `source` to `path`.
    fn record_write(&self, source: &Arc<dyn Source>, path: &Path, generation: u64) {
        self.written_files
            .lock()
            .insert(path.to_path_buf(), generation);
        let mut cache = self.source_cache.lock();
        let entry = cache
            .entry(source_identity(source))
            .or_insert_with(|| SourceCacheEntry {
                source: Arc::downgrade(source),
                size_only: None,
                written_to: HashMap::new(),
            });
        entry.written_to.insert(path.to_path_buf(), generation);
    }

    /// The cached size-only surrogate for a source, created on first use.
    fn size_only_for(&self, source: &Arc<dyn Source>, size: usize) -> Arc<SizeOnlySource> {
        let mut cache = self.source_cache.lock();
        let entry = cache
            .entry(source_identity(source))
            .or_insert_with(|| SourceCacheEntry {
                source: Arc::downgrade(source),
                size_only: None,
                written_to: HashMap::new(),
            });
        match &entry.size_only {
            Some(existing) if existing.size() == size => existing.clone(),
            _ => {
                let fresh = Arc::new(SizeOnlySource::new(size));
                entry.size_only = Some(fresh.clone());
                fresh
            }
        }
    }
}

// =============================================================================
// Emission
// =============================================================================

impl Compiler {
    /// Write every asset of a sealed compilation to the output filesystem.
    pub async fn emit_assets(self: &Arc<Self>, compilation: &Arc<Compilation>) -> BinderyResult<()> {
        self.hooks.emit.call(compilation).await?;

        let Some(fs) = self.output_file_system() else {
            return Err(BinderyError::argument(
                "no output filesystem wired; child compilers do not emit to disk",
            ));
        };
        let output_path = self.output_path();
        mkdirp(&*fs, &output_path)
            .await
            .map_err(|err| BinderyError::io_at(&output_path, err))?;

        self.emit_state.sweep();

        let case_map: Mutex<HashMap<String, PathBuf>> = Mutex::new(HashMap::new());
        let pool = Semaphore::new(ASSET_WRITE_CONCURRENCY);

        let assets = compilation.get_assets();
        let writes = assets.into_iter().map(|asset| {
            let fs = fs.clone();
            let output_path = &output_path;
            let case_map = &case_map;
            let pool = &pool;
            async move {
                let _permit = pool.acquire().await.map_err(|_| {
                    BinderyError::internal("asset write pool closed mid-emission")
                })?;
                self.write_asset_out(&*fs, output_path, compilation, asset, case_map)
                    .await
            }
        });
        futures::future::try_join_all(writes).await?;

        self.hooks.after_emit.call(compilation).await?;
        Ok(())
    }

    /// The write protocol for one asset.
    async fn write_asset_out(
        self: &Arc<Self>,
        fs: &dyn OutputFileSystem,
        output_path: &Path,
        compilation: &Arc<Compilation>,
        asset: AssetEntry,
        case_map: &Mutex<HashMap<String, PathBuf>>,
    ) -> BinderyResult<()> {
        // Strip any query-string suffix from the public name.
        let target_file = match asset.name.find('?') {
            Some(at) => &asset.name[..at],
            None => asset.name.as_str(),
        };

        if target_file.contains('/') {
            if let Some(parent) = Path::new(target_file).parent() {
                let dir = output_path.join(parent);
                mkdirp(fs, &dir)
                    .await
                    .map_err(|err| BinderyError::io_at(&dir, err))?;
            }
        }

        let target_path = output_path.join(target_file);

        // Case-collision guard: one lowercased slot per emission. Two assets
        // that differ only in query string collapse to the same slot too.
        {
            let mut slots = case_map.lock();
            let key = target_path.to_string_lossy().to_lowercase();
            if let Some(existing) = slots.get(&key) {
                return Err(BinderyError::CaseCollision {
                    existing: existing.clone(),
                    conflicting: target_path,
                });
            }
            slots.insert(key, target_path.clone());
        }

        let generation = self.emit_state.generation_of(&target_path);

        // Skip-if-same-source: this exact source already occupies the path.
        if let Some(current) = generation {
            if self.emit_state.written_generation(&asset.source, &target_path) == Some(current) {
                self.install_size_only(compilation, &asset)?;
                return Ok(());
            }
        }

        let content = source_content(asset.source.as_ref())?;

        // Compare-before-emit applies only to immutable assets on paths this
        // compiler has not written yet; everything else goes straight to the
        // write below.
        if generation.is_none()
            && asset.info.immutable
            && self.options.output.compare_before_emit
        {
            if let Ok(meta) = fs.stat(&target_path).await {
                if meta.is_file && meta.size == content.len() as u64 {
                    match fs.read_file(&target_path).await {
                        Ok(existing) if existing == content => {
                            compilation.mark_compared(&asset.name);
                            self.install_size_only(compilation, &asset)?;
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }

        fs.write_file(&target_path, &content)
            .await
            .map_err(|err| BinderyError::FileWrite {
                path: target_path.clone(),
                source: err,
            })?;

        compilation.mark_emitted(&asset.name);
        let new_generation = generation.unwrap_or(0) + 1;
        self.emit_state
            .record_write(&asset.source, &target_path, new_generation);

        self.hooks
            .asset_emitted
            .call(&(
                asset.name.clone(),
                AssetEmittedInfo {
                    content,
                    source: asset.source.clone(),
                    output_path: output_path.to_path_buf(),
                    compilation: compilation.clone(),
                    target_path,
                },
            ))
            .await?;

        self.install_size_only(compilation, &asset)
    }

    /// Replace the live asset with a size-only surrogate so the concrete
    /// content can be dropped.
    fn install_size_only(
        self: &Arc<Self>,
        compilation: &Arc<Compilation>,
        asset: &AssetEntry,
    ) -> BinderyResult<()> {
        let size = asset.source.size();
        let surrogate = self.emit_state.size_only_for(&asset.source, size);
        compilation.update_asset(&asset.name, surrogate, asset.info.with_size(size))
    }
}

// =============================================================================
// Tests
// =============================================================================
