//! # Compilation
//!
//! One round of module-graph construction and sealing, as seen by the
//! driver. Graph building itself is a collaborator concern; this type
//! carries the surface the driver orchestrates: the asset map, the emission
//! bookkeeping sets, the records alias, entrypoints and child compilations.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::compiler::{Compiler, CompilationParams, CompilerHooks};
use crate::error::{BinderyError, BinderyResult};
use crate::hooks::{SyncBailHook, SyncHook};
use crate::logger::CompilerLogger;
use crate::records::Records;
use crate::source::{AssetEntry, AssetInfo, Source};

// =============================================================================
// Chunks & Entrypoints
// =============================================================================

/// An opaque group of modules emitted together.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk name
    pub name: String,
    /// Files the chunk produced
    pub files: Vec<String>,
}

/// A named entry into the module graph.
#[derive(Debug, Clone)]
pub struct Entrypoint {
    /// Entrypoint name
    pub name: String,
    /// Chunks reachable from this entry
    pub chunks: Vec<Arc<Chunk>>,
}

// =============================================================================
// Compilation Hooks
// =============================================================================

/// Extension points owned by one compilation.
pub struct CompilationHooks {
    /// Asked after emission whether another compile pass is required
    pub need_additional_pass: SyncBailHook<(), bool>,
    /// Fired when a child compiler is derived from this compilation
    pub child_compiler: SyncHook<(Arc<Compiler>, String, usize)>,
}

impl CompilationHooks {
    fn new() -> Self {
        Self {
            need_additional_pass: SyncBailHook::new("need_additional_pass"),
            child_compiler: SyncHook::new("child_compiler"),
        }
    }
}

// =============================================================================
// Compilation
// =============================================================================

/// A sealed (or in-progress) artifact set plus its bookkeeping.
pub struct Compilation {
    /// Configuration name, if any
    pub name: Option<String>,
    /// Alias of the owning compiler's records subtree
    pub records: Records,
    /// Per-compilation extension points
    pub hooks: CompilationHooks,
    params: CompilationParams,
    compiler_hooks: Arc<CompilerHooks>,

    assets: RwLock<std::collections::BTreeMap<String, AssetEntry>>,
    emitted_assets: RwLock<HashSet<String>>,
    compared_for_emit_assets: RwLock<HashSet<String>>,
    build_dependencies: RwLock<HashSet<PathBuf>>,
    entrypoints: RwLock<Vec<Entrypoint>>,
    children: RwLock<Vec<Arc<Compilation>>>,
    start_time: RwLock<Option<SystemTime>>,
    end_time: RwLock<Option<SystemTime>>,
    needs_additional_pass: AtomicBool,
}

impl std::fmt::Debug for Compilation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compilation")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Compilation {
    pub(crate) fn new(
        name: Option<String>,
        records: Records,
        params: CompilationParams,
        compiler_hooks: Arc<CompilerHooks>,
    ) -> Self {
        Self {
            name,
            records,
            hooks: CompilationHooks::new(),
            params,
            compiler_hooks,
            assets: RwLock::new(std::collections::BTreeMap::new()),
            emitted_assets: RwLock::new(HashSet::new()),
            compared_for_emit_assets: RwLock::new(HashSet::new()),
            build_dependencies: RwLock::new(HashSet::new()),
            entrypoints: RwLock::new(Vec::new()),
            children: RwLock::new(Vec::new()),
            start_time: RwLock::new(None),
            end_time: RwLock::new(None),
            needs_additional_pass: AtomicBool::new(false),
        }
    }

    /// The factories this compilation was created with.
    pub fn params(&self) -> &CompilationParams {
        &self.params
    }

    // -------------------------------------------------------------------------
    // Assets
    // -------------------------------------------------------------------------

    /// Add a new asset. Adding over an existing name is a conflict.
    pub fn emit_asset(
        &self,
        name: impl Into<String>,
        source: Arc<dyn Source>,
        info: AssetInfo,
    ) -> BinderyResult<()> {
        let name = name.into();
        let mut assets = self.assets.write();
        if assets.contains_key(&name) {
            return Err(BinderyError::argument(format!(
                "conflict: multiple assets emit to the same filename {name}"
            )));
        }
        assets.insert(
            name.clone(),
            AssetEntry {
                name,
                source,
                info,
            },
        );
        Ok(())
    }

    /// Replace the source and info of an existing asset.
    pub fn update_asset(
        &self,
        name: &str,
        source: Arc<dyn Source>,
        info: AssetInfo,
    ) -> BinderyResult<()> {
        let mut assets = self.assets.write();
        match assets.get_mut(name) {
            Some(entry) => {
                entry.source = source;
                entry.info = info;
                Ok(())
            }
            None => Err(BinderyError::argument(format!(
                "cannot update a non-existing asset {name}"
            ))),
        }
    }

    /// Remove an asset.
    pub fn delete_asset(&self, name: &str) {
        self.assets.write().remove(name);
    }

    /// Snapshot of every asset, in name order.
    pub fn get_assets(&self) -> Vec<AssetEntry> {
        self.assets.read().values().cloned().collect()
    }

    /// One asset by name.
    pub fn get_asset(&self, name: &str) -> Option<AssetEntry> {
        self.assets.read().get(name).cloned()
    }

    // -------------------------------------------------------------------------
    // Emission Bookkeeping
    // -------------------------------------------------------------------------

    /// Mark an asset as freshly written to disk.
    pub fn mark_emitted(&self, name: impl Into<String>) {
        self.emitted_assets.write().insert(name.into());
    }

    /// Mark an asset as skipped after a byte comparison.
    pub fn mark_compared(&self, name: impl Into<String>) {
        self.compared_for_emit_assets.write().insert(name.into());
    }

    /// Names of assets written during emission.
    pub fn emitted_assets(&self) -> HashSet<String> {
        self.emitted_assets.read().clone()
    }

    /// Names of assets skipped after comparing equal to disk.
    pub fn compared_for_emit_assets(&self) -> HashSet<String> {
        self.compared_for_emit_assets.read().clone()
    }

    // -------------------------------------------------------------------------
    // Build Dependencies
    // -------------------------------------------------------------------------

    /// Record a file the build configuration depends on.
    pub fn add_build_dependency(&self, path: impl Into<PathBuf>) {
        self.build_dependencies.write().insert(path.into());
    }

    /// Snapshot of the dependency set.
    pub fn build_dependencies(&self) -> HashSet<PathBuf> {
        self.build_dependencies.read().clone()
    }

    // -------------------------------------------------------------------------
    // Entrypoints & Children
    // -------------------------------------------------------------------------

    /// Register an entrypoint.
    pub fn add_entrypoint(&self, entrypoint: Entrypoint) {
        self.entrypoints.write().push(entrypoint);
    }

    /// Snapshot of the entrypoints.
    pub fn entrypoints(&self) -> Vec<Entrypoint> {
        self.entrypoints.read().clone()
    }

    pub(crate) fn add_child(&self, child: Arc<Compilation>) {
        self.children.write().push(child);
    }

    /// Compilations produced by child compilers run under this one.
    pub fn children(&self) -> Vec<Arc<Compilation>> {
        self.children.read().clone()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Finalise module processing. Graph work lives in collaborators; the
    /// driver only needs the suspension point.
    pub async fn finish(&self) -> BinderyResult<()> {
        Ok(())
    }

    /// Seal the artifact set. Chunking and optimisation live in
    /// collaborators.
    pub async fn seal(&self) -> BinderyResult<()> {
        Ok(())
    }

    /// Ask the `need_additional_pass` hook whether another compile pass is
    /// required, latching the flag when it is.
    pub fn need_additional_pass(&self) -> BinderyResult<bool> {
        let needed = self
            .hooks
            .need_additional_pass
            .call(&())?
            .unwrap_or(false);
        if needed {
            self.needs_additional_pass.store(true, Ordering::Relaxed);
        }
        Ok(needed)
    }

    /// Whether an additional pass was requested at any point.
    pub fn additional_pass_requested(&self) -> bool {
        self.needs_additional_pass.load(Ordering::Relaxed)
    }

    pub(crate) fn set_start_time(&self, time: Option<SystemTime>) {
        *self.start_time.write() = time;
    }

    pub(crate) fn set_end_time(&self, time: SystemTime) {
        *self.end_time.write() = Some(time);
    }

    /// When the build producing this compilation started.
    pub fn start_time(&self) -> Option<SystemTime> {
        *self.start_time.read()
    }

    /// When the build producing this compilation completed.
    pub fn end_time(&self) -> Option<SystemTime> {
        *self.end_time.read()
    }

    // -------------------------------------------------------------------------
    // Utilities
    // -------------------------------------------------------------------------

    /// A logger routed through the owning compiler's infrastructure hook.
    pub fn get_logger(&self, name: impl Into<String>) -> BinderyResult<CompilerLogger> {
        CompilerLogger::new(self.compiler_hooks.clone(), name.into())
    }

    /// Expand a path template. Only the `[name]` token is interpreted here;
    /// hash-based tokens belong to the chunking collaborators.
    pub fn get_path(&self, template: &str) -> String {
        let name = self.name.as_deref().unwrap_or("main");
        template.replace("[name]", name)
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Summary handle for one completed compilation.
pub struct Stats {
    compilation: Arc<Compilation>,
}

impl std::fmt::Debug for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stats").finish_non_exhaustive()
    }
}

impl Stats {
    pub(crate) fn new(compilation: Arc<Compilation>) -> Self {
        Self { compilation }
    }

    /// The compilation this summarises.
    pub fn compilation(&self) -> &Arc<Compilation> {
        &self.compilation
    }

    /// Build start time.
    pub fn start_time(&self) -> Option<SystemTime> {
        self.compilation.start_time()
    }

    /// Build end time.
    pub fn end_time(&self) -> Option<SystemTime> {
        self.compilation.end_time()
    }
}

// =============================================================================
// Tests
// =============================================================================
