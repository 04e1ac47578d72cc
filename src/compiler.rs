//! # Compiler Driver
//!
//! The compiler owns the hook table, the build state machine, the records
//! handle and the cross-build cache. It drives the lifecycle of every build:
//!
//! ```text
//! before_run → run → read_records
//!   → compile { before_compile → compile → this_compilation → compilation
//!               → make → finish_make → finish → seal → after_compile }
//!   → should_emit? → emit_assets { emit → write* → after_emit }
//!   → emit_records → done → after_done
//! ```
//!
//! Exactly one build may be active per compiler; concurrent entry fails.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use crate::cache::{Cache, MemoryCache};
use crate::compilation::{Compilation, Stats};
use crate::config::{CompilerOptions, EntryOptions};
use crate::emit::{AssetEmittedInfo, EmitState};
use crate::error::{BinderyError, BinderyResult};
use crate::fs::{
    InputFileSystem, NativeFileSystem, NotifyWatchFileSystem, OutputFileSystem, WatchFileSystem,
};
use crate::hooks::{AsyncParallelHook, AsyncSeriesHook, SyncBailHook, SyncHook};
use crate::logger::{CompilerLogger, LogLevel};
use crate::records::Records;

// =============================================================================
// Module Factories
// =============================================================================

/// Shared resolver construction state. Opaque to the driver; only its
/// identity flows through hooks and into child compilers.
#[derive(Debug, Default)]
pub struct ResolverFactory;

impl ResolverFactory {
    /// Create a fresh factory.
    pub fn new() -> Self {
        Self
    }
}

/// Factory for ordinary module requests.
#[derive(Debug)]
pub struct NormalModuleFactory {
    /// Resolver state shared with the owning compiler
    pub resolver_factory: Arc<ResolverFactory>,
    /// Base path requests resolve against
    pub context: PathBuf,
}

/// Factory for context (directory) module requests.
#[derive(Debug)]
pub struct ContextModuleFactory {
    /// Resolver state shared with the owning compiler
    pub resolver_factory: Arc<ResolverFactory>,
}

/// The factory pair handed to every compilation.
#[derive(Clone)]
pub struct CompilationParams {
    /// Factory for ordinary module requests
    pub normal_module_factory: Arc<NormalModuleFactory>,
    /// Factory for context module requests
    pub context_module_factory: Arc<ContextModuleFactory>,
}

impl CompilationParams {
    /// Params with fresh, unobserved factories. Test seam.
    pub(crate) fn detached() -> Self {
        let resolver_factory = Arc::new(ResolverFactory::new());
        Self {
            normal_module_factory: Arc::new(NormalModuleFactory {
                resolver_factory: resolver_factory.clone(),
                context: PathBuf::from("."),
            }),
            context_module_factory: Arc::new(ContextModuleFactory { resolver_factory }),
        }
    }
}

// =============================================================================
// Plugins
// =============================================================================

/// A plugin taps compiler hooks when applied.
pub trait Plugin: Send + Sync {
    /// Attach this plugin's taps to the compiler.
    fn apply(&self, compiler: &Arc<Compiler>) -> BinderyResult<()>;
}

impl<F> Plugin for F
where
    F: Fn(&Arc<Compiler>) -> BinderyResult<()> + Send + Sync,
{
    fn apply(&self, compiler: &Arc<Compiler>) -> BinderyResult<()> {
        self(compiler)
    }
}

// =============================================================================
// Hook Table
// =============================================================================

/// The fixed hook catalogue of a compiler.
///
/// The table is created once at construction and never replaced; only each
/// hook's tap list mutates.
pub struct CompilerHooks {
    /// Compiler is fully constructed and wired
    pub initialize: SyncHook<()>,
    /// Environment preparation before plugin defaults apply
    pub environment: SyncHook<()>,
    /// Environment preparation finished
    pub after_environment: SyncHook<()>,
    /// A watch session ended
    pub watch_close: SyncHook<()>,
    /// All configured plugins applied
    pub after_plugins: SyncHook<Arc<Compiler>>,
    /// Resolver setup finished
    pub after_resolvers: SyncHook<Arc<Compiler>>,
    /// Entry configuration is being applied
    pub entry_option: SyncBailHook<(PathBuf, EntryOptions), bool>,
    /// Veto point before asset emission
    pub should_emit: SyncBailHook<Arc<Compilation>, bool>,
    /// Intercept point for infrastructure log messages
    pub infrastructure_log: SyncBailHook<(String, LogLevel, String), bool>,
    /// New compilation, before inherited child taps run
    pub this_compilation: SyncHook<(Arc<Compilation>, CompilationParams)>,
    /// New compilation, for everyone
    pub compilation: SyncHook<(Arc<Compilation>, CompilationParams)>,
    /// A normal module factory was created
    pub normal_module_factory: SyncHook<Arc<NormalModuleFactory>>,
    /// A context module factory was created
    pub context_module_factory: SyncHook<Arc<ContextModuleFactory>>,
    /// A compile round is starting
    pub compile: SyncHook<CompilationParams>,
    /// A watched file changed
    pub invalid: SyncHook<(PathBuf, SystemTime)>,
    /// The build failed; fires just before the error reaches the caller
    pub failed: SyncHook<BinderyError>,
    /// Observational end of a run, after the result is delivered
    pub after_done: SyncHook<Option<Arc<Stats>>>,
    /// Run is starting, before the `run` hook
    pub before_run: AsyncSeriesHook<Arc<Compiler>>,
    /// Run is starting
    pub run: AsyncSeriesHook<Arc<Compiler>>,
    /// A watch-triggered build is starting
    pub watch_run: AsyncSeriesHook<Arc<Compiler>>,
    /// Compilation params exist, compile not yet started
    pub before_compile: AsyncSeriesHook<CompilationParams>,
    /// Compilation finished and sealed
    pub after_compile: AsyncSeriesHook<Arc<Compilation>>,
    /// Assets are about to be written
    pub emit: AsyncSeriesHook<Arc<Compilation>>,
    /// All asset writes completed
    pub after_emit: AsyncSeriesHook<Arc<Compilation>>,
    /// One asset file reached the output filesystem
    pub asset_emitted: AsyncSeriesHook<(String, AssetEmittedInfo)>,
    /// Build completed; stats are final
    pub done: AsyncSeriesHook<Arc<Stats>>,
    /// An additional compile pass was requested
    pub additional_pass: AsyncSeriesHook<()>,
    /// Module graph population is being kicked off
    pub make: AsyncParallelHook<Arc<Compilation>>,
    /// Module graph population finished
    pub finish_make: AsyncSeriesHook<Arc<Compilation>>,
}

impl CompilerHooks {
    /// A fresh, untapped table.
    pub fn new() -> Self {
        Self {
            initialize: SyncHook::new("initialize"),
            environment: SyncHook::new("environment"),
            after_environment: SyncHook::new("after_environment"),
            watch_close: SyncHook::new("watch_close"),
            after_plugins: SyncHook::new("after_plugins"),
            after_resolvers: SyncHook::new("after_resolvers"),
            entry_option: SyncBailHook::new("entry_option"),
            should_emit: SyncBailHook::new("should_emit"),
            infrastructure_log: SyncBailHook::new("infrastructure_log"),
            this_compilation: SyncHook::new("this_compilation"),
            compilation: SyncHook::new("compilation"),
            normal_module_factory: SyncHook::new("normal_module_factory"),
            context_module_factory: SyncHook::new("context_module_factory"),
            compile: SyncHook::new("compile"),
            invalid: SyncHook::new("invalid"),
            failed: SyncHook::new("failed"),
            after_done: SyncHook::new("after_done"),
            before_run: AsyncSeriesHook::new("before_run"),
            run: AsyncSeriesHook::new("run"),
            watch_run: AsyncSeriesHook::new("watch_run"),
            before_compile: AsyncSeriesHook::new("before_compile"),
            after_compile: AsyncSeriesHook::new("after_compile"),
            emit: AsyncSeriesHook::new("emit"),
            after_emit: AsyncSeriesHook::new("after_emit"),
            asset_emitted: AsyncSeriesHook::new("asset_emitted"),
            done: AsyncSeriesHook::new("done"),
            additional_pass: AsyncSeriesHook::new("additional_pass"),
            make: AsyncParallelHook::new("make"),
            finish_make: AsyncSeriesHook::new("finish_make"),
        }
    }

    /// Copy tap lists from a parent table into this one.
    ///
    /// Lifecycle and emission hooks stay local: `make`, `compile`, `emit`,
    /// `after_emit`, `invalid`, `done` and `this_compilation` are never
    /// inherited, so a parent's build taps do not run twice through a child.
    pub(crate) fn inherit_from(&self, parent: &CompilerHooks) {
        self.initialize.copy_taps_from(&parent.initialize);
        self.environment.copy_taps_from(&parent.environment);
        self.after_environment.copy_taps_from(&parent.after_environment);
        self.watch_close.copy_taps_from(&parent.watch_close);
        self.after_plugins.copy_taps_from(&parent.after_plugins);
        self.after_resolvers.copy_taps_from(&parent.after_resolvers);
        self.entry_option.copy_taps_from(&parent.entry_option);
        self.should_emit.copy_taps_from(&parent.should_emit);
        self.infrastructure_log.copy_taps_from(&parent.infrastructure_log);
        self.compilation.copy_taps_from(&parent.compilation);
        self.normal_module_factory.copy_taps_from(&parent.normal_module_factory);
        self.context_module_factory.copy_taps_from(&parent.context_module_factory);
        self.failed.copy_taps_from(&parent.failed);
        self.after_done.copy_taps_from(&parent.after_done);
        self.before_run.copy_taps_from(&parent.before_run);
        self.run.copy_taps_from(&parent.run);
        self.watch_run.copy_taps_from(&parent.watch_run);
        self.before_compile.copy_taps_from(&parent.before_compile);
        self.after_compile.copy_taps_from(&parent.after_compile);
        self.asset_emitted.copy_taps_from(&parent.asset_emitted);
        self.additional_pass.copy_taps_from(&parent.additional_pass);
        self.finish_make.copy_taps_from(&parent.finish_make);
    }
}

impl Default for CompilerHooks {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Shared Change Tracking
// =============================================================================

/// Change sets owned by the watch layer, read by the driver, shared with
/// child compilers.
#[derive(Default)]
pub(crate) struct ChangeTracking {
    pub(crate) modified_files: RwLock<HashSet<PathBuf>>,
    pub(crate) removed_files: RwLock<HashSet<PathBuf>>,
    pub(crate) file_timestamps: RwLock<HashMap<PathBuf, SystemTime>>,
    pub(crate) context_timestamps: RwLock<HashMap<PathBuf, SystemTime>>,
}

// =============================================================================
// Compiler State
// =============================================================================

#[derive(Debug, Default)]
struct CompilerState {
    running: bool,
    idle: bool,
    watch_mode: bool,
    closed: bool,
}

// =============================================================================
// Compiler
// =============================================================================

/// The build driver.
pub struct Compiler {
    /// Extension points; the table itself is frozen at construction
    pub hooks: Arc<CompilerHooks>,
    /// Normalised configuration
    pub options: CompilerOptions,

    context: PathBuf,
    compiler_path: String,
    root: Weak<Compiler>,
    parent_compilation: Option<Arc<Compilation>>,
    records: Records,
    cache: Arc<dyn Cache>,
    resolver_factory: Arc<ResolverFactory>,

    input_fs: RwLock<Option<Arc<dyn InputFileSystem>>>,
    output_fs: RwLock<Option<Arc<dyn OutputFileSystem>>>,
    intermediate_fs: RwLock<Option<Arc<dyn OutputFileSystem>>>,
    watch_fs: RwLock<Option<Arc<dyn WatchFileSystem>>>,

    state: Mutex<CompilerState>,
    start_time: Mutex<Option<SystemTime>>,
    pub(crate) changes: Arc<ChangeTracking>,
    pub(crate) emit_state: EmitState,
}

impl Compiler {
    /// Create a top-level compiler with native filesystem wiring and an
    /// in-process cache.
    pub fn new(options: CompilerOptions) -> Arc<Self> {
        Self::with_cache(options, Arc::new(MemoryCache::new()))
    }

    /// Create a top-level compiler around a caller-provided cache.
    pub fn with_cache(options: CompilerOptions, cache: Arc<dyn Cache>) -> Arc<Self> {
        let context = options.context.clone();
        let native: Arc<NativeFileSystem> = Arc::new(NativeFileSystem::new());
        Arc::new_cyclic(|root| Self {
            hooks: Arc::new(CompilerHooks::new()),
            options,
            context,
            compiler_path: String::new(),
            root: root.clone(),
            parent_compilation: None,
            records: Records::new(),
            cache,
            resolver_factory: Arc::new(ResolverFactory::new()),
            input_fs: RwLock::new(Some(native.clone())),
            output_fs: RwLock::new(Some(native.clone())),
            intermediate_fs: RwLock::new(Some(native)),
            watch_fs: RwLock::new(None),
            state: Mutex::new(CompilerState::default()),
            start_time: Mutex::new(None),
            changes: Arc::new(ChangeTracking::default()),
            emit_state: EmitState::new(),
        })
    }

    /// Internal constructor for child compilers; shared parts come from the
    /// parent.
    pub(crate) fn new_derived(
        options: CompilerOptions,
        compiler_path: String,
        root: Weak<Compiler>,
        parent_compilation: Arc<Compilation>,
        records: Records,
        cache: Arc<dyn Cache>,
        resolver_factory: Arc<ResolverFactory>,
        input_fs: Option<Arc<dyn InputFileSystem>>,
        intermediate_fs: Option<Arc<dyn OutputFileSystem>>,
        changes: Arc<ChangeTracking>,
    ) -> Arc<Self> {
        let context = options.context.clone();
        Arc::new(Self {
            hooks: Arc::new(CompilerHooks::new()),
            options,
            context,
            compiler_path,
            root,
            parent_compilation: Some(parent_compilation),
            records,
            cache,
            resolver_factory,
            input_fs: RwLock::new(input_fs),
            output_fs: RwLock::new(None),
            intermediate_fs: RwLock::new(intermediate_fs),
            watch_fs: RwLock::new(None),
            state: Mutex::new(CompilerState::default()),
            start_time: Mutex::new(None),
            changes,
            emit_state: EmitState::new(),
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Absolute base path of the build.
    pub fn context(&self) -> &Path {
        &self.context
    }

    /// Cache-namespace prefix of this compiler.
    pub fn compiler_path(&self) -> &str {
        &self.compiler_path
    }

    /// The top-level compiler of this tree, if still alive.
    pub fn root(&self) -> Option<Arc<Compiler>> {
        self.root.upgrade()
    }

    pub(crate) fn root_weak(&self) -> Weak<Compiler> {
        self.root.clone()
    }

    /// The compilation this compiler was derived from, for child compilers.
    pub fn parent_compilation(&self) -> Option<&Arc<Compilation>> {
        self.parent_compilation.as_ref()
    }

    /// Whether this compiler was derived from a parent compilation.
    pub fn is_child(&self) -> bool {
        self.parent_compilation.is_some()
    }

    /// The records handle (a subtree alias for child compilers).
    pub fn records(&self) -> &Records {
        &self.records
    }

    /// The shared cross-build cache.
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// The shared resolver factory.
    pub fn resolver_factory(&self) -> &Arc<ResolverFactory> {
        &self.resolver_factory
    }

    /// Where emitted assets land.
    pub fn output_path(&self) -> PathBuf {
        self.options.output.path.clone()
    }

    /// Whether a build is currently active.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Whether the cache is quiesced.
    pub fn is_idle(&self) -> bool {
        self.state.lock().idle
    }

    /// Whether the compiler is in a watch session.
    pub fn is_watch_mode(&self) -> bool {
        self.state.lock().watch_mode
    }

    /// Files reported modified by the watch layer.
    pub fn modified_files(&self) -> HashSet<PathBuf> {
        self.changes.modified_files.read().clone()
    }

    /// Files reported removed by the watch layer.
    pub fn removed_files(&self) -> HashSet<PathBuf> {
        self.changes.removed_files.read().clone()
    }

    /// Observation times for modified files.
    pub fn file_timestamps(&self) -> HashMap<PathBuf, SystemTime> {
        self.changes.file_timestamps.read().clone()
    }

    /// Observation times for modified context directories.
    pub fn context_timestamps(&self) -> HashMap<PathBuf, SystemTime> {
        self.changes.context_timestamps.read().clone()
    }

    /// Generation counter per target path written by this compiler.
    ///
    /// Generations only ever grow over the compiler's lifetime.
    pub fn written_files(&self) -> HashMap<PathBuf, u64> {
        self.emit_state.written_files()
    }

    // -------------------------------------------------------------------------
    // Filesystem Wiring
    // -------------------------------------------------------------------------

    /// The input filesystem, if wired.
    pub fn input_file_system(&self) -> Option<Arc<dyn InputFileSystem>> {
        self.input_fs.read().clone()
    }

    /// Replace the input filesystem.
    pub fn set_input_file_system(&self, fs: Arc<dyn InputFileSystem>) {
        *self.input_fs.write() = Some(fs);
    }

    /// The output filesystem, if wired. Child compilers start detached.
    pub fn output_file_system(&self) -> Option<Arc<dyn OutputFileSystem>> {
        self.output_fs.read().clone()
    }

    /// Replace the output filesystem.
    pub fn set_output_file_system(&self, fs: Arc<dyn OutputFileSystem>) {
        *self.output_fs.write() = Some(fs);
    }

    /// The intermediate filesystem used for records, if wired.
    pub fn intermediate_file_system(&self) -> Option<Arc<dyn OutputFileSystem>> {
        self.intermediate_fs.read().clone()
    }

    /// Replace the intermediate filesystem.
    pub fn set_intermediate_file_system(&self, fs: Arc<dyn OutputFileSystem>) {
        *self.intermediate_fs.write() = Some(fs);
    }

    /// The watch filesystem, if wired.
    pub fn watch_file_system(&self) -> Option<Arc<dyn WatchFileSystem>> {
        self.watch_fs.read().clone()
    }

    /// Replace the watch filesystem.
    pub fn set_watch_file_system(&self, fs: Arc<dyn WatchFileSystem>) {
        *self.watch_fs.write() = Some(fs);
    }

    /// Drop whatever the input filesystem cached between builds.
    pub fn purge_input_file_system(&self) {
        if let Some(fs) = self.input_file_system() {
            fs.purge();
        }
    }

    // -------------------------------------------------------------------------
    // Logging
    // -------------------------------------------------------------------------

    /// A named logger routed through the `infrastructure_log` hook.
    pub fn get_infrastructure_logger(
        &self,
        name: impl Into<String>,
    ) -> BinderyResult<CompilerLogger> {
        CompilerLogger::new(self.hooks.clone(), name.into())
    }

    /// A logger whose name is computed lazily on first message.
    pub fn get_infrastructure_logger_lazy(
        &self,
        name: impl Fn() -> String + Send + Sync + 'static,
    ) -> CompilerLogger {
        CompilerLogger::with_thunk(self.hooks.clone(), name)
    }

    // -------------------------------------------------------------------------
    // Records
    // -------------------------------------------------------------------------

    /// Load the records sidecar into this compiler's records tree.
    pub async fn read_records(&self) -> BinderyResult<()> {
        let Some(fs) = self.input_file_system() else {
            return Err(BinderyError::argument("no input filesystem wired"));
        };
        self.records
            .load(&*fs, self.options.records_input_path.as_deref())
            .await
    }

    /// Persist the records tree to the sidecar in canonical form.
    pub async fn emit_records(&self) -> BinderyResult<()> {
        if self.options.records_output_path.is_none() {
            return Ok(());
        }
        let Some(fs) = self.intermediate_file_system() else {
            return Err(BinderyError::argument("no intermediate filesystem wired"));
        };
        self.records
            .persist(&*fs, self.options.records_output_path.as_deref())
            .await
    }

    // -------------------------------------------------------------------------
    // Run
    // -------------------------------------------------------------------------

    /// Execute one full build.
    ///
    /// `done` fires before this returns; `after_done` fires after the
    /// result value exists, with `None` stats on failure.
    pub async fn run(self: &Arc<Self>) -> BinderyResult<Arc<Stats>> {
        self.begin_run(false)?;
        let outcome = self.run_with_hooks().await;
        self.finish_run(outcome).await
    }

    async fn run_with_hooks(self: &Arc<Self>) -> BinderyResult<Arc<Stats>> {
        *self.start_time.lock() = Some(SystemTime::now());
        self.resume_cache().await?;
        self.hooks.before_run.call(self).await?;
        self.hooks.run.call(self).await?;
        self.read_records().await?;
        self.build_cycle().await
    }

    /// Flip the running flag, rejecting concurrent entry.
    pub(crate) fn begin_run(&self, watch: bool) -> BinderyResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            let operation = if watch { "watch" } else { "run" };
            return Err(BinderyError::Closed {
                operation: operation.to_string(),
            });
        }
        if state.running {
            return Err(BinderyError::ConcurrentBuild);
        }
        state.running = true;
        state.watch_mode = watch;
        Ok(())
    }

    pub(crate) async fn resume_cache(&self) -> BinderyResult<()> {
        let was_idle = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.idle)
        };
        if was_idle {
            self.cache.end_idle().await?;
        }
        Ok(())
    }

    /// Idempotent run finalisation: idle the cache, clear flags, surface
    /// failure, observe the result.
    async fn finish_run(&self, outcome: BinderyResult<Arc<Stats>>) -> BinderyResult<Arc<Stats>> {
        self.cache.begin_idle().await;
        {
            let mut state = self.state.lock();
            state.idle = true;
            state.running = false;
            state.watch_mode = false;
        }
        self.observe_outcome(&outcome)?;
        outcome
    }

    /// Fire `failed` on error and `after_done` regardless.
    ///
    /// `after_done` taps are observational; on the failure path their own
    /// errors are logged rather than allowed to shadow the build error.
    pub(crate) fn observe_outcome(&self, outcome: &BinderyResult<Arc<Stats>>) -> BinderyResult<()> {
        match outcome {
            Err(err) => {
                if let Err(tap_err) = self.hooks.failed.call(err) {
                    tracing::error!(target: "bindery", "failed hook tap errored: {tap_err}");
                }
                if let Err(tap_err) = self.hooks.after_done.call(&None) {
                    tracing::error!(target: "bindery", "after_done tap errored: {tap_err}");
                }
                Ok(())
            }
            Ok(stats) => self.hooks.after_done.call(&Some(stats.clone())),
        }
    }

    // -------------------------------------------------------------------------
    // Compile / Emit Cycle
    // -------------------------------------------------------------------------

    /// The post-`read_records` phase shared by `run` and watch rebuilds:
    /// compile, consult `should_emit`, emit, handle additional passes,
    /// persist records, fire `done`.
    pub(crate) async fn build_cycle(self: &Arc<Self>) -> BinderyResult<Arc<Stats>> {
        loop {
            let compilation = self.compile_once().await?;

            let should_emit = self
                .hooks
                .should_emit
                .call(&compilation)?
                .unwrap_or(true);
            if !should_emit {
                return self.finish_build(&compilation, true).await;
            }

            tokio::task::yield_now().await;
            self.emit_assets(&compilation).await?;

            if compilation.need_additional_pass()? {
                self.stamp_times(&compilation);
                let stats = Arc::new(Stats::new(compilation.clone()));
                self.hooks.done.call(&stats).await?;
                self.hooks.additional_pass.call(&()).await?;
                continue;
            }

            self.emit_records().await?;
            return self.finish_build(&compilation, false).await;
        }
    }

    async fn finish_build(
        self: &Arc<Self>,
        compilation: &Arc<Compilation>,
        emission_skipped: bool,
    ) -> BinderyResult<Arc<Stats>> {
        self.stamp_times(compilation);
        let stats = Arc::new(Stats::new(compilation.clone()));
        self.hooks.done.call(&stats).await?;
        if !emission_skipped {
            let deps = compilation.build_dependencies();
            self.cache.store_build_dependencies(&deps).await?;
        }
        Ok(stats)
    }

    fn stamp_times(&self, compilation: &Arc<Compilation>) {
        compilation.set_start_time(*self.start_time.lock());
        compilation.set_end_time(SystemTime::now());
    }

    /// One compile round: params, compilation construction, `make`,
    /// finishing and sealing.
    pub async fn compile_once(self: &Arc<Self>) -> BinderyResult<Arc<Compilation>> {
        let params = self.new_compilation_params()?;
        self.hooks.before_compile.call(&params).await?;
        self.hooks.compile.call(&params)?;

        let compilation = self.new_compilation(params)?;

        self.hooks.make.call(&compilation).await?;
        self.hooks.finish_make.call(&compilation).await?;

        tokio::task::yield_now().await;
        compilation.finish().await?;
        compilation.seal().await?;

        self.hooks.after_compile.call(&compilation).await?;
        Ok(compilation)
    }

    fn new_compilation_params(&self) -> BinderyResult<CompilationParams> {
        let normal_module_factory = Arc::new(NormalModuleFactory {
            resolver_factory: self.resolver_factory.clone(),
            context: self.context.clone(),
        });
        self.hooks.normal_module_factory.call(&normal_module_factory)?;

        let context_module_factory = Arc::new(ContextModuleFactory {
            resolver_factory: self.resolver_factory.clone(),
        });
        self.hooks.context_module_factory.call(&context_module_factory)?;

        Ok(CompilationParams {
            normal_module_factory,
            context_module_factory,
        })
    }

    fn new_compilation(&self, params: CompilationParams) -> BinderyResult<Arc<Compilation>> {
        let compilation = Arc::new(Compilation::new(
            self.options.name.clone(),
            self.records.clone(),
            params.clone(),
            self.hooks.clone(),
        ));
        compilation.set_start_time(*self.start_time.lock());
        self.hooks
            .this_compilation
            .call(&(compilation.clone(), params.clone()))?;
        self.hooks.compilation.call(&(compilation.clone(), params))?;
        Ok(compilation)
    }

    // -------------------------------------------------------------------------
    // Watch
    // -------------------------------------------------------------------------

    /// Enter watch mode: run a first build, then rebuild on change events.
    ///
    /// The returned [`Watching`](crate::watching::Watching) owns rebuild
    /// scheduling; the compiler stays `running` for the whole session.
    pub async fn watch(
        self: &Arc<Self>,
        options: crate::config::WatchOptions,
        handler: crate::watching::WatchHandler,
    ) -> BinderyResult<Arc<crate::watching::Watching>> {
        self.begin_run(true)?;
        match crate::watching::Watching::start(self.clone(), options, handler).await {
            Ok(watching) => Ok(watching),
            Err(err) => {
                let mut state = self.state.lock();
                state.running = false;
                state.watch_mode = false;
                drop(state);
                Err(err)
            }
        }
    }

    /// One watch-triggered build: `watch_run` replaces `before_run`/`run`,
    /// the cache idles again afterwards, and `running` stays untouched.
    pub(crate) async fn watch_build(self: &Arc<Self>) -> BinderyResult<Arc<Stats>> {
        *self.start_time.lock() = Some(SystemTime::now());
        let outcome = async {
            self.resume_cache().await?;
            self.purge_input_file_system();
            self.hooks.watch_run.call(self).await?;
            self.read_records().await?;
            self.build_cycle().await
        }
        .await;

        self.cache.begin_idle().await;
        self.state.lock().idle = true;

        let observed = self.observe_outcome(&outcome);
        match (outcome, observed) {
            (Ok(_), Err(tap_err)) => Err(tap_err),
            (outcome, _) => outcome,
        }
    }

    /// Tear down a watch session after its last build settled.
    pub(crate) async fn finish_watch_session(&self) -> BinderyResult<()> {
        self.hooks.watch_close.call(&())?;
        self.cache.begin_idle().await;
        let mut state = self.state.lock();
        state.idle = true;
        state.running = false;
        state.watch_mode = false;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    /// Shut the compiler down. No further builds may be started.
    pub async fn close(self: &Arc<Self>) -> BinderyResult<()> {
        {
            let mut state = self.state.lock();
            if state.running {
                return Err(BinderyError::argument(
                    "cannot close while a build is running",
                ));
            }
            state.closed = true;
        }
        self.cache
            .shutdown()
            .await
            .map_err(|err| BinderyError::Shutdown {
                message: err.to_string(),
            })
    }
}

// =============================================================================
// Bootstrap
// =============================================================================

/// Build a fully wired compiler: apply plugins, wire the watch backend,
/// then fire the environment and initialisation hooks in order.
pub fn create_compiler(
    options: CompilerOptions,
    plugins: Vec<Box<dyn Plugin>>,
) -> BinderyResult<Arc<Compiler>> {
    let compiler = Compiler::new(options);
    for plugin in &plugins {
        plugin.apply(&compiler)?;
    }
    compiler.set_watch_file_system(Arc::new(NotifyWatchFileSystem::default()));
    compiler.hooks.environment.call(&())?;
    compiler.hooks.after_environment.call(&())?;
    compiler.hooks.after_plugins.call(&compiler)?;
    compiler.hooks.after_resolvers.call(&compiler)?;
    compiler.hooks.initialize.call(&())?;
    Ok(compiler)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_new_compiler_initial_state() {
        let compiler = Compiler::new(CompilerOptions::default());
        assert!(!compiler.is_running());
        assert!(!compiler.is_idle());
        assert!(!compiler.is_watch_mode());
        assert!(!compiler.is_child());
        assert_eq!(compiler.compiler_path(), "");
    }

    #[test]
    fn test_root_points_back_to_self() {
        let compiler = Compiler::new(CompilerOptions::default());
        let root = compiler.root().expect("root should be alive");
        assert!(Arc::ptr_eq(&compiler, &root));
    }

    #[test]
    fn test_create_compiler_fires_bootstrap_hooks() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorder = order.clone();
        let plugin = move |compiler: &Arc<Compiler>| {
            let log = recorder.clone();
            compiler.hooks.environment.tap("probe", move |_| {
                log.lock().push("environment");
                Ok(())
            });
            let log = recorder.clone();
            compiler.hooks.initialize.tap("probe", move |_| {
                log.lock().push("initialize");
                Ok(())
            });
            Ok(())
        };
        let _compiler =
            create_compiler(CompilerOptions::default(), vec![Box::new(plugin)]).unwrap();
        assert_eq!(*order.lock(), vec!["environment", "initialize"]);
    }

    #[tokio::test]
    async fn test_compile_once_fires_lifecycle_in_order() {
        let compiler = Compiler::new(CompilerOptions::default());
        let counter = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let log = order.clone();
        compiler.hooks.before_compile.tap_sync("probe", move |_| {
            log.lock().push("before_compile");
            Ok(())
        });
        let log = order.clone();
        compiler.hooks.compile.tap("probe", move |_| {
            log.lock().push("compile");
            Ok(())
        });
        let log = order.clone();
        compiler.hooks.this_compilation.tap("probe", move |_| {
            log.lock().push("this_compilation");
            Ok(())
        });
        let log = order.clone();
        compiler.hooks.compilation.tap("probe", move |_| {
            log.lock().push("compilation");
            Ok(())
        });
        let log = order.clone();
        let hits = counter.clone();
        compiler.hooks.make.tap_sync("probe", move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            log.lock().push("make");
            Ok(())
        });
        let log = order.clone();
        compiler.hooks.finish_make.tap_sync("probe", move |_| {
            log.lock().push("finish_make");
            Ok(())
        });
        let log = order.clone();
        compiler.hooks.after_compile.tap_sync("probe", move |_| {
            log.lock().push("after_compile");
            Ok(())
        });

        compiler.compile_once().await.unwrap();
        assert_eq!(
            *order.lock(),
            vec![
                "before_compile",
                "compile",
                "this_compilation",
                "compilation",
                "make",
                "finish_make",
                "after_compile"
            ]
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_prevents_further_runs() {
        let compiler = Compiler::new(CompilerOptions::default());
        compiler.close().await.unwrap();
        let err = compiler.run().await.unwrap_err();
        assert!(matches!(err, BinderyError::Closed { .. }));
    }
}
