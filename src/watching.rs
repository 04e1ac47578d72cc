//! # Watching
//!
//! The watch-mode collaborator. A [`Watching`] owns rebuild scheduling for
//! one watch session: it runs the first build on creation, aggregates change
//! bursts from the watch filesystem, fires `invalid` per changed path,
//! merges the changes into the compiler's shared change-tracking sets, and
//! serialises rebuilds so at most one build is in flight.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::unbounded_channel;
use tokio::task::JoinHandle;

use crate::compilation::Stats;
use crate::compiler::Compiler;
use crate::config::WatchOptions;
use crate::error::BinderyResult;
use crate::fs::{WatchEventBatch, WatchSubscription};

/// Callback observing each completed watch build.
pub type WatchHandler = Box<dyn Fn(&BinderyResult<Arc<Stats>>) + Send + Sync>;

// =============================================================================
// Watching
// =============================================================================

/// An active watch session.
pub struct Watching {
    compiler: Arc<Compiler>,
    options: WatchOptions,
    handler: WatchHandler,
    build_lock: tokio::sync::Mutex<()>,
    pending: Mutex<WatchEventBatch>,
    closed: AtomicBool,
    subscription: Mutex<Option<Box<dyn WatchSubscription>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Watching {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watching").finish_non_exhaustive()
    }
}

impl Watching {
    /// Run the first build, then subscribe to the watch filesystem.
    pub(crate) async fn start(
        compiler: Arc<Compiler>,
        options: WatchOptions,
        handler: WatchHandler,
    ) -> BinderyResult<Arc<Self>> {
        let watching = Arc::new(Self {
            compiler,
            options,
            handler,
            build_lock: tokio::sync::Mutex::new(()),
            pending: Mutex::new(WatchEventBatch::default()),
            closed: AtomicBool::new(false),
            subscription: Mutex::new(None),
            forwarder: Mutex::new(None),
        });
        watching.build_now().await;
        watching.attach()?;
        Ok(watching)
    }

    /// The compiler this session drives.
    pub fn compiler(&self) -> &Arc<Compiler> {
        &self.compiler
    }

    /// Whether the session was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Force a rebuild, folding `changes` into the tracked sets first.
    ///
    /// The `invalid` hook fires once per modified path before the rebuild
    /// is scheduled.
    pub async fn invalidate(self: &Arc<Self>, changes: WatchEventBatch) -> BinderyResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        let now = SystemTime::now();
        for path in &changes.modified {
            let time = changes.timestamps.get(path).copied().unwrap_or(now);
            self.compiler.hooks.invalid.call(&(path.clone(), time))?;
        }
        self.pending.lock().merge(changes);
        self.build_now().await;
        Ok(())
    }

    /// End the session: stop event delivery, wait for any in-flight build,
    /// fire `watch_close`, idle the cache and release the compiler.
    pub async fn close(&self) -> BinderyResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        *self.subscription.lock() = None;
        if let Some(task) = self.forwarder.lock().take() {
            task.abort();
        }
        let _settled = self.build_lock.lock().await;
        self.compiler.finish_watch_session().await
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn build_now(self: &Arc<Self>) {
        let _guard = self.build_lock.lock().await;
        if self.is_closed() {
            return;
        }
        let batch = std::mem::take(&mut *self.pending.lock());
        self.apply_changes(batch);
        let result = self.compiler.watch_build().await;
        (self.handler)(&result);
    }

    /// Publish a change batch into the sets shared with the driver. The
    /// modified and removed sets describe only the latest batch; timestamps
    /// accumulate.
    fn apply_changes(&self, batch: WatchEventBatch) {
        let changes = &self.compiler.changes;
        *changes.modified_files.write() = batch.modified;
        *changes.removed_files.write() = batch.removed;
        changes.file_timestamps.write().extend(batch.timestamps);
    }

    fn attach(self: &Arc<Self>) -> BinderyResult<()> {
        let Some(watch_fs) = self.compiler.watch_file_system() else {
            return Ok(());
        };
        let (sender, mut receiver) = unbounded_channel();
        let subscription =
            watch_fs.watch(std::slice::from_ref(&self.compiler.context().to_path_buf()), sender)?;
        *self.subscription.lock() = Some(subscription);

        let window = Duration::from_millis(self.options.aggregate_timeout_ms);
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(first) = receiver.recv().await {
                let mut batch = first;
                // Aggregate the burst until the window stays quiet.
                while let Ok(Some(more)) =
                    tokio::time::timeout(window, receiver.recv()).await
                {
                    batch.merge(more);
                }
                let Some(watching) = weak.upgrade() else {
                    return;
                };
                if let Err(err) = watching.invalidate(batch).await {
                    tracing::error!(target: "bindery", "watch rebuild failed: {err}");
                }
            }
        });
        *self.forwarder.lock() = Some(task);
        Ok(())
    }
}

impl Drop for Watching {
    fn drop(&mut self) {
        if let Some(task) = self.forwarder.lock().take() {
            task.abort();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
