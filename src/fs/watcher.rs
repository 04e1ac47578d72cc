//! Watch filesystem surface and its `notify`-backed implementation.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{BinderyError, BinderyResult};

// =============================================================================
// Watch Surface
// =============================================================================

/// One batch of change events from the watch backend.
#[derive(Debug, Clone, Default)]
pub struct WatchEventBatch {
    /// Paths created or modified
    pub modified: HashSet<PathBuf>,
    /// Paths removed
    pub removed: HashSet<PathBuf>,
    /// Observation times for modified paths
    pub timestamps: HashMap<PathBuf, SystemTime>,
}

impl WatchEventBatch {
    /// Fold another batch into this one.
    pub fn merge(&mut self, other: WatchEventBatch) {
        self.modified.extend(other.modified);
        self.removed.extend(other.removed);
        self.timestamps.extend(other.timestamps);
    }

    /// Whether the batch carries no changes.
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Change-event source for watch mode.
pub trait WatchFileSystem: Send + Sync {
    /// Watch the given roots recursively; batches arrive on `events` until
    /// the returned subscription is dropped.
    fn watch(
        &self,
        roots: &[PathBuf],
        events: UnboundedSender<WatchEventBatch>,
    ) -> BinderyResult<Box<dyn WatchSubscription>>;
}

/// Handle to an active watch; dropping it stops event delivery.
pub trait WatchSubscription: Send {}

// =============================================================================
// Notify Backend
// =============================================================================

/// Watch backend built on the platform-native `notify` watcher.
#[derive(Debug, Clone, Copy)]
pub struct NotifyWatchFileSystem {
    poll_interval: Duration,
}

impl NotifyWatchFileSystem {
    /// Create a backend with the given poll fallback interval.
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl Default for NotifyWatchFileSystem {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

struct NotifySubscription {
    _watcher: RecommendedWatcher,
}

impl WatchSubscription for NotifySubscription {}

impl WatchFileSystem for NotifyWatchFileSystem {
    fn watch(
        &self,
        roots: &[PathBuf],
        events: UnboundedSender<WatchEventBatch>,
    ) -> BinderyResult<Box<dyn WatchSubscription>> {
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let Ok(event) = result else { return };
                let now = SystemTime::now();
                let mut batch = WatchEventBatch::default();
                match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) => {
                        for path in event.paths {
                            batch.timestamps.insert(path.clone(), now);
                            batch.modified.insert(path);
                        }
                    }
                    EventKind::Remove(_) => {
                        batch.removed.extend(event.paths);
                    }
                    _ => return,
                }
                if !batch.is_empty() {
                    let _ = events.send(batch);
                }
            },
            Config::default().with_poll_interval(self.poll_interval),
        )
        .map_err(|err| BinderyError::Io {
            message: format!("failed to create watcher: {err}"),
            path: None,
        })?;

        for root in roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|err| BinderyError::Io {
                    message: format!("failed to watch: {err}"),
                    path: Some(root.clone()),
                })?;
        }

        Ok(Box::new(NotifySubscription { _watcher: watcher }))
    }
}

// =============================================================================
// Tests
// =============================================================================
