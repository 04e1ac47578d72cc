//! # Hook Bus
//!
//! Typed extension points for the compilation driver. A hook is a named
//! registry of taps; plugins attach behavior with `tap`/`tap_with` and the
//! driver dispatches with `call`. Four kinds exist:
//!
//! - [`SyncHook`]: taps run in order, any failure propagates out.
//! - [`SyncBailHook`]: the first tap returning `Some` short-circuits the
//!   dispatch with that value; `None` means "no opinion".
//! - [`AsyncSeriesHook`]: taps run sequentially, each may suspend; the first
//!   failure aborts the series.
//! - [`AsyncParallelHook`]: all taps start in registration order; completion
//!   order is undefined; the dispatch completes when all taps have completed
//!   or any has failed.
//!
//! Tap lists are the only mutable part of a hook. Invocation snapshots the
//! list, so a tap registered during a dispatch takes effect on the next one.
//!
//! Failures surfacing through the two async kinds are reported as hook-tap
//! failures naming the hook and the tap; synchronous hooks propagate tap
//! errors verbatim out of their call site.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::error::BinderyResult;

// =============================================================================
// Tap Registration
// =============================================================================

/// Options attached to a tap at registration time.
#[derive(Debug, Clone)]
pub struct TapOptions {
    /// Display name of the tap, used for ordering constraints and diagnostics
    pub name: Cow<'static, str>,
    /// Lower stages run first; ties break by registration order
    pub stage: i32,
    /// Names of taps this one must run before
    pub before: Vec<Cow<'static, str>>,
}

impl TapOptions {
    /// Options with a name and default ordering.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            stage: 0,
            before: Vec::new(),
        }
    }

    /// Set the stage.
    pub fn stage(mut self, stage: i32) -> Self {
        self.stage = stage;
        self
    }

    /// Force this tap to run before the named tap.
    pub fn before(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.before.push(name.into());
        self
    }
}

struct Tap<F: ?Sized> {
    options: TapOptions,
    callback: Box<F>,
}

// =============================================================================
// Tap List
// =============================================================================

/// Ordered tap storage shared by all hook kinds.
///
/// The insertion position is computed at registration: a new tap moves ahead
/// of existing taps with a higher stage, or of taps named in its `before`
/// list. Invocation order is therefore fixed once registration completes.
struct TapList<F: ?Sized> {
    taps: RwLock<Vec<Arc<Tap<F>>>>,
}

impl<F: ?Sized> TapList<F> {
    fn new() -> Self {
        Self {
            taps: RwLock::new(Vec::new()),
        }
    }

    fn insert(&self, options: TapOptions, callback: Box<F>) {
        let mut taps = self.taps.write();
        let mut index = taps.len();
        while index > 0 {
            let existing = &taps[index - 1].options;
            let runs_after = existing.stage > options.stage
                || options.before.iter().any(|name| *name == existing.name);
            if !runs_after {
                break;
            }
            index -= 1;
        }
        taps.insert(index, Arc::new(Tap { options, callback }));
    }

    fn snapshot(&self) -> Vec<Arc<Tap<F>>> {
        self.taps.read().clone()
    }

    fn copy_from(&self, other: &Self) {
        let mut taps = self.taps.write();
        taps.extend(other.taps.read().iter().cloned());
    }

    fn len(&self) -> usize {
        self.taps.read().len()
    }
}

// =============================================================================
// Sync Hook
// =============================================================================

type SyncTapFn<T> = dyn Fn(&T) -> BinderyResult<()> + Send + Sync;

/// A synchronous hook: taps run in resolved order and never suspend.
pub struct SyncHook<T: ?Sized> {
    name: &'static str,
    taps: TapList<SyncTapFn<T>>,
}

impl<T: ?Sized> SyncHook<T> {
    /// Create an empty hook with a stable name.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            taps: TapList::new(),
        }
    }

    /// The hook's stable name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a tap with default ordering.
    pub fn tap<F>(&self, name: impl Into<Cow<'static, str>>, callback: F)
    where
        F: Fn(&T) -> BinderyResult<()> + Send + Sync + 'static,
    {
        self.tap_with(TapOptions::named(name), callback);
    }

    /// Register a tap with explicit ordering options.
    pub fn tap_with<F>(&self, options: TapOptions, callback: F)
    where
        F: Fn(&T) -> BinderyResult<()> + Send + Sync + 'static,
    {
        self.taps.insert(options, Box::new(callback));
    }

    /// Dispatch to every tap; the first failure propagates out.
    pub fn call(&self, arg: &T) -> BinderyResult<()> {
        for tap in self.taps.snapshot() {
            (tap.callback)(arg)?;
        }
        Ok(())
    }

    /// Whether any tap is registered.
    pub fn is_used(&self) -> bool {
        self.taps.len() > 0
    }

    /// Append the taps of another hook of the same shape, preserving their
    /// resolved order.
    pub fn copy_taps_from(&self, other: &Self) {
        self.taps.copy_from(&other.taps);
    }
}

// =============================================================================
// Sync Bail Hook
// =============================================================================

type SyncBailTapFn<T, R> = dyn Fn(&T) -> BinderyResult<Option<R>> + Send + Sync;

/// A synchronous bailing hook: the first tap returning `Some` wins.
pub struct SyncBailHook<T: ?Sized, R> {
    name: &'static str,
    taps: TapList<SyncBailTapFn<T, R>>,
}

impl<T: ?Sized, R> SyncBailHook<T, R> {
    /// Create an empty hook with a stable name.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            taps: TapList::new(),
        }
    }

    /// The hook's stable name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a tap with default ordering.
    pub fn tap<F>(&self, name: impl Into<Cow<'static, str>>, callback: F)
    where
        F: Fn(&T) -> BinderyResult<Option<R>> + Send + Sync + 'static,
    {
        self.tap_with(TapOptions::named(name), callback);
    }

    /// Register a tap with explicit ordering options.
    pub fn tap_with<F>(&self, options: TapOptions, callback: F)
    where
        F: Fn(&T) -> BinderyResult<Option<R>> + Send + Sync + 'static,
    {
        self.taps.insert(options, Box::new(callback));
    }

    /// Dispatch until a tap returns `Some`; `None` means no tap had an
    /// opinion.
    pub fn call(&self, arg: &T) -> BinderyResult<Option<R>> {
        for tap in self.taps.snapshot() {
            if let Some(value) = (tap.callback)(arg)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Whether any tap is registered.
    pub fn is_used(&self) -> bool {
        self.taps.len() > 0
    }

    /// Append the taps of another hook of the same shape.
    pub fn copy_taps_from(&self, other: &Self) {
        self.taps.copy_from(&other.taps);
    }
}

// =============================================================================
// Async Series Hook
// =============================================================================

type AsyncTapFn<T> = dyn Fn(T) -> BoxFuture<'static, BinderyResult<()>> + Send + Sync;

/// An asynchronous hook whose taps run one after another.
///
/// Payloads are cheap-to-clone handles (`Arc`s or tuples of `Arc`s); each
/// tap receives its own clone so the returned future carries no borrow.
pub struct AsyncSeriesHook<T> {
    name: &'static str,
    taps: TapList<AsyncTapFn<T>>,
}

impl<T: Clone + Send + 'static> AsyncSeriesHook<T> {
    /// Create an empty hook with a stable name.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            taps: TapList::new(),
        }
    }

    /// The hook's stable name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a future-returning tap with default ordering.
    pub fn tap<F, Fut>(&self, name: impl Into<Cow<'static, str>>, callback: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BinderyResult<()>> + Send + 'static,
    {
        self.tap_with(TapOptions::named(name), callback);
    }

    /// Register a future-returning tap with explicit ordering options.
    pub fn tap_with<F, Fut>(&self, options: TapOptions, callback: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BinderyResult<()>> + Send + 'static,
    {
        self.taps
            .insert(options, Box::new(move |arg| Box::pin(callback(arg))));
    }

    /// Register a plain closure; it completes without suspending.
    pub fn tap_sync<F>(&self, name: impl Into<Cow<'static, str>>, callback: F)
    where
        F: Fn(&T) -> BinderyResult<()> + Send + Sync + 'static,
    {
        self.tap(name, move |arg: T| {
            let result = callback(&arg);
            async move { result }
        });
    }

    /// Dispatch taps sequentially; the first failure aborts the series and
    /// is attributed to the tap that surfaced it.
    pub async fn call(&self, arg: &T) -> BinderyResult<()> {
        for tap in self.taps.snapshot() {
            if let Err(err) = (tap.callback)(arg.clone()).await {
                return Err(err.into_tap_failure(self.name, tap.options.name.as_ref()));
            }
        }
        Ok(())
    }

    /// Whether any tap is registered.
    pub fn is_used(&self) -> bool {
        self.taps.len() > 0
    }

    /// Append the taps of another hook of the same shape.
    pub fn copy_taps_from(&self, other: &Self) {
        self.taps.copy_from(&other.taps);
    }
}

// =============================================================================
// Async Parallel Hook
// =============================================================================

/// An asynchronous hook whose taps all start before any is awaited.
///
/// Taps start in registration order; completion order is undefined. The
/// dispatch resolves after the last tap completes, or rejects as soon as any
/// tap fails.
pub struct AsyncParallelHook<T> {
    name: &'static str,
    taps: TapList<AsyncTapFn<T>>,
}

impl<T: Clone + Send + 'static> AsyncParallelHook<T> {
    /// Create an empty hook with a stable name.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            taps: TapList::new(),
        }
    }

    /// The hook's stable name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a future-returning tap with default ordering.
    pub fn tap<F, Fut>(&self, name: impl Into<Cow<'static, str>>, callback: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BinderyResult<()>> + Send + 'static,
    {
        self.tap_with(TapOptions::named(name), callback);
    }

    /// Register a future-returning tap with explicit ordering options.
    pub fn tap_with<F, Fut>(&self, options: TapOptions, callback: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BinderyResult<()>> + Send + 'static,
    {
        self.taps
            .insert(options, Box::new(move |arg| Box::pin(callback(arg))));
    }

    /// Register a plain closure; it completes without suspending.
    pub fn tap_sync<F>(&self, name: impl Into<Cow<'static, str>>, callback: F)
    where
        F: Fn(&T) -> BinderyResult<()> + Send + Sync + 'static,
    {
        self.tap(name, move |arg: T| {
            let result = callback(&arg);
            async move { result }
        });
    }

    /// Start every tap, then await them all; the first failure rejects the
    /// dispatch and is attributed to the tap that surfaced it.
    pub async fn call(&self, arg: &T) -> BinderyResult<()> {
        let taps = self.taps.snapshot();
        let hook_name = self.name;
        let futures: Vec<_> = taps
            .iter()
            .map(|tap| {
                let future = (tap.callback)(arg.clone());
                async move {
                    future
                        .await
                        .map_err(|err| err.into_tap_failure(hook_name, tap.options.name.as_ref()))
                }
            })
            .collect();
        futures::future::try_join_all(futures).await?;
        Ok(())
    }

    /// Whether any tap is registered.
    pub fn is_used(&self) -> bool {
        self.taps.len() > 0
    }

    /// Append the taps of another hook of the same shape.
    pub fn copy_taps_from(&self, other: &Self) {
        self.taps.copy_from(&other.taps);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BinderyError;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&()) -> BinderyResult<()> + Send + Sync>)
    {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_taps = log.clone();
        let make = move |label: &str| {
            let log = log_for_taps.clone();
            let label = label.to_string();
            Box::new(move |_arg: &()| {
                log.lock().unwrap().push(label.clone());
                Ok(())
            }) as Box<dyn Fn(&()) -> BinderyResult<()> + Send + Sync>
        };
        (log, make)
    }

    #[test]
    fn test_sync_hook_registration_order() {
        let hook = SyncHook::<()>::new("test");
        let (log, make) = recorder();
        hook.tap("a", make("a"));
        hook.tap("b", make("b"));
        hook.tap("c", make("c"));
        hook.call(&()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_stage_orders_taps() {
        let hook = SyncHook::<()>::new("test");
        let (log, make) = recorder();
        hook.tap_with(TapOptions::named("late").stage(10), make("late"));
        hook.tap_with(TapOptions::named("early").stage(-10), make("early"));
        hook.tap("middle", make("middle"));
        hook.call(&()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_before_forces_ordering() {
        let hook = SyncHook::<()>::new("test");
        let (log, make) = recorder();
        hook.tap("first", make("first"));
        hook.tap_with(TapOptions::named("jumper").before("first"), make("jumper"));
        hook.call(&()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["jumper", "first"]);
    }

    #[test]
    fn test_sync_hook_error_propagates() {
        let hook = SyncHook::<()>::new("test");
        hook.tap("boom", |_| Err(BinderyError::internal("boom")));
        hook.tap("never", |_| panic!("must not run"));
        assert!(hook.call(&()).is_err());
    }

    #[test]
    fn test_bail_hook_short_circuits() {
        let hook = SyncBailHook::<i32, &'static str>::new("test");
        hook.tap("no-opinion", |_| Ok(None));
        hook.tap("decider", |n| Ok((*n > 3).then_some("big")));
        hook.tap("fallback", |_| Ok(Some("fallback")));
        assert_eq!(hook.call(&5).unwrap(), Some("big"));
        // When the decider has no opinion, dispatch falls through.
        assert_eq!(hook.call(&1).unwrap(), Some("fallback"));
    }

    #[test]
    fn test_bail_hook_empty_is_none() {
        let hook = SyncBailHook::<(), bool>::new("test");
        assert_eq!(hook.call(&()).unwrap(), None);
    }

    #[tokio::test]
    async fn test_async_series_runs_in_order() {
        let hook = AsyncSeriesHook::<Arc<Mutex<Vec<u32>>>>::new("test");
        hook.tap("one", |log: Arc<Mutex<Vec<u32>>>| async move {
            tokio::task::yield_now().await;
            log.lock().unwrap().push(1);
            Ok(())
        });
        hook.tap("two", |log: Arc<Mutex<Vec<u32>>>| async move {
            log.lock().unwrap().push(2);
            Ok(())
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        hook.call(&log).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_async_series_aborts_on_failure() {
        let hook = AsyncSeriesHook::<Arc<Mutex<Vec<u32>>>>::new("test");
        hook.tap("fails", |_| async { Err(BinderyError::internal("abort")) });
        hook.tap("after", |log: Arc<Mutex<Vec<u32>>>| async move {
            log.lock().unwrap().push(99);
            Ok(())
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        assert!(hook.call(&log).await.is_err());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_async_tap_failures_name_hook_and_tap() {
        let hook = AsyncSeriesHook::<()>::new("emit");
        hook.tap("broken-plugin", |_| async {
            Err(BinderyError::internal("disk full"))
        });
        let err = hook.call(&()).await.unwrap_err();
        match err {
            BinderyError::HookTap { hook, tap, message } => {
                assert_eq!(hook, "emit");
                assert_eq!(tap, "broken-plugin");
                assert!(message.contains("disk full"));
            }
            other => panic!("expected a hook tap failure, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_tap_failures_are_wrapped_once() {
        let hook = AsyncParallelHook::<()>::new("make");
        hook.tap("outer", |_| async {
            Err(BinderyError::hook_tap("make", "inner", "already attributed"))
        });
        let err = hook.call(&()).await.unwrap_err();
        assert!(
            matches!(err, BinderyError::HookTap { ref tap, .. } if tap.as_str() == "inner"),
            "nested dispatch must keep the original attribution"
        );
    }

    #[tokio::test]
    async fn test_async_parallel_completes_all() {
        let hook = AsyncParallelHook::<Arc<Mutex<Vec<u32>>>>::new("test");
        for i in 0..4 {
            hook.tap(format!("tap-{i}"), move |log: Arc<Mutex<Vec<u32>>>| async move {
                tokio::task::yield_now().await;
                log.lock().unwrap().push(i);
                Ok(())
            });
        }
        let log = Arc::new(Mutex::new(Vec::new()));
        hook.call(&log).await.unwrap();
        let mut seen = log.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_copy_taps_from_preserves_order() {
        let parent = SyncHook::<()>::new("test");
        let (log, make) = recorder();
        parent.tap("a", make("a"));
        parent.tap("b", make("b"));

        let child = SyncHook::<()>::new("test");
        child.copy_taps_from(&parent);
        child.call(&()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
        assert!(child.is_used());
    }
}
