//! # Cross-Build Cache
//!
//! The cache is an opaque collaborator owned by the top-level compiler and
//! shared with every child. It is either `active` (a build is using it) or
//! `idle` (quiesced between builds); the two states are exclusive and the
//! driver transitions them around each build.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::BinderyResult;

// =============================================================================
// Cache Trait
// =============================================================================

/// Cross-build cache handle.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Quiesce the cache after a build. May flush to backing storage.
    async fn begin_idle(&self);

    /// Resume the cache before a build.
    async fn end_idle(&self) -> BinderyResult<()>;

    /// Persist the dependency set of the finished build.
    async fn store_build_dependencies(&self, deps: &HashSet<PathBuf>) -> BinderyResult<()>;

    /// Release everything. The compiler is unusable afterwards.
    async fn shutdown(&self) -> BinderyResult<()>;
}

// =============================================================================
// Memory Cache
// =============================================================================

#[derive(Default)]
struct MemoryCacheState {
    idle: bool,
    shut_down: bool,
    build_dependencies: HashSet<PathBuf>,
    idle_transitions: usize,
}

/// Default in-process cache implementation.
#[derive(Default)]
pub struct MemoryCache {
    state: Mutex<MemoryCacheState>,
}

impl MemoryCache {
    /// Create an active, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the cache is currently idle.
    pub fn is_idle(&self) -> bool {
        self.state.lock().idle
    }

    /// How many times the cache entered the idle state.
    pub fn idle_transitions(&self) -> usize {
        self.state.lock().idle_transitions
    }

    /// Dependencies stored by the last completed build.
    pub fn build_dependencies(&self) -> HashSet<PathBuf> {
        self.state.lock().build_dependencies.clone()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn begin_idle(&self) {
        let mut state = self.state.lock();
        if !state.idle {
            state.idle = true;
            state.idle_transitions += 1;
            tracing::debug!("cache entered idle state");
        }
    }

    async fn end_idle(&self) -> BinderyResult<()> {
        let mut state = self.state.lock();
        state.idle = false;
        tracing::debug!("cache resumed");
        Ok(())
    }

    async fn store_build_dependencies(&self, deps: &HashSet<PathBuf>) -> BinderyResult<()> {
        let mut state = self.state.lock();
        state.build_dependencies = deps.clone();
        tracing::debug!(count = deps.len(), "stored build dependencies");
        Ok(())
    }

    async fn shutdown(&self) -> BinderyResult<()> {
        let mut state = self.state.lock();
        state.shut_down = true;
        state.build_dependencies.clear();
        tracing::debug!("cache shut down");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_idle_transitions_are_counted() {
        let cache = MemoryCache::new();
        assert!(!cache.is_idle());

        cache.begin_idle().await;
        cache.begin_idle().await;
        assert!(cache.is_idle());
        assert_eq!(cache.idle_transitions(), 1);

        cache.end_idle().await.unwrap();
        assert!(!cache.is_idle());
        cache.begin_idle().await;
        assert_eq!(cache.idle_transitions(), 2);
    }

    #[tokio::test]
    async fn test_build_dependencies_round_trip() {
        let cache = MemoryCache::new();
        let mut deps = HashSet::new();
        deps.insert(PathBuf::from("/src/entry.js"));
        cache.store_build_dependencies(&deps).await.unwrap();
        assert_eq!(cache.build_dependencies(), deps);
    }
}
