//! # Bindery
//!
//! The compilation driver of a module-bundling build system: it accepts a
//! validated configuration, drives the lifecycle of one or more builds
//! (run-once or watch mode), coordinates plugins through a typed hook bus,
//! produces sealed compilation artifact sets, and materialises assets with
//! incremental-write semantics.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Plugins                             │
//! │        (tap the compiler and compilation hook tables)       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Compiler Driver                         │
//! │  run/watch → read_records → compile → emit → emit_records   │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Output Filesystem                           │
//! │  (bounded write pool, generation counters, byte comparison) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Module-graph construction, resolution, chunking and code generation are
//! collaborator concerns; their surfaces appear here as traits and opaque
//! handles.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bindery::{create_compiler, CompilerOptions};
//!
//! let options = CompilerOptions::load("bindery.toml")?;
//! let compiler = create_compiler(options, plugins)?;
//! let stats = compiler.run().await?;
//! ```

#![warn(missing_docs)]

// =============================================================================
// Hook Bus
// =============================================================================

pub mod hooks;

// =============================================================================
// Configuration
// =============================================================================

pub mod config;

// =============================================================================
// Records Store
// =============================================================================

pub mod records;

// =============================================================================
// Filesystem Abstraction
// =============================================================================

pub mod fs;

// =============================================================================
// Sources
// =============================================================================

pub mod source;

// =============================================================================
// Collaborators
// =============================================================================

pub mod cache;
pub mod compilation;

// =============================================================================
// Compiler Driver
// =============================================================================

pub mod compiler;

mod child;
mod emit;

// =============================================================================
// Watch Mode
// =============================================================================

pub mod watching;

// =============================================================================
// Logging
// =============================================================================

pub mod logger;

// =============================================================================
// Error Handling
// =============================================================================

pub mod error;

// =============================================================================
// Public Re-exports
// =============================================================================

pub use cache::{Cache, MemoryCache};
pub use compilation::{Chunk, Compilation, CompilationHooks, Entrypoint, Stats};
pub use compiler::{
    create_compiler, CompilationParams, Compiler, CompilerHooks, ContextModuleFactory,
    NormalModuleFactory, Plugin, ResolverFactory,
};
pub use config::{CompilerOptions, EntryOptions, OutputOptions, OutputOverlay, WatchOptions};
pub use emit::AssetEmittedInfo;
pub use error::{BinderyError, BinderyResult};
pub use logger::{CompilerLogger, LogLevel};
pub use records::Records;
pub use source::{AssetEntry, AssetInfo, RawSource, SizeOnlySource, Source};
pub use watching::{WatchHandler, Watching};

// =============================================================================
// Prelude
// =============================================================================

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::compilation::{Compilation, Stats};
    pub use crate::compiler::{create_compiler, Compiler, Plugin};
    pub use crate::config::CompilerOptions;
    pub use crate::error::{BinderyError, BinderyResult};
    pub use crate::fs::{InputFileSystem, MemoryFileSystem, NativeFileSystem, OutputFileSystem};
    pub use crate::source::{AssetInfo, RawSource, Source};
}

// =============================================================================
// Constants
// =============================================================================

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name.
pub const CONFIG_FILE: &str = "bindery.toml";
