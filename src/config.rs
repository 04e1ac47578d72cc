//! # Configuration
//!
//! The normalised build configuration consumed by the driver. Validation and
//! normalisation happen upstream; the driver only reads these values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BinderyError, BinderyResult};

// =============================================================================
// Compiler Options
// =============================================================================

/// Normalised configuration for one compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Name of the configuration, surfaced on compilations
    pub name: Option<String>,

    /// Absolute base path for the build
    pub context: PathBuf,

    /// Output settings
    pub output: OutputOptions,

    /// Path the records sidecar is read from
    pub records_input_path: Option<PathBuf>,

    /// Path the records sidecar is written to
    pub records_output_path: Option<PathBuf>,

    /// Watch-mode settings
    pub watch: WatchOptions,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            name: None,
            context: PathBuf::from("."),
            output: OutputOptions::default(),
            records_input_path: None,
            records_output_path: None,
            watch: WatchOptions::default(),
        }
    }
}

impl CompilerOptions {
    /// Load options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> BinderyResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| BinderyError::FileRead {
            path: path.to_path_buf(),
            source: err,
        })?;
        toml::from_str(&content).map_err(|err| BinderyError::Argument {
            message: format!("failed to parse {}: {err}", path.display()),
        })
    }

    /// Merge an output overlay into a copy of these options.
    ///
    /// Only fields present in the overlay replace the base values; used when
    /// deriving child compilers.
    pub fn with_output_overlay(&self, overlay: &OutputOverlay) -> Self {
        let mut options = self.clone();
        if let Some(path) = &overlay.path {
            options.output.path = path.clone();
        }
        if let Some(compare) = overlay.compare_before_emit {
            options.output.compare_before_emit = compare;
        }
        options
    }
}

// =============================================================================
// Output Options
// =============================================================================

/// Where and how assets are materialised.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOptions {
    /// Directory assets land in
    pub path: PathBuf,

    /// Before writing over an existing file, read it back and skip the write
    /// when the bytes already match
    pub compare_before_emit: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dist"),
            compare_before_emit: true,
        }
    }
}

/// Partial output settings applied on top of a parent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOverlay {
    /// Replacement output directory
    pub path: Option<PathBuf>,

    /// Replacement compare-before-emit flag
    pub compare_before_emit: Option<bool>,
}

// =============================================================================
// Watch Options
// =============================================================================

/// Watch-mode tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Window for aggregating change bursts into one rebuild, in milliseconds
    pub aggregate_timeout_ms: u64,

    /// Poll fallback interval for backends without native events, in
    /// milliseconds
    pub poll_interval_ms: u64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            aggregate_timeout_ms: 20,
            poll_interval_ms: 100,
        }
    }
}

// =============================================================================
// Entry Description
// =============================================================================

/// A single entrypoint request, as seen by the `entry_option` hook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryOptions {
    /// Entrypoint name
    pub name: Option<String>,
    /// Modules the entrypoint starts from
    pub import: Vec<String>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CompilerOptions::default();
        assert_eq!(options.output.path, PathBuf::from("dist"));
        assert!(options.output.compare_before_emit);
        assert!(options.records_input_path.is_none());
    }

    #[test]
    fn test_output_overlay_merges_only_present_fields() {
        let base = CompilerOptions::default();
        let overlay = OutputOverlay {
            path: Some(PathBuf::from("/elsewhere")),
            compare_before_emit: None,
        };
        let merged = base.with_output_overlay(&overlay);
        assert_eq!(merged.output.path, PathBuf::from("/elsewhere"));
        assert!(merged.output.compare_before_emit);
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bindery.toml");
        std::fs::write(
            &path,
            r#"
name = "site"

[output]
path = "/out"
compare_before_emit = false
"#,
        )
        .unwrap();

        let options = CompilerOptions::load(&path).unwrap();
        assert_eq!(options.name.as_deref(), Some("site"));
        assert_eq!(options.output.path, PathBuf::from("/out"));
        assert!(!options.output.compare_before_emit);
    }
}
