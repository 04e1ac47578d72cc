//! # Error Handling
//!
//! Error taxonomy for the compilation driver. Every failure the driver can
//! surface maps to one variant here; async chains abort on the first error
//! and deliver it to the caller of `run`/`watch`/`run_as_child`/`close`.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Main Error Type
// =============================================================================

/// Main error type for the bindery compilation driver.
#[derive(Debug, Error, Diagnostic)]
pub enum BinderyError {
    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    /// A `run` or `watch` was entered while another build is in flight
    #[error("you ran bindery twice: each compiler only handles one concurrent build")]
    #[diagnostic(
        code(bindery::compiler::concurrent_build),
        help("Wait for the previous run to finish, or create a second compiler")
    )]
    ConcurrentBuild,

    /// The compiler was used after `close`
    #[error("compiler is closed: {operation} is no longer available")]
    #[diagnostic(code(bindery::compiler::closed))]
    Closed {
        /// The operation that was attempted
        operation: String,
    },

    // -------------------------------------------------------------------------
    // Records Errors
    // -------------------------------------------------------------------------
    /// The records sidecar exists but could not be parsed as JSON
    #[error("cannot parse records: {message}")]
    #[diagnostic(
        code(bindery::records::parse),
        help("Delete the records file to start from an empty state")
    )]
    RecordsParse {
        /// The original parse failure, prefixed
        message: String,
    },

    // -------------------------------------------------------------------------
    // Emission Errors
    // -------------------------------------------------------------------------
    /// Two target paths differ only by case within one emission
    #[error(
        "prevent writing to file that only differs in casing or query string from an already written file: {} and {}",
        .existing.display(),
        .conflicting.display()
    )]
    #[diagnostic(
        code(bindery::emit::case_collision),
        help("Rename one of the assets; case-insensitive filesystems would corrupt one of them")
    )]
    CaseCollision {
        /// The path that occupied the slot first
        existing: PathBuf,
        /// The path that collided with it
        conflicting: PathBuf,
    },

    // -------------------------------------------------------------------------
    // IO Errors
    // -------------------------------------------------------------------------
    /// Generic filesystem failure
    #[error("IO error: {message}")]
    #[diagnostic(code(bindery::io::error))]
    Io {
        /// Error message
        message: String,
        /// Path involved in the error
        path: Option<PathBuf>,
    },

    /// File read failure
    #[error("failed to read file: {}", .path.display())]
    #[diagnostic(code(bindery::io::read_error))]
    FileRead {
        /// Path to the file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File write failure
    #[error("failed to write file: {}", .path.display())]
    #[diagnostic(code(bindery::io::write_error))]
    FileWrite {
        /// Path to the file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Hook Errors
    // -------------------------------------------------------------------------
    /// A tap surfaced a failure through a hook
    #[error("hook tap failed in {hook} ({tap}): {message}")]
    #[diagnostic(code(bindery::hooks::tap_failure))]
    HookTap {
        /// The hook being dispatched
        hook: String,
        /// The tap that failed
        tap: String,
        /// Failure message
        message: String,
    },

    // -------------------------------------------------------------------------
    // Boundary Errors
    // -------------------------------------------------------------------------
    /// Misuse at an API boundary
    #[error("invalid argument: {message}")]
    #[diagnostic(code(bindery::argument))]
    Argument {
        /// What was wrong with the argument
        message: String,
    },

    /// The underlying cache failed to shut down on `close`
    #[error("cache shutdown failed: {message}")]
    #[diagnostic(code(bindery::cache::shutdown))]
    Shutdown {
        /// Failure message
        message: String,
    },

    // -------------------------------------------------------------------------
    // Generic Errors
    // -------------------------------------------------------------------------
    /// Internal invariant breakage
    #[error("internal error: {message}")]
    #[diagnostic(code(bindery::internal))]
    Internal {
        /// Error message
        message: String,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Result type for bindery operations.
pub type BinderyResult<T> = Result<T, BinderyError>;

// =============================================================================
// Error Conversions
// =============================================================================

impl From<std::io::Error> for BinderyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<serde_json::Error> for BinderyError {
    fn from(err: serde_json::Error) -> Self {
        Self::RecordsParse {
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Error Builder Helpers
// =============================================================================

impl BinderyError {
    /// Create an IO error carrying the path it happened on.
    pub fn io_at(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    /// Create a hook tap failure.
    pub fn hook_tap(
        hook: impl Into<String>,
        tap: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::HookTap {
            hook: hook.into(),
            tap: tap.into(),
            message: message.into(),
        }
    }

    /// Attribute a tap's failure to the hook and tap that surfaced it.
    ///
    /// An error that is already a tap failure passes through unchanged, so
    /// nested dispatches do not stack wrappers.
    pub(crate) fn into_tap_failure(self, hook: &str, tap: &str) -> Self {
        match self {
            Self::HookTap { .. } => self,
            other => Self::hook_tap(hook, tap, other.to_string()),
        }
    }

    /// Create an argument error.
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_collision_names_both_paths() {
        let error = BinderyError::CaseCollision {
            existing: PathBuf::from("/out/Foo.js"),
            conflicting: PathBuf::from("/out/foo.js"),
        };
        let text = error.to_string();
        assert!(text.contains("/out/Foo.js"));
        assert!(text.contains("/out/foo.js"));
    }

    #[test]
    fn test_error_from_io() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: BinderyError = io_error.into();
        assert!(matches!(error, BinderyError::Io { .. }));
    }

    #[test]
    fn test_records_parse_keeps_original_message() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let original = parse_err.to_string();
        let error: BinderyError = parse_err.into();
        assert!(error.to_string().contains(&original));
    }
}
