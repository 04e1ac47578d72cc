//! # Infrastructure Logging
//!
//! Logging that is not tied to one compilation: cache activity, filesystem
//! details, watcher churn. Every message first passes through the
//! `infrastructure_log` sync-bail hook so plugins can consume or reroute it;
//! unconsumed messages fall through to `tracing`.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::compiler::CompilerHooks;
use crate::error::{BinderyError, BinderyResult};

// =============================================================================
// Log Level
// =============================================================================

/// Severity of an infrastructure log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Unrecoverable problems
    Error,
    /// Recoverable problems
    Warn,
    /// Important progress information
    Info,
    /// Unstructured output
    Log,
    /// Developer-facing detail
    Debug,
    /// High-volume tracing detail
    Trace,
}

// =============================================================================
// Logger Name
// =============================================================================

enum NameState {
    Pending(Box<dyn Fn() -> String + Send + Sync>),
    Resolved(String),
    Invalid,
}

struct NameCell {
    state: Mutex<NameState>,
}

impl NameCell {
    fn resolved(name: String) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(NameState::Resolved(name)),
        })
    }

    fn pending(thunk: Box<dyn Fn() -> String + Send + Sync>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(NameState::Pending(thunk)),
        })
    }

    /// Resolve the name, running a pending thunk on first use.
    fn resolve(&self) -> BinderyResult<String> {
        let mut state = self.state.lock();
        match &*state {
            NameState::Resolved(name) => Ok(name.clone()),
            NameState::Invalid => Err(BinderyError::argument(
                "logger name thunk returned an empty name",
            )),
            NameState::Pending(thunk) => {
                let name = thunk();
                if name.is_empty() {
                    *state = NameState::Invalid;
                    Err(BinderyError::argument(
                        "logger name thunk returned an empty name",
                    ))
                } else {
                    *state = NameState::Resolved(name.clone());
                    Ok(name)
                }
            }
        }
    }
}

// =============================================================================
// Compiler Logger
// =============================================================================

/// A named logger routed through the compiler's infrastructure-log hook.
#[derive(Clone)]
pub struct CompilerLogger {
    name: Arc<NameCell>,
    hooks: Arc<CompilerHooks>,
}

impl std::fmt::Debug for CompilerLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerLogger").finish_non_exhaustive()
    }
}

impl CompilerLogger {
    /// Create a logger with an eagerly validated name.
    pub(crate) fn new(hooks: Arc<CompilerHooks>, name: String) -> BinderyResult<Self> {
        if name.is_empty() {
            return Err(BinderyError::argument("logger name must not be empty"));
        }
        Ok(Self {
            name: NameCell::resolved(name),
            hooks,
        })
    }

    /// Create a logger whose name is computed on first message.
    pub(crate) fn with_thunk(
        hooks: Arc<CompilerHooks>,
        thunk: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: NameCell::pending(Box::new(thunk)),
            hooks,
        }
    }

    /// Derive a logger named `parent/child`.
    ///
    /// The parent name stays lazily resolved; only the suffix is validated
    /// here.
    pub fn child(&self, name: impl Into<String>) -> BinderyResult<Self> {
        let suffix = name.into();
        if suffix.is_empty() {
            return Err(BinderyError::argument("child logger name must not be empty"));
        }
        let parent = self.name.clone();
        Ok(Self {
            name: NameCell::pending(Box::new(move || match parent.resolve() {
                Ok(base) => format!("{base}/{suffix}"),
                Err(_) => String::new(),
            })),
            hooks: self.hooks.clone(),
        })
    }

    /// Log at error level.
    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message.as_ref());
    }

    /// Log at warning level.
    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warn, message.as_ref());
    }

    /// Log at info level.
    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message.as_ref());
    }

    /// Log without a specific severity.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.dispatch(level, message);
    }

    /// Log at debug level.
    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, message.as_ref());
    }

    /// Log at trace level.
    pub fn trace(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Trace, message.as_ref());
    }

    fn dispatch(&self, level: LogLevel, message: &str) {
        let origin = match self.name.resolve() {
            Ok(name) => name,
            Err(err) => {
                // Misuse surfaces on the sink instead of silently dropping.
                tracing::error!(target: "bindery", "{err}");
                return;
            }
        };
        let payload = (origin, level, message.to_string());
        match self.hooks.infrastructure_log.call(&payload) {
            Ok(Some(true)) => {}
            Ok(_) => Self::sink(&payload.0, level, message),
            Err(err) => {
                tracing::error!(target: "bindery", "infrastructure log tap failed: {err}");
                Self::sink(&payload.0, level, message);
            }
        }
    }

    fn sink(origin: &str, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => tracing::error!(target: "bindery", "[{origin}] {message}"),
            LogLevel::Warn => tracing::warn!(target: "bindery", "[{origin}] {message}"),
            LogLevel::Info | LogLevel::Log => {
                tracing::info!(target: "bindery", "[{origin}] {message}");
            }
            LogLevel::Debug => tracing::debug!(target: "bindery", "[{origin}] {message}"),
            LogLevel::Trace => tracing::trace!(target: "bindery", "[{origin}] {message}"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    fn hooks() -> Arc<CompilerHooks> {
        Arc::new(CompilerHooks::new())
    }

    #[test]
    fn test_empty_name_is_an_argument_error() {
        let err = CompilerLogger::new(hooks(), String::new()).unwrap_err();
        assert!(matches!(err, BinderyError::Argument { .. }));
    }

    #[test]
    fn test_messages_flow_through_the_hook() {
        let hooks = hooks();
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        hooks.infrastructure_log.tap(
            "collector",
            move |(origin, level, message): &(String, LogLevel, String)| {
                sink.lock().push((origin.clone(), *level, message.clone()));
                Ok(Some(true))
            },
        );

        let logger = CompilerLogger::new(hooks, "cache".to_string()).unwrap();
        logger.info("resumed");

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "cache");
        assert_eq!(seen[0].1, LogLevel::Info);
        assert_eq!(seen[0].2, "resumed");
    }

    #[test]
    fn test_thunk_name_resolves_on_first_message() {
        let hooks = hooks();
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        hooks.infrastructure_log.tap(
            "collector",
            move |(origin, _, _): &(String, LogLevel, String)| {
                sink.lock().push(origin.clone());
                Ok(Some(true))
            },
        );

        let logger = CompilerLogger::with_thunk(hooks, || "lazy".to_string());
        logger.debug("first");
        logger.debug("second");
        assert_eq!(*seen.lock(), vec!["lazy".to_string(), "lazy".to_string()]);
    }

    #[test]
    fn test_child_names_concatenate_with_slash() {
        let hooks = hooks();
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        hooks.infrastructure_log.tap(
            "collector",
            move |(origin, _, _): &(String, LogLevel, String)| {
                sink.lock().push(origin.clone());
                Ok(Some(true))
            },
        );

        let logger = CompilerLogger::new(hooks, "watcher".to_string()).unwrap();
        let child = logger.child("poller").unwrap();
        child.trace("tick");
        assert_eq!(*seen.lock(), vec!["watcher/poller".to_string()]);
        assert!(logger.child("").is_err());
    }
}
