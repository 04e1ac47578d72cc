//! # Child Compilers
//!
//! A child compiler runs a nested sub-build inside a parent compilation. It
//! shares the parent's input filesystem, resolver factory, change tracking
//! and cache, aliases a slice of the parent's records, and by default does
//! not emit to disk: its assets are republished into the parent instead.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use crate::compilation::{Chunk, Compilation};
use crate::compiler::{Compiler, Plugin};
use crate::config::OutputOverlay;
use crate::error::{BinderyError, BinderyResult};

/// Key a child's records slice by the child name made relative to the build
/// context, so records stay stable across checkouts.
fn relative_name(context: &Path, name: &str) -> String {
    Path::new(name)
        .strip_prefix(context)
        .map(|relative| relative.to_string_lossy().into_owned())
        .unwrap_or_else(|_| name.to_string())
}

impl Compiler {
    /// Derive a child compiler from one of this compiler's compilations.
    ///
    /// The child inherits every hook tap except the lifecycle set
    /// `{make, compile, emit, after_emit, invalid, done, this_compilation}`.
    pub fn create_child_compiler(
        self: &Arc<Self>,
        compilation: &Arc<Compilation>,
        name: &str,
        index: usize,
        output_overlay: &OutputOverlay,
        plugins: Vec<Box<dyn Plugin>>,
    ) -> BinderyResult<Arc<Compiler>> {
        let mut options = self.options.with_output_overlay(output_overlay);
        options.name = Some(name.to_string());
        options.context = self.context().to_path_buf();
        // Children never write their own sidecar; they go through the alias.
        options.records_input_path = None;
        options.records_output_path = None;

        let rel_name = relative_name(self.context(), name);
        let records = self.records().child(&rel_name, index);
        let compiler_path = format!("{}{}|{}|", self.compiler_path(), name, index);

        let child = Compiler::new_derived(
            options,
            compiler_path,
            self.root_weak(),
            compilation.clone(),
            records,
            self.cache().clone(),
            self.resolver_factory().clone(),
            self.input_file_system(),
            self.intermediate_file_system(),
            self.changes.clone(),
        );

        child.hooks.inherit_from(&self.hooks);

        for plugin in &plugins {
            plugin.apply(&child)?;
        }

        compilation
            .hooks
            .child_compiler
            .call(&(child.clone(), name.to_string(), index))?;

        Ok(child)
    }

    /// Run one compile of a child compiler and fold the result back into
    /// the parent: the compilation joins the parent's children, every asset
    /// is republished through `emit_asset`, and the entry chunks are
    /// collected across entrypoints.
    pub async fn run_as_child(
        self: &Arc<Self>,
    ) -> BinderyResult<(Vec<Arc<Chunk>>, Arc<Compilation>)> {
        let parent = self
            .parent_compilation()
            .cloned()
            .ok_or_else(|| BinderyError::argument("run_as_child called on a top-level compiler"))?;

        let start = SystemTime::now();
        let compilation = self.compile_once().await?;

        parent.add_child(compilation.clone());
        for asset in compilation.get_assets() {
            parent.emit_asset(&asset.name, asset.source.clone(), asset.info.clone())?;
        }

        let entries: Vec<Arc<Chunk>> = compilation
            .entrypoints()
            .iter()
            .flat_map(|entrypoint| entrypoint.chunks.clone())
            .collect();

        compilation.set_start_time(Some(start));
        compilation.set_end_time(SystemTime::now());
        Ok((entries, compilation))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerOptions;
    use crate::records::Records;
    use serde_json::json;

    fn parent_with_compilation() -> (Arc<Compiler>, Arc<Compilation>) {
        let parent = Compiler::new(CompilerOptions::default());
        let compilation = Arc::new(Compilation::new(
            None,
            Records::new(),
            crate::compiler::CompilationParams::detached(),
            parent.hooks.clone(),
        ));
        (parent, compilation)
    }

    #[test]
    fn test_compiler_path_concatenates() {
        let (parent, compilation) = parent_with_compilation();
        let child = parent
            .create_child_compiler(&compilation, "html", 0, &OutputOverlay::default(), vec![])
            .unwrap();
        assert_eq!(child.compiler_path(), "html|0|");
        assert!(child.compiler_path().starts_with(parent.compiler_path()));
        assert!(child.compiler_path().ends_with('|'));

        let grandchild = child
            .create_child_compiler(&compilation, "css", 2, &OutputOverlay::default(), vec![])
            .unwrap();
        assert_eq!(grandchild.compiler_path(), "html|0|css|2|");
    }

    #[test]
    fn test_child_shares_and_detaches_the_right_parts() {
        let (parent, compilation) = parent_with_compilation();
        let child = parent
            .create_child_compiler(&compilation, "html", 0, &OutputOverlay::default(), vec![])
            .unwrap();

        assert!(child.is_child());
        assert!(!parent.is_child());
        assert!(child.output_file_system().is_none());
        assert!(Arc::ptr_eq(child.cache(), parent.cache()));
        assert!(Arc::ptr_eq(child.resolver_factory(), parent.resolver_factory()));
        let root = child.root().expect("root alive");
        assert!(Arc::ptr_eq(&root, &parent));
    }

    #[test]
    fn test_child_records_alias_parent_subtree() {
        let (parent, compilation) = parent_with_compilation();
        let child = parent
            .create_child_compiler(&compilation, "html", 0, &OutputOverlay::default(), vec![])
            .unwrap();

        child.records().replace(json!({ "ids": [1, 2] }));
        assert_eq!(
            parent.records().snapshot(),
            json!({ "html": [{ "ids": [1, 2] }] })
        );
    }

    #[test]
    fn test_excluded_hooks_are_not_inherited() {
        let (parent, compilation) = parent_with_compilation();
        parent.hooks.make.tap_sync("parent-make", |_| Ok(()));
        parent.hooks.emit.tap_sync("parent-emit", |_| Ok(()));
        parent.hooks.done.tap_sync("parent-done", |_| Ok(()));
        parent.hooks.this_compilation.tap("parent-this", |_| Ok(()));
        parent.hooks.compilation.tap("parent-compilation", |_| Ok(()));
        parent.hooks.after_compile.tap_sync("parent-after", |_| Ok(()));

        let child = parent
            .create_child_compiler(&compilation, "html", 0, &OutputOverlay::default(), vec![])
            .unwrap();

        assert!(!child.hooks.make.is_used());
        assert!(!child.hooks.emit.is_used());
        assert!(!child.hooks.done.is_used());
        assert!(!child.hooks.this_compilation.is_used());
        assert!(child.hooks.compilation.is_used());
        assert!(child.hooks.after_compile.is_used());
    }

    #[test]
    fn test_child_compiler_hook_fires() {
        let (parent, compilation) = parent_with_compilation();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        compilation.hooks.child_compiler.tap(
            "probe",
            move |(child, name, index): &(Arc<Compiler>, String, usize)| {
                sink.lock().push((child.compiler_path().to_string(), name.clone(), *index));
                Ok(())
            },
        );

        parent
            .create_child_compiler(&compilation, "html", 3, &OutputOverlay::default(), vec![])
            .unwrap();
        assert_eq!(
            *seen.lock(),
            vec![("html|3|".to_string(), "html".to_string(), 3)]
        );
    }

    #[tokio::test]
    async fn test_run_as_child_republishes_assets() {
        use crate::source::{AssetInfo, RawSource, Source};

        let (parent, parent_compilation) = parent_with_compilation();
        let child = parent
            .create_child_compiler(&parent_compilation, "html", 0, &OutputOverlay::default(), vec![])
            .unwrap();

        child.hooks.make.tap_sync("emitter", |compilation: &Arc<Compilation>| {
            let source: Arc<dyn Source> = Arc::new(RawSource::from_string("<html/>"));
            compilation.emit_asset("index.html", source, AssetInfo::default())
        });

        let (entries, child_compilation) = child.run_as_child().await.unwrap();
        assert!(entries.is_empty());
        assert_eq!(parent_compilation.children().len(), 1);
        assert!(parent_compilation.get_asset("index.html").is_some());
        assert!(child_compilation.end_time().is_some());
    }

    #[tokio::test]
    async fn test_run_as_child_requires_a_parent() {
        let parent = Compiler::new(CompilerOptions::default());
        let err = parent.run_as_child().await.unwrap_err();
        assert!(matches!(err, BinderyError::Argument { .. }));
    }
}
