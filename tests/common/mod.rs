//! Shared helpers for the integration suites.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use bindery::fs::MemoryFileSystem;
use bindery::{AssetInfo, Compilation, Compiler, CompilerOptions, RawSource, Source};

/// A compiler wired to one in-memory filesystem for input, output and
/// records.
pub fn memory_compiler(output_path: &str) -> (Arc<Compiler>, Arc<MemoryFileSystem>) {
    let mut options = CompilerOptions::default();
    options.output.path = PathBuf::from(output_path);
    memory_compiler_with(options)
}

/// Same as [`memory_compiler`], with full control over the options.
pub fn memory_compiler_with(options: CompilerOptions) -> (Arc<Compiler>, Arc<MemoryFileSystem>) {
    let compiler = Compiler::new(options);
    let fs = Arc::new(MemoryFileSystem::new());
    compiler.set_input_file_system(fs.clone());
    compiler.set_output_file_system(fs.clone());
    compiler.set_intermediate_file_system(fs.clone());
    (compiler, fs)
}

/// Tap `make` so every build emits the given `(name, content, immutable)`
/// assets from fresh sources.
pub fn emit_on_make(compiler: &Arc<Compiler>, assets: &[(&str, &str, bool)]) {
    let assets: Vec<(String, String, bool)> = assets
        .iter()
        .map(|(name, content, immutable)| (name.to_string(), content.to_string(), *immutable))
        .collect();
    compiler
        .hooks
        .make
        .tap_sync("test-assets", move |compilation: &Arc<Compilation>| {
            for (name, content, immutable) in &assets {
                let source: Arc<dyn Source> = Arc::new(RawSource::from_string(content.clone()));
                let info = AssetInfo {
                    immutable: *immutable,
                    ..AssetInfo::default()
                };
                compilation.emit_asset(name.clone(), source, info)?;
            }
            Ok(())
        });
}

/// Tap `make` so every build emits the exact same source objects, which is
/// what keeps the driver's by-identity source cache warm across builds.
pub fn emit_sources_on_make(
    compiler: &Arc<Compiler>,
    assets: &[(&str, Arc<dyn Source>, bool)],
) {
    let assets: Vec<(String, Arc<dyn Source>, bool)> = assets
        .iter()
        .map(|(name, source, immutable)| (name.to_string(), source.clone(), *immutable))
        .collect();
    compiler
        .hooks
        .make
        .tap_sync("test-shared-sources", move |compilation: &Arc<Compilation>| {
            for (name, source, immutable) in &assets {
                let info = AssetInfo {
                    immutable: *immutable,
                    ..AssetInfo::default()
                };
                compilation.emit_asset(name.clone(), source.clone(), info)?;
            }
            Ok(())
        });
}
