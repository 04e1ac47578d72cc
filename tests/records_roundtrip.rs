//! Records sidecar canonicalisation and round-trip behavior.

mod common;

use std::path::{Path, PathBuf};

use bindery::fs::{InputFileSystem, MemoryFileSystem};
use bindery::records::to_canonical_json;
use bindery::Records;
use common::memory_compiler_with;
use proptest::prelude::*;
use serde_json::{json, Value};

#[tokio::test]
async fn records_are_canonicalised_on_emit() {
    let mut options = bindery::CompilerOptions::default();
    options.output.path = PathBuf::from("/out");
    options.records_output_path = Some(PathBuf::from("/records/state.json"));
    let (compiler, fs) = memory_compiler_with(options);

    compiler
        .records()
        .replace(json!({ "z": 1, "a": { "c": 3, "b": 2 } }));
    compiler.emit_records().await.unwrap();

    let text = String::from_utf8(
        fs.read_file(Path::new("/records/state.json")).await.unwrap(),
    )
    .unwrap();

    // Keys sorted at every depth, 2-space indentation.
    assert!(text.starts_with("{\n  \"a\""), "unexpected layout: {text}");
    let b = text.find("\"b\"").unwrap();
    let c = text.find("\"c\"").unwrap();
    let z = text.find("\"z\"").unwrap();
    assert!(b < c && c < z);

    let reloaded: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(reloaded, json!({ "a": { "b": 2, "c": 3 }, "z": 1 }));
}

#[tokio::test]
async fn emit_then_read_round_trips() {
    let mut options = bindery::CompilerOptions::default();
    options.records_input_path = Some(PathBuf::from("/records.json"));
    options.records_output_path = Some(PathBuf::from("/records.json"));
    let (compiler, _fs) = memory_compiler_with(options);

    let value = json!({
        "modules": { "src/a.js": 1, "src/b.js": 2 },
        "chunks": [ { "id": 0, "names": ["main"] } ]
    });
    compiler.records().replace(value.clone());
    compiler.emit_records().await.unwrap();

    compiler.records().replace(json!({}));
    compiler.read_records().await.unwrap();
    assert_eq!(compiler.records().snapshot(), value);
}

#[tokio::test]
async fn unset_paths_are_harmless() {
    let (compiler, fs) = memory_compiler_with(bindery::CompilerOptions::default());
    compiler.records().replace(json!({ "kept": true }));

    // No output path: nothing written.
    compiler.emit_records().await.unwrap();
    assert_eq!(fs.file_count(), 0);

    // No input path: records reset to empty.
    compiler.read_records().await.unwrap();
    assert_eq!(compiler.records().snapshot(), json!({}));
}

// =============================================================================
// Properties
// =============================================================================

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1_000_000i64..1_000_000).prop_map(|n| json!(n)),
        "[a-z0-9]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

proptest! {
    /// Canonical serialisation is insertion-order independent: building the
    /// same object forward or backward yields byte-identical sidecars.
    #[test]
    fn canonical_form_is_order_independent(
        entries in prop::collection::vec(("[a-z]{1,6}", arb_json()), 0..6)
    ) {
        let mut forward = serde_json::Map::new();
        for (key, value) in &entries {
            forward.insert(key.clone(), value.clone());
        }
        let mut backward = serde_json::Map::new();
        for (key, value) in entries.iter().rev() {
            backward.insert(key.clone(), value.clone());
        }
        prop_assert_eq!(
            to_canonical_json(&Value::Object(forward)).unwrap(),
            to_canonical_json(&Value::Object(backward)).unwrap()
        );
    }

    /// Persisting and reloading any records tree yields an equal value.
    #[test]
    fn persist_load_round_trip(value in arb_json()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let fs = MemoryFileSystem::new();
            let records = Records::new();
            records.replace(value.clone());
            records
                .persist(&fs, Some(Path::new("/records.json")))
                .await
                .unwrap();

            let reloaded = Records::new();
            reloaded
                .load(&fs, Some(Path::new("/records.json")))
                .await
                .unwrap();
            assert_eq!(reloaded.snapshot(), value);
        });
    }
}

#[tokio::test]
async fn child_records_survive_the_round_trip() {
    let mut options = bindery::CompilerOptions::default();
    options.records_input_path = Some(PathBuf::from("/records.json"));
    options.records_output_path = Some(PathBuf::from("/records.json"));
    let (compiler, _fs) = memory_compiler_with(options);

    // A child writes through its alias before the parent persists.
    let compilation = compiler.compile_once().await.unwrap();
    let child = compiler
        .create_child_compiler(
            &compilation,
            "html",
            0,
            &bindery::OutputOverlay::default(),
            vec![],
        )
        .unwrap();
    child.records().replace(json!({ "ids": { "b": 2, "a": 1 } }));

    compiler.emit_records().await.unwrap();
    compiler.records().replace(json!({}));
    compiler.read_records().await.unwrap();
    assert_eq!(
        compiler.records().snapshot(),
        json!({ "html": [{ "ids": { "a": 1, "b": 2 } }] })
    );
}
