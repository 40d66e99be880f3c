// SPDX-License-Identifier: MIT OR Apache-2.0
//! The package round-trip contract, with the literal entries from the
//! write-protocol scenarios.

use qmcp_core::package::{CopyMode, Manifest, ManifestEntry};
use serde_json::json;

fn scenario_manifest() -> Manifest {
    Manifest::new(
        vec![
            ManifestEntry {
                logical_path: "a/x.csv".into(),
                physical_uri: "s3://b/x.csv".into(),
                size: 100,
                hash: "aa".repeat(32),
            },
            ManifestEntry {
                logical_path: "a/y.csv".into(),
                physical_uri: "s3://b/y.csv".into(),
                size: 200,
                hash: "bb".repeat(32),
            },
        ],
        json!({"k": "v"}),
    )
    .unwrap()
}

#[test]
fn identical_writes_produce_identical_top_hashes() {
    let first = scenario_manifest().top_hash();
    let second = scenario_manifest().top_hash();
    assert_eq!(first, second);
}

#[test]
fn manifest_round_trip_preserves_paths_uris_and_hash() {
    let manifest = scenario_manifest();
    let top_hash = manifest.top_hash();

    let serialized = serde_json::to_string(&manifest).unwrap();
    let read_back: Manifest = serde_json::from_str(&serialized).unwrap();

    let paths: Vec<&str> = read_back
        .entries()
        .iter()
        .map(|e| e.logical_path.as_str())
        .collect();
    assert_eq!(paths, vec!["a/x.csv", "a/y.csv"]);
    assert_eq!(read_back.get("a/x.csv").unwrap().physical_uri, "s3://b/x.csv");
    assert_eq!(read_back.get("a/y.csv").unwrap().physical_uri, "s3://b/y.csv");
    assert_eq!(read_back.top_hash(), top_hash);
}

#[test]
fn copy_mode_none_leaves_physical_uris_untouched() {
    // copy_mode=none is the default; it never rewrites references.
    assert_eq!(CopyMode::default(), CopyMode::None);
    let manifest = scenario_manifest();
    for entry in manifest.entries() {
        assert!(entry.physical_uri.starts_with("s3://b/"));
    }
}

#[test]
fn metadata_changes_move_the_hash() {
    let base = scenario_manifest().top_hash();
    let changed = Manifest::new(
        scenario_manifest().entries().to_vec(),
        json!({"k": "other"}),
    )
    .unwrap()
    .top_hash();
    assert_ne!(base, changed);
}

#[test]
fn update_merge_preserves_history_reachability() {
    // Update-replace: the new revision shadows a path, the prior manifest
    // still hashes to its original identity.
    let prior = scenario_manifest();
    let prior_hash = prior.top_hash();

    let replacement = ManifestEntry {
        logical_path: "a/x.csv".into(),
        physical_uri: "s3://b/x-v2.csv".into(),
        size: 150,
        hash: "cc".repeat(32),
    };
    let merged = qmcp_backend_direct::merge_update_entries(&prior, vec![replacement]);
    let updated = Manifest::new(merged, prior.metadata().clone()).unwrap();

    assert_ne!(updated.top_hash(), prior_hash);
    assert_eq!(
        updated.get("a/x.csv").unwrap().physical_uri,
        "s3://b/x-v2.csv"
    );
    assert_eq!(
        updated.get("a/y.csv").unwrap().physical_uri,
        "s3://b/y.csv"
    );
    // The prior revision's identity is untouched by the update.
    assert_eq!(prior.top_hash(), prior_hash);
}
