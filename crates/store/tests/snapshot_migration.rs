//! v1/v2 → v3 snapshot migration against real files on disk.

use store::{Registry, SnapshotStore};

#[tokio::test]
async fn v1_snapshot_migrates_to_v3_and_keeps_legacy_views() {
    let dir = tempfile::tempdir().unwrap();
    let codebase = dir.path().join("p");
    std::fs::create_dir_all(&codebase).unwrap();
    let codebase_key = utils::path::path_key(&utils::path::to_absolute(codebase.to_str().unwrap()));

    let snapshot_path = dir.path().join("snapshot.json");
    std::fs::write(
        &snapshot_path,
        format!(
            r#"{{"indexedCodebases":["{}"],"indexingCodebases":[]}}"#,
            codebase_key
        ),
    )
    .unwrap();

    let registry = Registry::load(SnapshotStore::new(snapshot_path.clone())).await;

    // One record, keyed by a path-hash identity (the dir is not a git repo).
    assert_eq!(registry.len().await, 1);
    let records = registry.list_all().await;
    assert_eq!(records[0].identity_source, git::IdentitySource::PathHash);
    assert!(records[0].is_indexed());

    // The legacy view still answers with the original path.
    assert_eq!(registry.indexed_codebases().await, vec![codebase_key]);

    // The file on disk was rewritten as v3.
    let raw = std::fs::read_to_string(&snapshot_path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["formatVersion"], "v3");
    assert!(value["repositories"].is_object());
}

#[tokio::test]
async fn v1_indexing_progress_map_survives_migration() {
    let dir = tempfile::tempdir().unwrap();
    let codebase = dir.path().join("q");
    std::fs::create_dir_all(&codebase).unwrap();
    let codebase_key = utils::path::path_key(&utils::path::to_absolute(codebase.to_str().unwrap()));

    let snapshot_path = dir.path().join("snapshot.json");
    std::fs::write(
        &snapshot_path,
        format!(
            r#"{{"indexedCodebases":[],"indexingCodebases":{{"{}":42.5}}}}"#,
            codebase_key
        ),
    )
    .unwrap();

    let registry = Registry::load(SnapshotStore::new(snapshot_path)).await;
    let progress = registry.indexing_codebases().await;
    assert_eq!(progress.get(&codebase_key).copied(), Some(42.5));
}

#[tokio::test]
async fn v2_snapshot_migrates_with_per_path_state() {
    let dir = tempfile::tempdir().unwrap();
    let indexed = dir.path().join("done");
    let failed = dir.path().join("broken");
    std::fs::create_dir_all(&indexed).unwrap();
    std::fs::create_dir_all(&failed).unwrap();
    let indexed_key = utils::path::path_key(&utils::path::to_absolute(indexed.to_str().unwrap()));
    let failed_key = utils::path::path_key(&utils::path::to_absolute(failed.to_str().unwrap()));

    let snapshot_path = dir.path().join("snapshot.json");
    std::fs::write(
        &snapshot_path,
        format!(
            r#"{{
                "formatVersion": "v2",
                "codebases": {{
                    "{indexed_key}": {{"status":"indexed","indexedFiles":7,"totalChunks":99}},
                    "{failed_key}": {{"status":"indexfailed","errorMessage":"embedder down"}}
                }}
            }}"#
        ),
    )
    .unwrap();

    let registry = Registry::load(SnapshotStore::new(snapshot_path.clone())).await;
    assert_eq!(registry.len().await, 2);

    use store::snapshot::versions::v2::CodebaseInfo;
    assert!(matches!(
        registry.codebase_info(&indexed_key).await,
        Some(CodebaseInfo::Indexed { indexed_files: 7, total_chunks: 99, .. })
    ));
    assert!(matches!(
        registry.codebase_info(&failed_key).await,
        Some(CodebaseInfo::IndexFailed { ref error_message })
            if error_message.as_deref() == Some("embedder down")
    ));

    // Re-saved as v3; a second load takes the fast path and agrees.
    let raw = std::fs::read_to_string(&snapshot_path).unwrap();
    assert!(raw.contains("\"formatVersion\": \"v3\""));
    let reloaded = Registry::load(SnapshotStore::new(snapshot_path)).await;
    assert_eq!(reloaded.len().await, 2);
    assert_eq!(reloaded.indexed_codebases().await, vec![indexed_key]);
}

#[tokio::test]
async fn missing_paths_are_dropped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let alive = dir.path().join("alive");
    std::fs::create_dir_all(&alive).unwrap();
    let alive_key = utils::path::path_key(&utils::path::to_absolute(alive.to_str().unwrap()));

    let snapshot_path = dir.path().join("snapshot.json");
    std::fs::write(
        &snapshot_path,
        format!(
            r#"{{"indexedCodebases":["{alive_key}","/definitely/gone/by/now"],"indexingCodebases":[]}}"#
        ),
    )
    .unwrap();

    let registry = Registry::load(SnapshotStore::new(snapshot_path)).await;
    assert_eq!(registry.len().await, 1);
    assert_eq!(registry.indexed_codebases().await, vec![alive_key]);
}
