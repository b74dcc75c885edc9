//! Versioned on-disk snapshot of the repository registry.
//!
//! Three formats are accepted on read; only v3 is ever written. v1 and v2
//! referenced repositories by filesystem path, so upgrading them requires
//! resolving each path to a canonical identity and grouping the results.
//! A snapshot that cannot be parsed never takes the service down: it is
//! logged and replaced by an empty one.

pub mod versions;

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use chrono::Utc;
use git::{GitCli, ResolveOptions, resolve_identity};
use thiserror::Error;
use versions::{
    v1::V1Snapshot,
    v2::{CodebaseInfo, V2Snapshot},
    v3::{BranchState, BranchStatus, RepoRecord, UNKNOWN_BRANCH, V3Snapshot},
};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
enum AnySnapshot {
    V1(V1Snapshot),
    V2(V2Snapshot),
    V3(V3Snapshot),
}

fn parse_any(raw: &str) -> Result<AnySnapshot, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    match value.get("formatVersion").and_then(|v| v.as_str()) {
        Some("v3") => Ok(AnySnapshot::V3(serde_json::from_value(value)?)),
        Some("v2") => Ok(AnySnapshot::V2(serde_json::from_value(value)?)),
        // v1 predates the discriminator field.
        _ => Ok(AnySnapshot::V1(serde_json::from_value(value)?)),
    }
}

/// Loads, migrates, and persists snapshots. All writes serialize the full
/// state into a single `write` call, behind one process-wide lock.
pub struct SnapshotStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot, upgrading v1/v2 in memory and writing the result
    /// back once so later loads take the fast path. Missing or corrupt
    /// files yield an empty snapshot.
    pub async fn load_or_default(&self) -> V3Snapshot {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No snapshot at {}, starting empty", self.path.display());
                return V3Snapshot::default();
            }
            Err(e) => {
                tracing::error!("Failed to read snapshot {}: {}", self.path.display(), e);
                return V3Snapshot::default();
            }
        };

        let parsed = match parse_any(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!(
                    "Snapshot {} is corrupt ({}); starting with an empty registry",
                    self.path.display(),
                    e
                );
                return V3Snapshot::default();
            }
        };

        match parsed {
            AnySnapshot::V3(snapshot) => snapshot,
            AnySnapshot::V2(old) => {
                tracing::info!("Migrating v2 snapshot to v3");
                let snapshot = migrate_v2(old).await;
                self.persist_after_migration(&snapshot).await;
                snapshot
            }
            AnySnapshot::V1(old) => {
                tracing::info!("Migrating v1 snapshot to v3");
                let snapshot = migrate_v1(old).await;
                self.persist_after_migration(&snapshot).await;
                snapshot
            }
        }
    }

    async fn persist_after_migration(&self, snapshot: &V3Snapshot) {
        if let Err(e) = self.save(snapshot).await {
            tracing::warn!("Failed to write migrated snapshot: {}", e);
        }
    }

    pub async fn save(&self, snapshot: &V3Snapshot) -> Result<(), SnapshotError> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

/// Resolve one legacy path into a (possibly existing) v3 record. Paths that
/// no longer exist are dropped with a warning; identity failures degrade to
/// path-hash rather than aborting the migration.
async fn upsert_migrated_path(
    snapshot: &mut V3Snapshot,
    path: &str,
    branch_state: BranchState,
) {
    if !Path::new(path).exists() {
        tracing::warn!("Dropping snapshot entry for missing path {path}");
        return;
    }

    let identity = resolve_identity(path, ResolveOptions::default()).await;
    let branch_key = GitCli::new()
        .current_branch(Path::new(path))
        .await
        .unwrap_or_else(|| UNKNOWN_BRANCH.to_string());

    let record = snapshot
        .repositories
        .entry(identity.canonical_id.clone())
        .or_insert_with(|| RepoRecord {
            canonical_id: identity.canonical_id.clone(),
            display_name: identity.display_name.clone(),
            remote_url: identity.remote_url.clone(),
            identity_source: identity.identity_source,
            known_paths: BTreeSet::new(),
            worktrees: BTreeSet::new(),
            branches: Default::default(),
            default_branch: None,
            last_indexed: None,
        });

    record.known_paths.insert(path.to_string());
    if identity.is_worktree {
        record.worktrees.insert(path.to_string());
    }

    if branch_state.status == BranchStatus::Indexed {
        record.last_indexed = branch_state.last_indexed;
    }
    record
        .branches
        .entry(branch_key.clone())
        .or_insert(branch_state);
    record.default_branch.get_or_insert(branch_key);
}

async fn migrate_v1(old: V1Snapshot) -> V3Snapshot {
    let mut snapshot = V3Snapshot::default();
    for path in &old.indexed_codebases {
        let mut state = BranchState::indexed(0, 0, String::new());
        // v1 carried no collection name; the namer re-derives it on demand.
        state.collection_name = None;
        upsert_migrated_path(&mut snapshot, path, state).await;
    }
    for (path, percentage) in old.indexing_codebases.as_progress() {
        upsert_migrated_path(&mut snapshot, &path, BranchState::indexing(percentage)).await;
    }
    snapshot.last_updated = Utc::now();
    snapshot
}

async fn migrate_v2(old: V2Snapshot) -> V3Snapshot {
    let mut snapshot = V3Snapshot::default();
    for (path, info) in &old.codebases {
        let state = match info {
            CodebaseInfo::Indexed {
                indexed_files,
                total_chunks,
                ..
            } => {
                let mut state = BranchState::indexed(*indexed_files, *total_chunks, String::new());
                state.collection_name = None;
                state
            }
            CodebaseInfo::Indexing {
                indexing_percentage,
            } => BranchState::indexing(indexing_percentage.unwrap_or(0.0)),
            CodebaseInfo::IndexFailed { error_message } => BranchState::failed(
                error_message
                    .clone()
                    .unwrap_or_else(|| "indexing failed".to_string()),
            ),
        };
        upsert_migrated_path(&mut snapshot, path, state).await;
    }
    snapshot.last_updated = Utc::now();
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, "{not valid json").unwrap();

        let store = SnapshotStore::new(path);
        let snapshot = store.load_or_default().await;
        assert!(snapshot.repositories.is_empty());
    }

    #[tokio::test]
    async fn missing_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));
        let snapshot = store.load_or_default().await;
        assert!(snapshot.repositories.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));

        let mut snapshot = V3Snapshot::default();
        snapshot.repositories.insert(
            "abc".to_string(),
            RepoRecord {
                canonical_id: "abc".to_string(),
                display_name: "repo".to_string(),
                remote_url: None,
                identity_source: git::IdentitySource::PathHash,
                known_paths: BTreeSet::from(["/tmp/repo".to_string()]),
                worktrees: BTreeSet::new(),
                branches: Default::default(),
                default_branch: None,
                last_indexed: None,
            },
        );
        store.save(&snapshot).await.unwrap();

        let loaded = store.load_or_default().await;
        assert_eq!(loaded.format_version, "v3");
        assert!(loaded.repositories.contains_key("abc"));
    }

    #[tokio::test]
    async fn v1_with_dead_paths_drops_them() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(
            &path,
            r#"{"indexedCodebases":["/definitely/not/a/real/path"],"indexingCodebases":[]}"#,
        )
        .unwrap();

        let store = SnapshotStore::new(path);
        let snapshot = store.load_or_default().await;
        assert!(snapshot.repositories.is_empty());
    }
}
