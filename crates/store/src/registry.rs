//! In-memory authoritative index of known repositories.
//!
//! A map `canonical_id → RepoRecord` plus a companion `path → canonical_id`
//! index, rebuilt from the snapshot at startup. All mutations flow through
//! here and persist the snapshot before returning; reads take shared access.
//! Per-canonical-ID async locks serialize indexing so a worktree and its
//! main checkout can never index concurrently.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{Arc, Mutex as StdMutex},
};

use chrono::Utc;
use git::{RepoIdentity, ResolveOptions, resolve_identity};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::snapshot::{
    SnapshotError, SnapshotStore,
    versions::{
        v2::CodebaseInfo,
        v3::{BranchState, BranchStatus, RepoRecord, UNKNOWN_BRANCH, V3Snapshot},
    },
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("repository not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Result of resolving a filesystem path against the registry.
#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub found: bool,
    pub record: Option<RepoRecord>,
    pub identity: RepoIdentity,
    /// True precisely when the path was unknown but its canonical ID was
    /// already registered (second clone, new worktree).
    pub is_new_path_for_existing_repo: bool,
    pub primary_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub collection_name: Option<String>,
    pub is_indexed: bool,
    pub indexed_files: Option<usize>,
    pub total_chunks: Option<usize>,
    pub branch: Option<String>,
}

#[derive(Default)]
struct RegistryState {
    records: BTreeMap<String, RepoRecord>,
    path_index: BTreeMap<String, String>,
}

impl RegistryState {
    fn reindex_paths(&mut self) {
        self.path_index.clear();
        for (id, record) in &self.records {
            for path in &record.known_paths {
                self.path_index.insert(path.clone(), id.clone());
            }
        }
    }

    fn to_snapshot(&self) -> V3Snapshot {
        V3Snapshot {
            format_version: crate::snapshot::versions::v3::FORMAT_VERSION.to_string(),
            repositories: self.records.clone(),
            last_updated: Utc::now(),
        }
    }
}

pub struct Registry {
    store: SnapshotStore,
    state: RwLock<RegistryState>,
    indexing_locks: StdMutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Registry {
    /// Build the registry from the snapshot store, migrating old snapshot
    /// formats as a side effect of the load.
    pub async fn load(store: SnapshotStore) -> Self {
        let snapshot = store.load_or_default().await;
        let mut state = RegistryState {
            records: snapshot.repositories,
            path_index: BTreeMap::new(),
        };
        state.reindex_paths();
        Self {
            store,
            state: RwLock::new(state),
            indexing_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Per-canonical-ID mutual exclusion for indexing. Only one indexing
    /// task may run for a given repository at a time, whichever path or
    /// worktree it was requested through.
    pub fn indexing_lock(&self, canonical_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.indexing_locks.lock().expect("lock map poisoned");
        locks
            .entry(canonical_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn persist(&self, state: &RegistryState) -> Result<(), RegistryError> {
        self.store.save(&state.to_snapshot()).await?;
        Ok(())
    }

    /// Resolve a path to its record. The path index answers without running
    /// git; only unknown paths pay for full identity resolution.
    pub async fn resolve(&self, path: &str) -> ResolveOutcome {
        let abs = utils::path::path_key(&utils::path::to_absolute(path));

        {
            let state = self.state.read().await;
            if let Some(id) = state.path_index.get(&abs)
                && let Some(record) = state.records.get(id)
            {
                return ResolveOutcome {
                    found: true,
                    identity: identity_from_record(record),
                    primary_path: record.primary_path().map(str::to_string),
                    record: Some(record.clone()),
                    is_new_path_for_existing_repo: false,
                };
            }
        }

        let identity = resolve_identity(path, ResolveOptions::default()).await;
        let state = self.state.read().await;
        match state.records.get(&identity.canonical_id) {
            Some(record) => ResolveOutcome {
                found: true,
                primary_path: record.primary_path().map(str::to_string),
                record: Some(record.clone()),
                identity,
                is_new_path_for_existing_repo: true,
            },
            None => ResolveOutcome {
                found: false,
                record: None,
                identity,
                is_new_path_for_existing_repo: false,
                primary_path: None,
            },
        }
    }

    /// Register a path, creating a record for a new canonical ID or folding
    /// the path (worktree-flagged when appropriate) into an existing one.
    pub async fn register(
        &self,
        path: &str,
        options: RegisterOptions,
    ) -> Result<RepoRecord, RegistryError> {
        let identity = resolve_identity(path, ResolveOptions::default()).await;
        self.register_identity(path, identity, options).await
    }

    /// Same as `register`, for callers that already resolved the identity.
    pub async fn register_identity(
        &self,
        path: &str,
        identity: RepoIdentity,
        options: RegisterOptions,
    ) -> Result<RepoRecord, RegistryError> {
        let abs = utils::path::path_key(&utils::path::to_absolute(path));
        let branch_key = options
            .branch
            .clone()
            .unwrap_or_else(|| UNKNOWN_BRANCH.to_string());

        let mut state = self.state.write().await;

        // The path-to-record map is a function: if this path previously
        // resolved to a different identity (a remote added to a formerly
        // path-hash repo, say), migrate it out of the old record.
        if let Some(old_id) = state.path_index.get(&abs).cloned()
            && old_id != identity.canonical_id
            && let Some(old_record) = state.records.get_mut(&old_id)
        {
            old_record.known_paths.remove(&abs);
            old_record.worktrees.remove(&abs);
            if old_record.known_paths.is_empty() {
                state.records.remove(&old_id);
            }
        }

        let record = state
            .records
            .entry(identity.canonical_id.clone())
            .or_insert_with(|| RepoRecord {
                canonical_id: identity.canonical_id.clone(),
                display_name: identity.display_name.clone(),
                remote_url: identity.remote_url.clone(),
                identity_source: identity.identity_source,
                known_paths: Default::default(),
                worktrees: Default::default(),
                branches: Default::default(),
                default_branch: None,
                last_indexed: None,
            });

        // Only the explicitly registered path joins `known_paths`; the
        // identity's other detected paths become aliases when and if they
        // are registered themselves.
        record.known_paths.insert(abs.clone());
        if identity.is_worktree {
            record.worktrees.insert(abs.clone());
        }
        if record.remote_url.is_none() {
            record.remote_url = identity.remote_url.clone();
        }

        if options.is_indexed {
            let state_entry = record.branches.entry(branch_key.clone()).or_insert_with(|| {
                let mut fresh = BranchState::indexed(0, 0, String::new());
                fresh.collection_name = None;
                fresh
            });
            state_entry.status = BranchStatus::Indexed;
            if let Some(files) = options.indexed_files {
                state_entry.indexed_files = files;
            }
            if let Some(chunks) = options.total_chunks {
                state_entry.total_chunks = chunks;
            }
            if options.collection_name.is_some() {
                state_entry.collection_name = options.collection_name.clone();
            }
            state_entry.last_indexed = Some(Utc::now());
            record.default_branch.get_or_insert(branch_key);
            record.last_indexed = Some(Utc::now());
        }

        let result = record.clone();
        state.reindex_paths();
        self.persist(&state).await?;
        Ok(result)
    }

    pub async fn is_already_indexed(&self, identity: &RepoIdentity) -> bool {
        let state = self.state.read().await;
        state
            .records
            .get(&identity.canonical_id)
            .is_some_and(RepoRecord::is_indexed)
    }

    pub async fn is_path_already_indexed(&self, path: &str) -> bool {
        let outcome = self.resolve(path).await;
        outcome.record.is_some_and(|r| r.is_indexed())
    }

    /// Transition a branch to `indexing` with a progress percentage.
    pub async fn update_indexing_progress(
        &self,
        canonical_id: &str,
        branch: &str,
        percentage: f32,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(canonical_id)
            .ok_or_else(|| RegistryError::NotFound(canonical_id.to_string()))?;
        let entry = record
            .branches
            .entry(branch.to_string())
            .or_insert_with(|| BranchState::indexing(0.0));
        entry.status = BranchStatus::Indexing;
        entry.indexing_percentage = Some(percentage);
        entry.error_message = None;
        record.default_branch.get_or_insert(branch.to_string());
        self.persist(&state).await
    }

    pub async fn mark_indexed(
        &self,
        canonical_id: &str,
        branch: &str,
        collection_name: String,
        indexed_files: usize,
        total_chunks: usize,
        last_commit: Option<String>,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(canonical_id)
            .ok_or_else(|| RegistryError::NotFound(canonical_id.to_string()))?;
        let mut branch_state = BranchState::indexed(indexed_files, total_chunks, collection_name);
        branch_state.last_commit = last_commit;
        record.branches.insert(branch.to_string(), branch_state);
        record.default_branch.get_or_insert(branch.to_string());
        record.last_indexed = Some(Utc::now());
        self.persist(&state).await
    }

    pub async fn mark_failed(
        &self,
        canonical_id: &str,
        branch: &str,
        message: String,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(canonical_id)
            .ok_or_else(|| RegistryError::NotFound(canonical_id.to_string()))?;
        record
            .branches
            .insert(branch.to_string(), BranchState::failed(message));
        record.default_branch.get_or_insert(branch.to_string());
        self.persist(&state).await
    }

    /// Drop all branch state for a record without removing its paths.
    pub async fn mark_not_indexed(&self, canonical_id: &str) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(canonical_id)
            .ok_or_else(|| RegistryError::NotFound(canonical_id.to_string()))?;
        record.branches.clear();
        record.default_branch = None;
        record.last_indexed = None;
        self.persist(&state).await
    }

    /// Remove a single path; the record itself goes away only when its last
    /// path is dropped.
    pub async fn remove_path(&self, path: &str) -> Result<(), RegistryError> {
        let abs = utils::path::path_key(&utils::path::to_absolute(path));
        let mut state = self.state.write().await;
        let Some(id) = state.path_index.get(&abs).cloned() else {
            return Err(RegistryError::NotFound(abs));
        };
        if let Some(record) = state.records.get_mut(&id) {
            record.known_paths.remove(&abs);
            record.worktrees.remove(&abs);
            if record.known_paths.is_empty() {
                state.records.remove(&id);
            }
        }
        state.reindex_paths();
        self.persist(&state).await
    }

    pub async fn remove_by_canonical_id(&self, canonical_id: &str) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        if state.records.remove(canonical_id).is_none() {
            return Err(RegistryError::NotFound(canonical_id.to_string()));
        }
        state.reindex_paths();
        self.persist(&state).await
    }

    pub async fn get(&self, canonical_id: &str) -> Option<RepoRecord> {
        self.state.read().await.records.get(canonical_id).cloned()
    }

    pub async fn list_all(&self) -> Vec<RepoRecord> {
        self.state.read().await.records.values().cloned().collect()
    }

    pub async fn list_indexed(&self) -> Vec<RepoRecord> {
        self.state
            .read()
            .await
            .records
            .values()
            .filter(|r| r.is_indexed())
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Persist current state; used by shutdown.
    pub async fn persist_now(&self) -> Result<(), RegistryError> {
        let state = self.state.read().await;
        self.persist(&state).await
    }

    // Backward-compatible views over v3 state, mirroring what the v1/v2
    // snapshot formats exposed directly.

    pub async fn indexed_codebases(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut paths: Vec<String> = state
            .records
            .values()
            .filter(|r| r.is_indexed())
            .flat_map(|r| r.known_paths.iter().cloned())
            .collect();
        paths.sort();
        paths
    }

    pub async fn indexing_codebases(&self) -> BTreeMap<String, f32> {
        let state = self.state.read().await;
        let mut out = BTreeMap::new();
        for record in state.records.values() {
            if let Some(branch_state) = record.default_branch_state()
                && branch_state.status == BranchStatus::Indexing
            {
                let pct = branch_state.indexing_percentage.unwrap_or(0.0);
                for path in &record.known_paths {
                    out.insert(path.clone(), pct);
                }
            }
        }
        out
    }

    pub async fn codebase_info(&self, path: &str) -> Option<CodebaseInfo> {
        let abs = utils::path::path_key(&utils::path::to_absolute(path));
        let state = self.state.read().await;
        let id = state.path_index.get(&abs)?;
        let record = state.records.get(id)?;
        let branch_state = record.default_branch_state()?;
        Some(match branch_state.status {
            BranchStatus::Indexed => CodebaseInfo::Indexed {
                indexed_files: branch_state.indexed_files,
                total_chunks: branch_state.total_chunks,
                last_indexed: branch_state.last_indexed.map(|t| t.to_rfc3339()),
            },
            BranchStatus::Indexing => CodebaseInfo::Indexing {
                indexing_percentage: branch_state.indexing_percentage,
            },
            BranchStatus::Failed => CodebaseInfo::IndexFailed {
                error_message: branch_state.error_message.clone(),
            },
        })
    }
}

fn identity_from_record(record: &RepoRecord) -> RepoIdentity {
    RepoIdentity {
        canonical_id: record.canonical_id.clone(),
        identity_source: record.identity_source,
        remote_url: record.remote_url.clone(),
        display_name: record.display_name.clone(),
        is_git_repo: true,
        is_worktree: false,
        repo_root: record.primary_path().map(Into::into),
        main_worktree_path: None,
        detected_paths: record.known_paths.iter().map(Into::into).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn empty_registry() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));
        let registry = Registry::load(store).await;
        (dir, registry)
    }

    #[tokio::test]
    async fn register_then_resolve_round_trips() {
        let (dir, registry) = empty_registry().await;
        let repo = dir.path().join("plain");
        std::fs::create_dir_all(&repo).unwrap();
        let path = repo.to_str().unwrap();

        let record = registry
            .register(path, RegisterOptions::default())
            .await
            .unwrap();
        assert!(!record.is_indexed());

        let outcome = registry.resolve(path).await;
        assert!(outcome.found);
        assert!(!outcome.is_new_path_for_existing_repo);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn removing_last_path_removes_record() {
        let (dir, registry) = empty_registry().await;
        let repo = dir.path().join("plain");
        std::fs::create_dir_all(&repo).unwrap();
        let path = repo.to_str().unwrap();

        registry
            .register(path, RegisterOptions::default())
            .await
            .unwrap();
        registry.remove_path(path).await.unwrap();
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn mark_indexed_sets_default_branch_and_views() {
        let (dir, registry) = empty_registry().await;
        let repo = dir.path().join("plain");
        std::fs::create_dir_all(&repo).unwrap();
        let path = repo.to_str().unwrap();

        let record = registry
            .register(path, RegisterOptions::default())
            .await
            .unwrap();
        registry
            .mark_indexed(
                &record.canonical_id,
                "main",
                "code_chunks_000000000000".to_string(),
                3,
                40,
                None,
            )
            .await
            .unwrap();

        let record = registry.get(&record.canonical_id).await.unwrap();
        assert!(record.is_indexed());
        assert_eq!(record.default_branch.as_deref(), Some("main"));

        let indexed = registry.indexed_codebases().await;
        assert_eq!(indexed.len(), 1);
        assert!(matches!(
            registry.codebase_info(path).await,
            Some(CodebaseInfo::Indexed { indexed_files: 3, total_chunks: 40, .. })
        ));
    }

    #[tokio::test]
    async fn indexing_lock_is_shared_per_id() {
        let (_dir, registry) = empty_registry().await;
        let a = registry.indexing_lock("same");
        let b = registry.indexing_lock("same");
        assert!(Arc::ptr_eq(&a, &b));
        let c = registry.indexing_lock("other");
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn mutations_persist_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("snapshot.json");
        let repo = dir.path().join("plain");
        std::fs::create_dir_all(&repo).unwrap();

        {
            let registry = Registry::load(SnapshotStore::new(snapshot_path.clone())).await;
            registry
                .register(repo.to_str().unwrap(), RegisterOptions::default())
                .await
                .unwrap();
        }

        let reloaded = Registry::load(SnapshotStore::new(snapshot_path)).await;
        assert_eq!(reloaded.len().await, 1);
    }
}
