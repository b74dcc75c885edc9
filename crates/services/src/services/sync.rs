//! Periodic reconciliation of indexed repos with the vector store.
//!
//! Best-effort by contract: any failure is logged and the loop keeps going.
//! The task is aborted on shutdown.

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use git::GitCli;
use store::RepoRecord;
use tracing::{debug, info, warn};

use super::{context::AppContext, indexer::IndexRequest};

/// Decides whether a working tree changed since the last index. The
/// Merkle-style tree differ is an external collaborator; this is its seam.
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    async fn has_changed(&self, record: &RepoRecord, path: &Path) -> bool;
}

/// Compares the current HEAD against the commit recorded at last index
/// time. An unknown last commit counts as changed so the record converges.
#[derive(Default)]
pub struct HeadCommitDetector {
    git: GitCli,
}

#[async_trait]
impl ChangeDetector for HeadCommitDetector {
    async fn has_changed(&self, record: &RepoRecord, path: &Path) -> bool {
        let Some(head) = self.git.rev_parse_head(path).await else {
            // Not a git repo or git unavailable; nothing to compare.
            return false;
        };
        match record.default_branch_state().and_then(|s| s.last_commit.as_deref()) {
            Some(last) => last != head,
            None => true,
        }
    }
}

pub struct SyncService;

impl SyncService {
    /// Spawn the background loop. Only the branch that was originally
    /// indexed (the record's default branch) is re-synced.
    pub fn spawn(
        ctx: AppContext,
        detector: Arc<dyn ChangeDetector>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup stays quiet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                Self::run_once(&ctx, detector.as_ref()).await;
            }
        })
    }

    async fn run_once(ctx: &AppContext, detector: &dyn ChangeDetector) {
        let records = ctx.registry().list_indexed().await;
        debug!(repos = records.len(), "Sync pass starting");
        for record in records {
            let Some(path) = record.primary_path().map(str::to_string) else {
                continue;
            };
            if !Path::new(&path).exists() {
                warn!(path = %path, "Indexed path no longer exists; skipping sync");
                continue;
            }
            if !detector.has_changed(&record, Path::new(&path)).await {
                continue;
            }
            info!(
                canonical_id = %record.canonical_id,
                path = %path,
                "Change detected; re-indexing"
            );
            let request = IndexRequest {
                target: path,
                force: true,
                branch: record.default_branch.clone(),
                ..Default::default()
            };
            if let Err(e) = ctx.indexer().index(request).await {
                warn!(canonical_id = %record.canonical_id, "Sync re-index failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use store::{BranchState, RepoRecord};

    use super::*;

    fn record_with_last_commit(last_commit: Option<&str>) -> RepoRecord {
        let mut branches = BTreeMap::new();
        let mut state = BranchState::indexed(1, 1, "code_chunks_000000000000".into());
        state.last_commit = last_commit.map(str::to_string);
        branches.insert("main".to_string(), state);
        RepoRecord {
            canonical_id: "id".into(),
            display_name: "repo".into(),
            remote_url: None,
            identity_source: git::IdentitySource::PathHash,
            known_paths: BTreeSet::from(["/tmp/repo".to_string()]),
            worktrees: BTreeSet::new(),
            branches,
            default_branch: Some("main".into()),
            last_indexed: None,
        }
    }

    #[tokio::test]
    async fn non_git_paths_never_report_changes() {
        let dir = tempfile::tempdir().unwrap();
        let detector = HeadCommitDetector::default();
        let record = record_with_last_commit(Some("abc"));
        assert!(!detector.has_changed(&record, dir.path()).await);
    }
}
