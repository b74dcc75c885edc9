use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use git::IdentitySource;
use serde::{Deserialize, Serialize};

pub const FORMAT_VERSION: &str = "v3";

/// Branch key used for state migrated from v1/v2 snapshots, which did not
/// track branches.
pub const UNKNOWN_BRANCH: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Indexing,
    Indexed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchState {
    pub status: BranchStatus,
    #[serde(default)]
    pub indexed_files: usize,
    #[serde(default)]
    pub total_chunks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexing_percentage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_indexed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
}

impl BranchState {
    pub fn indexing(percentage: f32) -> Self {
        Self {
            status: BranchStatus::Indexing,
            indexed_files: 0,
            total_chunks: 0,
            indexing_percentage: Some(percentage),
            error_message: None,
            last_commit: None,
            last_indexed: None,
            collection_name: None,
        }
    }

    pub fn indexed(indexed_files: usize, total_chunks: usize, collection_name: String) -> Self {
        Self {
            status: BranchStatus::Indexed,
            indexed_files,
            total_chunks,
            indexing_percentage: None,
            error_message: None,
            last_commit: None,
            last_indexed: Some(Utc::now()),
            collection_name: Some(collection_name),
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            status: BranchStatus::Failed,
            indexed_files: 0,
            total_chunks: 0,
            indexing_percentage: None,
            error_message: Some(message),
            last_commit: None,
            last_indexed: None,
            collection_name: None,
        }
    }
}

/// One registry entry per canonical repository identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoRecord {
    pub canonical_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    pub identity_source: IdentitySource,
    /// Every filesystem path known to map to this identity.
    pub known_paths: BTreeSet<String>,
    /// Subset of `known_paths` that are linked worktrees.
    #[serde(default)]
    pub worktrees: BTreeSet<String>,
    #[serde(default)]
    pub branches: BTreeMap<String, BranchState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_indexed: Option<DateTime<Utc>>,
}

impl RepoRecord {
    /// State of the primary branch, the one `index_codebase` without an
    /// explicit branch argument operates on.
    pub fn default_branch_state(&self) -> Option<&BranchState> {
        let key = self.default_branch.as_deref()?;
        self.branches.get(key)
    }

    pub fn is_indexed(&self) -> bool {
        self.default_branch_state()
            .is_some_and(|state| state.status == BranchStatus::Indexed)
    }

    /// Collection names referenced by any indexed branch of this record.
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.branches.values().filter_map(|state| {
            (state.status == BranchStatus::Indexed)
                .then_some(state.collection_name.as_deref())
                .flatten()
        })
    }

    /// A stable "primary" path for user-facing responses: the first known
    /// path that is not a worktree, else the first known path.
    pub fn primary_path(&self) -> Option<&str> {
        self.known_paths
            .iter()
            .find(|p| !self.worktrees.contains(*p))
            .or_else(|| self.known_paths.iter().next())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V3Snapshot {
    pub format_version: String,
    pub repositories: BTreeMap<String, RepoRecord>,
    pub last_updated: DateTime<Utc>,
}

impl Default for V3Snapshot {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            repositories: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}
