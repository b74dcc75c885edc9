use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{GitCli, detect::detect_git_repo, url::normalize_git_url};

/// Salt prefix for initial-commit-derived IDs so they can never collide
/// with an ID hashed from a normalized remote URL.
const INITIAL_COMMIT_SALT: &str = "initial-commit:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentitySource {
    RemoteUrl,
    InitialCommit,
    PathHash,
}

/// Stable identity of a repository, independent of which clone, worktree,
/// or URL variant it was observed through.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoIdentity {
    pub canonical_id: String,
    pub identity_source: IdentitySource,
    /// Normalized as `host/owner/name` when the repo has an `origin` remote.
    pub remote_url: Option<String>,
    pub display_name: String,
    pub is_git_repo: bool,
    pub is_worktree: bool,
    pub repo_root: Option<PathBuf>,
    /// For worktrees: the working copy that owns the common git directory.
    pub main_worktree_path: Option<PathBuf>,
    /// Every filesystem path observed to belong to this repo, worktrees
    /// included. Sorted for deterministic snapshots.
    pub detected_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub include_worktrees: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            include_worktrees: true,
        }
    }
}

fn hash_hex(input: &str) -> String {
    let mut output = String::with_capacity(64);
    let digest = Sha256::digest(input.as_bytes());
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(output, "{:02x}", byte);
    }
    output
}

pub(crate) fn canonical_id_from_remote(normalized_url: &str) -> String {
    hash_hex(normalized_url)
}

pub(crate) fn canonical_id_from_root_commit(sha: &str) -> String {
    hash_hex(&format!("{INITIAL_COMMIT_SALT}{sha}"))
}

pub(crate) fn canonical_id_from_path(path: &Path) -> String {
    hash_hex(&utils::path::path_key(path))
}

fn dir_display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn url_display_name(normalized: &str) -> String {
    normalized
        .rsplit('/')
        .next()
        .unwrap_or(normalized)
        .to_string()
}

/// Read-only graph queries through libgit2: `origin` URL and the SHA of the
/// root (parentless) commit. Failures collapse to `None`; an uninspectable
/// repo degrades to a weaker identity source.
fn graph_queries(repo_root: &Path) -> (Option<String>, Option<String>) {
    let Ok(repo) = git2::Repository::open(repo_root) else {
        return (None, None);
    };

    let remote_url = repo
        .find_remote("origin")
        .ok()
        .and_then(|r| r.url().map(str::to_string));

    let root_commit = (|| {
        let mut walk = repo.revwalk().ok()?;
        walk.push_head().ok()?;
        walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)
            .ok()?;
        for oid in walk.flatten() {
            let commit = repo.find_commit(oid).ok()?;
            if commit.parent_count() == 0 {
                return Some(oid.to_string());
            }
        }
        None
    })();

    (remote_url, root_commit)
}

/// Resolve the canonical identity of the repository containing `path`.
///
/// Derivation order: normalized `origin` URL, then salted root-commit SHA,
/// then a hash of the repo root path. A directory that is not a git repo
/// gets a path-hash identity over the directory itself.
pub async fn resolve_identity(path: &str, options: ResolveOptions) -> RepoIdentity {
    let abs = utils::path::to_absolute(path);
    let info = detect_git_repo(&abs);

    if !info.is_git_repo {
        return RepoIdentity {
            canonical_id: canonical_id_from_path(&abs),
            identity_source: IdentitySource::PathHash,
            remote_url: None,
            display_name: dir_display_name(&abs),
            is_git_repo: false,
            is_worktree: false,
            repo_root: Some(abs.clone()),
            main_worktree_path: None,
            detected_paths: vec![abs],
        };
    }

    let repo_root = info.repo_root.clone().unwrap_or_else(|| abs.clone());
    let main_worktree_path = info
        .main_git_dir
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);

    let mut detected: BTreeSet<PathBuf> = BTreeSet::new();
    detected.insert(repo_root.clone());
    if let Some(main) = &main_worktree_path {
        detected.insert(main.clone());
    }
    if options.include_worktrees
        && let Some(entries) = GitCli::new().worktree_list(&repo_root).await
    {
        for entry in entries {
            detected.insert(PathBuf::from(entry.path));
        }
    }

    let root_for_queries = repo_root.clone();
    let (remote_url_raw, root_commit) =
        tokio::task::spawn_blocking(move || graph_queries(&root_for_queries))
            .await
            .unwrap_or((None, None));

    let normalized_remote = remote_url_raw.as_deref().and_then(normalize_git_url);

    let (canonical_id, identity_source, display_name) = if let Some(url) = &normalized_remote {
        (
            canonical_id_from_remote(url),
            IdentitySource::RemoteUrl,
            url_display_name(url),
        )
    } else if let Some(sha) = &root_commit {
        (
            canonical_id_from_root_commit(sha),
            IdentitySource::InitialCommit,
            dir_display_name(&repo_root),
        )
    } else {
        (
            canonical_id_from_path(&repo_root),
            IdentitySource::PathHash,
            dir_display_name(&repo_root),
        )
    };

    RepoIdentity {
        canonical_id,
        identity_source,
        remote_url: normalized_remote,
        display_name,
        is_git_repo: true,
        is_worktree: info.is_worktree,
        repo_root: Some(repo_root),
        main_worktree_path,
        detected_paths: detected.into_iter().collect(),
    }
}

/// Identity for a clone URL alone. `None` when the URL does not normalize.
pub fn resolve_identity_from_url(url: &str) -> Option<RepoIdentity> {
    let normalized = normalize_git_url(url)?;
    Some(RepoIdentity {
        canonical_id: canonical_id_from_remote(&normalized),
        identity_source: IdentitySource::RemoteUrl,
        display_name: url_display_name(&normalized),
        remote_url: Some(normalized),
        is_git_repo: true,
        is_worktree: false,
        repo_root: None,
        main_worktree_path: None,
        detected_paths: Vec::new(),
    })
}

pub async fn is_same_repository(a: &str, b: &str) -> bool {
    let left = resolve_identity(a, ResolveOptions::default()).await;
    let right = resolve_identity(b, ResolveOptions::default()).await;
    left.canonical_id == right.canonical_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_and_commit_ids_cannot_collide() {
        // Same input string through both derivations must differ, or the
        // salt is not doing its job.
        let sha = "github.com/u/r";
        assert_ne!(
            canonical_id_from_remote(sha),
            canonical_id_from_root_commit(sha)
        );
    }

    #[test]
    fn canonical_ids_are_hex_and_stable() {
        let id = canonical_id_from_remote("github.com/u/r");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, canonical_id_from_remote("github.com/u/r"));
    }

    #[test]
    fn url_identity_carries_display_name() {
        let identity = resolve_identity_from_url("git@github.com:acme/widgets.git").unwrap();
        assert_eq!(identity.display_name, "widgets");
        assert_eq!(identity.remote_url.as_deref(), Some("github.com/acme/widgets"));
        assert_eq!(identity.identity_source, IdentitySource::RemoteUrl);
    }

    #[test]
    fn file_urls_have_no_identity() {
        assert!(resolve_identity_from_url("file:///home/me/repo").is_none());
    }

    #[tokio::test]
    async fn non_git_directory_gets_path_hash() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        std::fs::create_dir_all(&plain).unwrap();

        let identity =
            resolve_identity(plain.to_str().unwrap(), ResolveOptions::default()).await;
        assert!(!identity.is_git_repo);
        assert_eq!(identity.identity_source, IdentitySource::PathHash);
        assert_eq!(identity.detected_paths.len(), 1);
    }
}
