//! Git plumbing for the code-search service.
//!
//! libgit2 is used for read-only graph queries (remote lookup, root-commit
//! discovery); anything that touches the working tree or needs porcelain
//! output (worktree enumeration, clones) goes through the `git` CLI with a
//! hard timeout. Callers that only need a yes/no answer get `Option`s:
//! a repo that cannot be inspected is treated as not a repo, never as an
//! error to propagate.

mod cli;
mod detect;
mod identity;
mod url;

pub use cli::{GitCli, GitCliError, WorktreeEntry};
pub use detect::{GitRepoInfo, detect_git_repo, find_git_path};
pub use identity::{
    IdentitySource, RepoIdentity, ResolveOptions, is_same_repository, resolve_identity,
    resolve_identity_from_url,
};
pub use url::normalize_git_url;
