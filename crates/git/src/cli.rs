use std::{path::Path, process::Stdio, time::Duration};

use thiserror::Error;
use tokio::{io::AsyncReadExt, process::Command};

/// Hard ceiling on any local git subcommand. Clones get a longer budget
/// because they pull over the network.
const GIT_TIMEOUT: Duration = Duration::from_secs(10);
const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum GitCliError {
    #[error("git executable not found or not runnable")]
    NotAvailable,
    #[error("git command timed out after {0:?}")]
    Timeout(Duration),
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("git produced non-UTF-8 output")]
    InvalidOutput,
}

/// Parsed worktree entry from `git worktree list --porcelain`.
#[derive(Debug, Clone)]
pub struct WorktreeEntry {
    pub path: String,
    pub branch: Option<String>,
    pub is_bare: bool,
}

#[derive(Clone, Default)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self {}
    }

    /// Run a git subcommand in `repo_path` with separate stdout/stderr
    /// capture and a hard timeout. Non-zero exit becomes `CommandFailed`
    /// carrying stderr; a timeout kills the child.
    async fn git<I, S>(
        &self,
        repo_path: &Path,
        args: I,
        timeout: Duration,
    ) -> Result<String, GitCliError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut child = Command::new("git")
            .arg("-C")
            .arg(repo_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|_| GitCliError::NotAvailable)?;

        let mut stdout = child.stdout.take().expect("stdout piped");
        let mut stderr = child.stderr.take().expect("stderr piped");

        let result = tokio::time::timeout(timeout, async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (status, _, _) = tokio::try_join!(
                child.wait(),
                stdout.read_to_end(&mut out),
                stderr.read_to_end(&mut err),
            )?;
            Ok::<_, std::io::Error>((status, out, err))
        })
        .await;

        let (status, out, err) = match result {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) => return Err(GitCliError::CommandFailed(e.to_string())),
            Err(_) => return Err(GitCliError::Timeout(timeout)),
        };

        if !status.success() {
            let stderr_text = String::from_utf8_lossy(&err).trim().to_string();
            return Err(GitCliError::CommandFailed(stderr_text));
        }
        String::from_utf8(out).map_err(|_| GitCliError::InvalidOutput)
    }

    /// `git worktree list --porcelain`, parsed. Returns `None` when git is
    /// unavailable or the command fails; missing worktree data degrades the
    /// identity to fewer detected paths rather than an error.
    pub async fn worktree_list(&self, repo_path: &Path) -> Option<Vec<WorktreeEntry>> {
        let out = self
            .git(repo_path, ["worktree", "list", "--porcelain"], GIT_TIMEOUT)
            .await
            .ok()?;
        Some(parse_worktree_porcelain(&out))
    }

    /// HEAD commit of the checked-out branch, if any.
    pub async fn rev_parse_head(&self, repo_path: &Path) -> Option<String> {
        let out = self
            .git(repo_path, ["rev-parse", "HEAD"], GIT_TIMEOUT)
            .await
            .ok()?;
        let sha = out.trim();
        (!sha.is_empty()).then(|| sha.to_string())
    }

    /// Current branch name, or `None` for detached HEAD / failures.
    pub async fn current_branch(&self, repo_path: &Path) -> Option<String> {
        let out = self
            .git(repo_path, ["rev-parse", "--abbrev-ref", "HEAD"], GIT_TIMEOUT)
            .await
            .ok()?;
        let name = out.trim();
        (!name.is_empty() && name != "HEAD").then(|| name.to_string())
    }

    /// Clone `url` into `dest`. Unlike the query helpers this surfaces the
    /// failure: a clone that did not happen must be reported to the caller.
    pub async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), GitCliError> {
        let parent = dest.parent().unwrap_or(Path::new("."));
        self.git(
            parent,
            [
                "clone",
                url,
                dest.to_str()
                    .ok_or_else(|| GitCliError::CommandFailed("invalid clone path".to_string()))?,
            ],
            CLONE_TIMEOUT,
        )
        .await?;
        Ok(())
    }
}

fn parse_worktree_porcelain(out: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;
    for line in out.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: path.to_string(),
                branch: None,
                is_bare: false,
            });
        } else if let Some(branch) = line.strip_prefix("branch ") {
            if let Some(entry) = current.as_mut() {
                entry.branch = Some(
                    branch
                        .strip_prefix("refs/heads/")
                        .unwrap_or(branch)
                        .to_string(),
                );
            }
        } else if line == "bare"
            && let Some(entry) = current.as_mut()
        {
            entry.is_bare = true;
        }
    }
    if let Some(entry) = current.take() {
        entries.push(entry);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_parsing_handles_multiple_worktrees() {
        let out = "worktree /tmp/a/main\nHEAD 1234\nbranch refs/heads/main\n\nworktree /tmp/a/feat\nHEAD 5678\nbranch refs/heads/f\n";
        let entries = parse_worktree_porcelain(out);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "/tmp/a/main");
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].path, "/tmp/a/feat");
        assert_eq!(entries[1].branch.as_deref(), Some("f"));
    }

    #[test]
    fn porcelain_parsing_flags_bare_entries() {
        let out = "worktree /srv/repo.git\nbare\n";
        let entries = parse_worktree_porcelain(out);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_bare);
        assert!(entries[0].branch.is_none());
    }

    #[test]
    fn porcelain_parsing_tolerates_empty_output() {
        assert!(parse_worktree_porcelain("").is_empty());
    }
}
