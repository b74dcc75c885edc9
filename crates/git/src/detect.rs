use std::path::{Path, PathBuf};

/// Result of probing a filesystem path for git repository membership.
#[derive(Debug, Clone, Default)]
pub struct GitRepoInfo {
    pub is_git_repo: bool,
    /// Root of the working copy (or the git directory itself for bare repos).
    pub repo_root: Option<PathBuf>,
    pub is_worktree: bool,
    /// The `.git` directory or pointer file that was found.
    pub git_path: Option<PathBuf>,
    /// For worktrees: the common git directory of the main repository.
    pub main_git_dir: Option<PathBuf>,
}

/// Walk upward from `start` looking for a `.git` entry. Returns the entry's
/// path and whether it is a pointer file (worktree) rather than a directory.
pub fn find_git_path(start: &Path) -> Option<(PathBuf, bool)> {
    let mut current = Some(start);
    while let Some(dir) = current {
        let candidate = dir.join(".git");
        if candidate.is_dir() {
            return Some((candidate, false));
        }
        if candidate.is_file() {
            return Some((candidate, true));
        }
        current = dir.parent();
    }
    None
}

/// A bare repository has no `.git` entry; it *is* the git directory.
fn is_bare_git_dir(path: &Path) -> bool {
    path.join("HEAD").is_file() && path.join("objects").is_dir() && path.join("refs").is_dir()
}

/// Parse the `gitdir: <path>` pointer a worktree keeps in its `.git` file.
/// Relative pointers resolve against the worktree root.
fn read_gitdir_pointer(git_file: &Path) -> Option<PathBuf> {
    let content = std::fs::read_to_string(git_file).ok()?;
    let target = content.strip_prefix("gitdir:")?.trim();
    if target.is_empty() {
        return None;
    }
    let target = PathBuf::from(target);
    if target.is_absolute() {
        Some(target)
    } else {
        Some(git_file.parent()?.join(target))
    }
}

/// For `<common>/.git/worktrees/<name>` pointers, the common git directory
/// is two levels up.
fn common_dir_from_worktree_gitdir(gitdir: &Path) -> Option<PathBuf> {
    let worktrees = gitdir.parent()?;
    if worktrees.file_name()? != "worktrees" {
        return None;
    }
    Some(worktrees.parent()?.to_path_buf())
}

/// Probe `path` for git repository membership. Never errors: a path that
/// cannot be read is simply not a git repo.
pub fn detect_git_repo(path: &Path) -> GitRepoInfo {
    if is_bare_git_dir(path) {
        return GitRepoInfo {
            is_git_repo: true,
            repo_root: Some(path.to_path_buf()),
            is_worktree: false,
            git_path: Some(path.to_path_buf()),
            main_git_dir: None,
        };
    }

    let Some((git_path, is_file)) = find_git_path(path) else {
        return GitRepoInfo::default();
    };
    let repo_root = git_path.parent().map(Path::to_path_buf);

    if !is_file {
        return GitRepoInfo {
            is_git_repo: true,
            repo_root,
            is_worktree: false,
            git_path: Some(git_path),
            main_git_dir: None,
        };
    }

    // `.git` is a pointer file, so this is a linked worktree. A pointer that
    // does not parse still counts as a repo root; it just loses the link to
    // its main repository.
    let main_git_dir = read_gitdir_pointer(&git_path)
        .as_deref()
        .and_then(common_dir_from_worktree_gitdir);
    GitRepoInfo {
        is_git_repo: true,
        repo_root,
        is_worktree: true,
        git_path: Some(git_path),
        main_git_dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_git_dir_walking_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();

        let (found, is_file) = find_git_path(&nested).unwrap();
        assert_eq!(found, dir.path().join(".git"));
        assert!(!is_file);
    }

    #[test]
    fn plain_directory_is_not_a_repo() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        std::fs::create_dir_all(&plain).unwrap();

        let info = detect_git_repo(&plain);
        assert!(!info.is_git_repo || info.repo_root.as_deref() != Some(plain.as_path()));
    }

    #[test]
    fn worktree_pointer_resolves_common_dir() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main");
        let feat = dir.path().join("feat");
        std::fs::create_dir_all(main.join(".git/worktrees/feat")).unwrap();
        std::fs::create_dir_all(&feat).unwrap();
        std::fs::write(
            feat.join(".git"),
            format!("gitdir: {}\n", main.join(".git/worktrees/feat").display()),
        )
        .unwrap();

        let info = detect_git_repo(&feat);
        assert!(info.is_git_repo);
        assert!(info.is_worktree);
        assert_eq!(info.repo_root.as_deref(), Some(feat.as_path()));
        assert_eq!(info.main_git_dir, Some(main.join(".git")));
    }

    #[test]
    fn bare_repo_detected_by_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("HEAD"), "ref: refs/heads/main\n").unwrap();
        std::fs::create_dir_all(dir.path().join("objects")).unwrap();
        std::fs::create_dir_all(dir.path().join("refs")).unwrap();

        let info = detect_git_repo(dir.path());
        assert!(info.is_git_repo);
        assert!(!info.is_worktree);
        assert_eq!(info.repo_root.as_deref(), Some(dir.path()));
    }

    #[test]
    fn unreadable_pointer_still_counts_as_worktree() {
        let dir = tempfile::tempdir().unwrap();
        let feat = dir.path().join("feat");
        std::fs::create_dir_all(&feat).unwrap();
        std::fs::write(feat.join(".git"), "garbage contents").unwrap();

        let info = detect_git_repo(&feat);
        assert!(info.is_git_repo);
        assert!(info.is_worktree);
        assert!(info.main_git_dir.is_none());
    }
}
