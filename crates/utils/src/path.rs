use std::path::{Path, PathBuf};

/// Directories that are never worth walking into, regardless of gitignore
/// state. Shared by the indexing file walk and subprocess pathspec excludes.
pub const ALWAYS_SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    ".venv",
    "venv",
    "__pycache__",
    ".idea",
    ".vscode",
    ".cache",
];

/// Expand a leading tilde and make the path absolute without requiring it to
/// exist. Canonicalizes through `dunce` when possible so git and other
/// external tools never see Windows verbatim paths.
pub fn to_absolute(input: &str) -> PathBuf {
    let expanded = shellexpand::tilde(input);
    let path = Path::new(expanded.as_ref());
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    dunce::canonicalize(&absolute).unwrap_or(absolute)
}

/// Lossy UTF-8 rendering of a path for hashing and map keys. Canonical IDs
/// and collection names key off this, so it must be deterministic per path.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let got = to_absolute(dir.path().to_str().unwrap());
        assert!(got.is_absolute());
    }

    #[test]
    fn relative_paths_are_anchored_to_cwd() {
        let got = to_absolute("some/relative/dir");
        assert!(got.is_absolute());
        assert!(got.ends_with("some/relative/dir"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let got = to_absolute("~/somewhere");
        assert!(!got.to_string_lossy().starts_with('~'));
    }
}
