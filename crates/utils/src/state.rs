use std::path::PathBuf;

pub const SNAPSHOT_FILE: &str = "mcp-codebase-snapshot.json";
pub const MIGRATION_FILE: &str = "collection-migration.json";
pub const CLONES_DIR: &str = "repos";

/// Root of the service's on-disk state, `<home>/.context/`. Falls back to a
/// relative directory when no home directory can be determined (containers).
pub fn context_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".context")
}

/// `context_dir()`, created on first use.
pub fn ensure_context_dir() -> std::io::Result<PathBuf> {
    let dir = context_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}
