//! The indexing pipeline: walk, split, embed, upsert, record.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use git::{GitCli, RepoIdentity, resolve_identity_from_url};
use ignore::{WalkBuilder, overrides::OverrideBuilder};
use serde::Serialize;
use store::{
    RegisterOptions, Registry, RegistryError,
    collection::{MigrationLedger, canonical_collection_name, resolve_collection_name},
    snapshot::versions::v3::UNKNOWN_BRANCH,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{
    embedding::{EmbeddingError, EmbeddingProvider},
    splitter::{CodeSplitter, DEFAULT_EXTENSIONS},
    vector_store::{ChunkRecord, VectorStore, VectorStoreError},
};

/// Chunks per embedding request.
const EMBED_BATCH: usize = 64;
/// Progress is written through the registry at most this often, counted in
/// processed files.
const PROGRESS_EVERY: usize = 25;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("path does not exist: {0}")]
    PathNotFound(String),
    #[error("not a clonable URL: {0}")]
    InvalidUrl(String),
    #[error("clone failed: {0}")]
    CloneFailed(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid ignore pattern: {0}")]
    InvalidIgnorePattern(String),
}

#[derive(Debug, Clone, Default)]
pub struct IndexRequest {
    /// Local filesystem path or clone URL.
    pub target: String,
    pub force: bool,
    pub custom_extensions: Option<Vec<String>>,
    pub ignore_patterns: Option<Vec<String>>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOutcome {
    pub canonical_id: String,
    pub display_name: String,
    pub collection_name: String,
    pub indexed_files: usize,
    pub total_chunks: usize,
    /// True when the repo was already indexed and the call only registered
    /// the path as another alias of it.
    pub already_indexed: bool,
}

pub struct IndexingService {
    registry: Arc<Registry>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    splitter: Arc<dyn CodeSplitter>,
    ledger: Arc<Mutex<MigrationLedger>>,
    clones_dir: PathBuf,
    git: GitCli,
}

impl IndexingService {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        splitter: Arc<dyn CodeSplitter>,
        ledger: Arc<Mutex<MigrationLedger>>,
        clones_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            store,
            embedder,
            splitter,
            ledger,
            clones_dir,
            git: GitCli::new(),
        }
    }

    /// Entry point for `index_codebase`. Accepts a path or a clone URL and
    /// serializes all work per canonical ID.
    pub async fn index(&self, request: IndexRequest) -> Result<IndexOutcome, IndexerError> {
        let path = self.materialize_target(&request).await?;
        let path_str = path.to_string_lossy().into_owned();

        let outcome = self.registry.resolve(&path_str).await;

        // The registry is the gate: a second clone or worktree of an
        // indexed repo registers as an alias instead of re-indexing.
        if !request.force
            && let Some(record) = &outcome.record
            && record.is_indexed()
        {
            let record = self
                .registry
                .register_identity(&path_str, outcome.identity, RegisterOptions::default())
                .await?;
            let collection = record
                .default_branch_state()
                .and_then(|s| s.collection_name.clone())
                .unwrap_or_default();
            info!(
                canonical_id = %record.canonical_id,
                path = %path_str,
                "Already indexed; path registered as alias"
            );
            return Ok(IndexOutcome {
                canonical_id: record.canonical_id.clone(),
                display_name: record.display_name.clone(),
                collection_name: collection,
                indexed_files: record
                    .default_branch_state()
                    .map(|s| s.indexed_files)
                    .unwrap_or_default(),
                total_chunks: record
                    .default_branch_state()
                    .map(|s| s.total_chunks)
                    .unwrap_or_default(),
                already_indexed: true,
            });
        }

        let identity = outcome.identity.clone();
        let lock = self.registry.indexing_lock(&identity.canonical_id);
        let _guard = lock.lock().await;

        // Re-check under the lock; a concurrent call may have finished.
        if !request.force && self.registry.is_already_indexed(&identity).await {
            let record = self
                .registry
                .register_identity(&path_str, identity, RegisterOptions::default())
                .await?;
            return Ok(IndexOutcome {
                canonical_id: record.canonical_id.clone(),
                display_name: record.display_name.clone(),
                collection_name: record
                    .default_branch_state()
                    .and_then(|s| s.collection_name.clone())
                    .unwrap_or_default(),
                indexed_files: 0,
                total_chunks: 0,
                already_indexed: true,
            });
        }

        self.index_under_lock(&path, &path_str, identity, &request)
            .await
    }

    /// URL targets are cloned under the service's state directory; local
    /// paths are validated and absolutized.
    async fn materialize_target(&self, request: &IndexRequest) -> Result<PathBuf, IndexerError> {
        let target = request.target.trim();
        let looks_like_url = target.contains("://") || git::normalize_git_url(target).is_some();
        if !looks_like_url {
            let path = utils::path::to_absolute(target);
            if !path.exists() {
                return Err(IndexerError::PathNotFound(target.to_string()));
            }
            return Ok(path);
        }

        let identity = resolve_identity_from_url(target)
            .ok_or_else(|| IndexerError::InvalidUrl(target.to_string()))?;

        // An existing local checkout of the same identity is reused; a URL
        // for an already-indexed repo is an alias, not a re-index.
        if let Some(record) = self.registry.get(&identity.canonical_id).await
            && let Some(primary) = record.primary_path()
            && Path::new(primary).exists()
        {
            return Ok(PathBuf::from(primary));
        }

        let dest = self
            .clones_dir
            .join(&identity.canonical_id[..12.min(identity.canonical_id.len())])
            .join(&identity.display_name);
        if !dest.exists() {
            std::fs::create_dir_all(dest.parent().expect("clone dest has parent"))?;
            info!(url = target, dest = %dest.display(), "Cloning repository");
            self.git
                .clone_repo(target, &dest)
                .await
                .map_err(|e| IndexerError::CloneFailed(e.to_string()))?;
        }
        Ok(dest)
    }

    async fn index_under_lock(
        &self,
        path: &Path,
        path_str: &str,
        identity: RepoIdentity,
        request: &IndexRequest,
    ) -> Result<IndexOutcome, IndexerError> {
        let canonical_id = identity.canonical_id.clone();
        let display_name = identity.display_name.clone();
        let repo_root = identity
            .repo_root
            .clone()
            .unwrap_or_else(|| path.to_path_buf());

        self.registry
            .register_identity(path_str, identity, RegisterOptions::default())
            .await?;

        let branch = match &request.branch {
            Some(branch) => branch.clone(),
            None => self
                .git
                .current_branch(&repo_root)
                .await
                .unwrap_or_else(|| UNKNOWN_BRANCH.to_string()),
        };

        let collection = self.resolve_collection(&repo_root, &canonical_id, request.force).await?;

        self.registry
            .update_indexing_progress(&canonical_id, &branch, 0.0)
            .await?;

        match self
            .run_pipeline(&repo_root, &collection, &canonical_id, &branch, request)
            .await
        {
            Ok((indexed_files, total_chunks)) => {
                let last_commit = self.git.rev_parse_head(&repo_root).await;
                self.registry
                    .mark_indexed(
                        &canonical_id,
                        &branch,
                        collection.clone(),
                        indexed_files,
                        total_chunks,
                        last_commit,
                    )
                    .await?;
                info!(
                    canonical_id = %canonical_id,
                    collection = %collection,
                    indexed_files,
                    total_chunks,
                    "Indexing complete"
                );
                Ok(IndexOutcome {
                    canonical_id,
                    display_name,
                    collection_name: collection,
                    indexed_files,
                    total_chunks,
                    already_indexed: false,
                })
            }
            Err(e) => {
                warn!(canonical_id = %canonical_id, "Indexing failed: {e}");
                self.registry
                    .mark_failed(&canonical_id, &branch, e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    async fn resolve_collection(
        &self,
        repo_root: &Path,
        canonical_id: &str,
        force: bool,
    ) -> Result<String, IndexerError> {
        let existing: HashSet<String> = self.store.list_collections().await?.into_iter().collect();
        let hybrid = self.store.hybrid_enabled();

        if force {
            // A forced re-index starts clean under the canonical name and
            // retires a legacy collection if one exists.
            let legacy = store::collection::legacy_collection_name(repo_root, hybrid);
            if existing.contains(&legacy) {
                self.store.drop_collection(&legacy).await?;
            }
            let canonical = canonical_collection_name(canonical_id, hybrid);
            if existing.contains(&canonical) {
                self.store.drop_collection(&canonical).await?;
            }
            return Ok(canonical);
        }

        let mut ledger = self.ledger.lock().await;
        let resolution =
            resolve_collection_name(repo_root, canonical_id, &existing, hybrid, &mut ledger);
        if resolution.is_legacy
            && let Err(e) = ledger.save()
        {
            warn!("Failed to persist migration ledger: {e}");
        }
        Ok(resolution.name)
    }

    async fn run_pipeline(
        &self,
        repo_root: &Path,
        collection: &str,
        canonical_id: &str,
        branch: &str,
        request: &IndexRequest,
    ) -> Result<(usize, usize), IndexerError> {
        self.store
            .ensure_collection(collection, self.embedder.dimension())
            .await?;

        let files = collect_files(
            repo_root,
            request.custom_extensions.as_deref(),
            request.ignore_patterns.as_deref(),
        )?;
        let total_files = files.len();
        let mut indexed_files = 0usize;
        let mut total_chunks = 0usize;
        let mut batch: Vec<ChunkRecord> = Vec::with_capacity(EMBED_BATCH);

        for (processed, file) in files.iter().enumerate() {
            let Ok(content) = std::fs::read_to_string(file) else {
                // Binary or unreadable files are skipped, not fatal.
                continue;
            };
            let relative = file
                .strip_prefix(repo_root)
                .unwrap_or(file)
                .to_string_lossy()
                .into_owned();

            for chunk in self.splitter.split(&relative, &content) {
                batch.push(ChunkRecord {
                    id: format!("{}#{}-{}", chunk.relative_path, chunk.start_line, chunk.end_line),
                    relative_path: chunk.relative_path,
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    language: chunk.language,
                    content: chunk.content,
                    vector: Vec::new(),
                });
                if batch.len() >= EMBED_BATCH {
                    total_chunks += self.flush_batch(collection, &mut batch).await?;
                }
            }
            indexed_files += 1;

            if processed % PROGRESS_EVERY == 0 && total_files > 0 {
                let pct = (processed as f32 / total_files as f32) * 100.0;
                self.registry
                    .update_indexing_progress(canonical_id, branch, pct)
                    .await?;
            }
        }
        total_chunks += self.flush_batch(collection, &mut batch).await?;

        Ok((indexed_files, total_chunks))
    }

    async fn flush_batch(
        &self,
        collection: &str,
        batch: &mut Vec<ChunkRecord>,
    ) -> Result<usize, IndexerError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        for (chunk, vector) in batch.iter_mut().zip(vectors) {
            chunk.vector = vector;
        }
        let count = batch.len();
        self.store
            .upsert_chunks(collection, std::mem::take(batch))
            .await?;
        Ok(count)
    }
}

/// Gitignore-aware file walk bounded by the extension allow-list and the
/// caller's extra ignore patterns. Returns sorted paths so progress and
/// chunk IDs are deterministic.
fn collect_files(
    root: &Path,
    custom_extensions: Option<&[String]>,
    ignore_patterns: Option<&[String]>,
) -> Result<Vec<PathBuf>, IndexerError> {
    let allowed: HashSet<String> = match custom_extensions {
        Some(exts) if !exts.is_empty() => exts
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect(),
        _ => DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
    };

    let mut builder = WalkBuilder::new(root);
    builder.hidden(true).follow_links(false);
    if let Some(patterns) = ignore_patterns
        && !patterns.is_empty()
    {
        let mut overrides = OverrideBuilder::new(root);
        for pattern in patterns {
            overrides
                .add(&format!("!{pattern}"))
                .map_err(|e| IndexerError::InvalidIgnorePattern(e.to_string()))?;
        }
        builder.overrides(
            overrides
                .build()
                .map_err(|e| IndexerError::InvalidIgnorePattern(e.to_string()))?,
        );
    }
    builder.filter_entry(|entry| {
        entry
            .file_name()
            .to_str()
            .map(|name| !utils::path::ALWAYS_SKIP_DIRS.contains(&name))
            .unwrap_or(true)
    });

    let mut files = Vec::new();
    for entry in builder.build() {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.into_path();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if allowed.contains(&extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_files_honors_extension_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("b.py"), "pass").unwrap();
        std::fs::write(dir.path().join("c.bin"), "junk").unwrap();

        let all = collect_files(dir.path(), None, None).unwrap();
        assert_eq!(all.len(), 2);

        let only_rs = collect_files(dir.path(), Some(&[".rs".to_string()]), None).unwrap();
        assert_eq!(only_rs.len(), 1);
        assert!(only_rs[0].ends_with("a.rs"));
    }

    #[test]
    fn collect_files_skips_always_skip_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(dir.path().join("main.js"), "x").unwrap();

        let files = collect_files(dir.path(), None, None).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("main.js"));
    }

    #[test]
    fn collect_files_applies_ignore_patterns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("generated")).unwrap();
        std::fs::write(dir.path().join("generated/gen.rs"), "x").unwrap();
        std::fs::write(dir.path().join("lib.rs"), "x").unwrap();

        let files =
            collect_files(dir.path(), None, Some(&["generated/**".to_string()])).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("lib.rs"));
    }
}
