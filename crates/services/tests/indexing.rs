//! Indexing pipeline end-to-end against an in-memory vector store: walk,
//! split, embed, upsert, registry transitions, aliasing, and force.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use services::services::{
    context::AppContext,
    embedding::{EmbeddingError, EmbeddingProvider},
    indexer::IndexRequest,
    search::SearchConfig,
    splitter::LineWindowSplitter,
    vector_store::{ChunkRecord, SearchHit, SearchRequest, VectorStore, VectorStoreError},
};
use store::{BranchStatus, Registry, SnapshotStore, collection::MigrationLedger};

struct CountingEmbedder;

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| vec![0.5; 4]).collect())
    }

    fn dimension(&self) -> usize {
        4
    }
}

/// Records every mutation so tests can assert on what reached the store.
#[derive(Default)]
struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<ChunkRecord>>>,
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn hybrid_enabled(&self) -> bool {
        false
    }

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        Ok(self.collections.lock().unwrap().keys().cloned().collect())
    }

    async fn ensure_collection(&self, name: &str, _: usize) -> Result<(), VectorStoreError> {
        self.collections
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<(), VectorStoreError> {
        self.collections.lock().unwrap().remove(name);
        Ok(())
    }

    async fn rename_collection(&self, old: &str, new: &str) -> Result<(), VectorStoreError> {
        let mut collections = self.collections.lock().unwrap();
        match collections.remove(old) {
            Some(chunks) => {
                collections.insert(new.to_string(), chunks);
                Ok(())
            }
            None => Err(VectorStoreError::CollectionNotFound(old.to_string())),
        }
    }

    async fn upsert_chunks(
        &self,
        collection: &str,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), VectorStoreError> {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .extend(chunks);
        Ok(())
    }

    async fn hybrid_search(
        &self,
        _: &str,
        _: &SearchRequest,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        Ok(Vec::new())
    }
}

async fn context_with(dir: &std::path::Path, store: Arc<MemoryStore>) -> AppContext {
    let registry = Arc::new(
        Registry::load(SnapshotStore::new(dir.join("snapshot.json"))).await,
    );
    AppContext::new(
        registry,
        store,
        Arc::new(CountingEmbedder),
        Arc::new(LineWindowSplitter::default()),
        MigrationLedger::load(dir.join("collection-migration.json")),
        dir.join("repos"),
        SearchConfig::default(),
    )
}

fn write_source_tree(root: &std::path::Path) {
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(
        root.join("src/lib.rs"),
        "pub fn add(a: u32, b: u32) -> u32 {\n    a + b\n}\n",
    )
    .unwrap();
    std::fs::write(
        root.join("src/main.rs"),
        "fn main() {\n    println!(\"hi\");\n}\n",
    )
    .unwrap();
    std::fs::write(root.join("notes.bin"), [0u8, 159, 146, 150]).unwrap();
}

#[tokio::test]
async fn indexing_walks_splits_embeds_and_records() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("project");
    write_source_tree(&repo);

    let store = Arc::new(MemoryStore::default());
    let ctx = context_with(dir.path(), store.clone()).await;

    let outcome = ctx
        .indexer()
        .index(IndexRequest {
            target: repo.to_string_lossy().into_owned(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(!outcome.already_indexed);
    assert_eq!(outcome.indexed_files, 2);
    assert!(outcome.total_chunks >= 2);
    assert!(outcome.collection_name.starts_with("code_chunks_"));

    // Chunks landed in the store, vectors attached, binary file skipped.
    let collections = store.collections.lock().unwrap();
    let chunks = collections.get(&outcome.collection_name).unwrap();
    assert_eq!(chunks.len(), outcome.total_chunks);
    assert!(chunks.iter().all(|c| c.vector.len() == 4));
    assert!(chunks.iter().all(|c| !c.relative_path.ends_with(".bin")));
    assert!(chunks.iter().any(|c| c.relative_path == "src/lib.rs"));
    drop(collections);

    // Registry reflects the indexed state.
    let record = ctx.registry().get(&outcome.canonical_id).await.unwrap();
    assert!(record.is_indexed());
    let state = record.default_branch_state().unwrap();
    assert_eq!(state.status, BranchStatus::Indexed);
    assert_eq!(state.indexed_files, 2);
    assert_eq!(
        state.collection_name.as_deref(),
        Some(outcome.collection_name.as_str())
    );
}

#[tokio::test]
async fn second_index_call_registers_an_alias() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("project");
    write_source_tree(&repo);

    let store = Arc::new(MemoryStore::default());
    let ctx = context_with(dir.path(), store).await;

    let first = ctx
        .indexer()
        .index(IndexRequest {
            target: repo.to_string_lossy().into_owned(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!first.already_indexed);

    // The same path again short-circuits at the registry gate.
    let again = ctx
        .indexer()
        .index(IndexRequest {
            target: repo.to_string_lossy().into_owned(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(again.already_indexed);
    assert_eq!(again.canonical_id, first.canonical_id);
    assert_eq!(ctx.registry().len().await, 1);
}

#[tokio::test]
async fn force_reindex_starts_a_fresh_collection() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("project");
    write_source_tree(&repo);

    let store = Arc::new(MemoryStore::default());
    let ctx = context_with(dir.path(), store.clone()).await;
    let target = repo.to_string_lossy().into_owned();

    let first = ctx
        .indexer()
        .index(IndexRequest {
            target: target.clone(),
            ..Default::default()
        })
        .await
        .unwrap();

    // Grow the tree, then force.
    std::fs::write(
        repo.join("src/extra.rs"),
        "pub fn extra() -> &'static str {\n    \"extra\"\n}\n",
    )
    .unwrap();
    let second = ctx
        .indexer()
        .index(IndexRequest {
            target,
            force: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(!second.already_indexed);
    assert_eq!(second.indexed_files, 3);
    assert!(second.total_chunks > first.total_chunks);

    let collections = store.collections.lock().unwrap();
    let chunks = collections.get(&second.collection_name).unwrap();
    // The forced run rebuilt the collection, not appended to it.
    assert_eq!(chunks.len(), second.total_chunks);
}

#[tokio::test]
async fn custom_extensions_and_ignore_patterns_bound_the_walk() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("project");
    write_source_tree(&repo);
    std::fs::create_dir_all(repo.join("docs")).unwrap();
    std::fs::write(repo.join("docs/guide.md"), "# Guide\n\nWords.\n").unwrap();

    let store = Arc::new(MemoryStore::default());
    let ctx = context_with(dir.path(), store).await;

    let outcome = ctx
        .indexer()
        .index(IndexRequest {
            target: repo.to_string_lossy().into_owned(),
            custom_extensions: Some(vec![".rs".to_string(), ".md".to_string()]),
            ignore_patterns: Some(vec!["docs/**".to_string()]),
            ..Default::default()
        })
        .await
        .unwrap();

    // Markdown allowed by extension but excluded by pattern.
    assert_eq!(outcome.indexed_files, 2);
}

#[tokio::test]
async fn missing_path_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::default());
    let ctx = context_with(dir.path(), store).await;

    let result = ctx
        .indexer()
        .index(IndexRequest {
            target: dir
                .path()
                .join("does-not-exist")
                .to_string_lossy()
                .into_owned(),
            ..Default::default()
        })
        .await;
    assert!(matches!(
        result,
        Err(services::services::indexer::IndexerError::PathNotFound(_))
    ));
}
