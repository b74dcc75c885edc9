use std::{path::PathBuf, sync::Arc};

use store::{Registry, collection::MigrationLedger};
use tokio::sync::Mutex;

use super::{
    embedding::EmbeddingProvider,
    indexer::IndexingService,
    search::{SearchConfig, SearchEngine},
    splitter::CodeSplitter,
    vector_store::VectorStore,
};

/// Everything a request handler needs, threaded through construction.
/// All components share the registry, snapshot store, and vector store;
/// per-session tool routers clone this cheaply.
#[derive(Clone)]
pub struct AppContext {
    registry: Arc<Registry>,
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    indexer: Arc<IndexingService>,
    search: Arc<SearchEngine>,
    ledger: Arc<Mutex<MigrationLedger>>,
}

impl AppContext {
    pub fn new(
        registry: Arc<Registry>,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        splitter: Arc<dyn CodeSplitter>,
        ledger: MigrationLedger,
        clones_dir: PathBuf,
        search_config: SearchConfig,
    ) -> Self {
        let ledger = Arc::new(Mutex::new(ledger));
        let indexer = Arc::new(IndexingService::new(
            registry.clone(),
            vector_store.clone(),
            embedder.clone(),
            splitter,
            ledger.clone(),
            clones_dir,
        ));
        let search = Arc::new(SearchEngine::new(
            registry.clone(),
            vector_store.clone(),
            embedder.clone(),
            search_config,
        ));
        Self {
            registry,
            vector_store,
            embedder,
            indexer,
            search,
            ledger,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector_store
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn indexer(&self) -> &Arc<IndexingService> {
        &self.indexer
    }

    pub fn search(&self) -> &Arc<SearchEngine> {
        &self.search
    }

    pub fn migration_ledger(&self) -> &Arc<Mutex<MigrationLedger>> {
        &self.ledger
    }
}
