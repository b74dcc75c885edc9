//! Vector store interface.
//!
//! The store holds one collection per repository and answers hybrid
//! dense+sparse queries with optional metadata filters. Only chunk metadata
//! and vectors live there; the service never persists source trees.

mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use rest::RestVectorStore;

#[derive(Debug, Clone, Error)]
pub enum VectorStoreError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("json error: {0}")]
    Serde(String),
    #[error("url error: {0}")]
    Url(String),
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("operation not supported by this store: {0}")]
    Unsupported(&'static str),
}

impl VectorStoreError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// One embedded chunk as written to a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub id: String,
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub vector: Vec<f32>,
}

/// One scored hit from a collection search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query_text: String,
    pub query_vector: Vec<f32>,
    pub limit: usize,
    /// File-extension filter applied inside the store, not post-filtered.
    pub extension_filter: Option<Vec<String>>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Whether the store runs dense+sparse hybrid collections; chooses the
    /// `hybrid_` collection-name prefix.
    fn hybrid_enabled(&self) -> bool;

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError>;

    async fn has_collection(&self, name: &str) -> Result<bool, VectorStoreError> {
        Ok(self.list_collections().await?.iter().any(|c| c == name))
    }

    /// Create the collection if it does not already exist.
    async fn ensure_collection(&self, name: &str, dimension: usize)
    -> Result<(), VectorStoreError>;

    async fn drop_collection(&self, name: &str) -> Result<(), VectorStoreError>;

    /// Rename a collection in place. Stores without a native rename surface
    /// `Unsupported`; the migration runner treats that as "leave pending".
    async fn rename_collection(&self, old: &str, new: &str) -> Result<(), VectorStoreError>;

    async fn upsert_chunks(
        &self,
        collection: &str,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), VectorStoreError>;

    /// Hybrid dense+sparse search over one collection.
    async fn hybrid_search(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> Result<Vec<SearchHit>, VectorStoreError>;
}
