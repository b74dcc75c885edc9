//! Single-repo search and the cross-repository fan-out engine.
//!
//! `search_all` fans one query out to every indexed collection in parallel
//! under two soft deadlines: 5 s per collection and 15 s for the whole call.
//! A collection that times out or errors is reported in the summary and
//! never fails the call. Scores are normalized per collection before the
//! merge so heterogeneous collections compete fairly.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use store::Registry;
use thiserror::Error;
use tracing::{info, warn};

use super::{
    embedding::{EmbeddingError, EmbeddingProvider},
    vector_store::{SearchHit, SearchRequest, VectorStore, VectorStoreError},
};

pub const MAX_RESULT_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("repository is not indexed: {0}. Run index_codebase on it first")]
    NotIndexed(String),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
}

/// How per-collection scores are rescaled before merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoreNormalization {
    /// Identity: raw cosine similarity. Correct when every collection was
    /// embedded with the same model and metric.
    Raw,
    /// Per-collection min-max onto [0, 1]; a degenerate all-equal batch
    /// maps to all ones.
    MinMax,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub normalization: ScoreNormalization,
    pub per_collection_timeout: Duration,
    pub global_timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            normalization: ScoreNormalization::Raw,
            per_collection_timeout: Duration::from_secs(5),
            global_timeout: Duration::from_secs(15),
            max_concurrency: 8,
        }
    }
}

/// One merged search result with repository attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSearchResult {
    pub repo_display_name: String,
    pub canonical_repo_id: String,
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub content: String,
    pub score: f32,
    pub source_collection: String,
    pub normalization: ScoreNormalization,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSummary {
    pub collections_queried: usize,
    pub collections_skipped_by_timeout: Vec<String>,
    pub collections_failed: Vec<String>,
    pub total_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchAllResponse {
    pub results: Vec<CodeSearchResult>,
    pub summary: SearchSummary,
}

/// A collection selected for fan-out, with the attribution applied to its
/// results.
#[derive(Debug, Clone)]
struct SearchTarget {
    collection: String,
    display_name: String,
    canonical_id: String,
}

enum CollectionOutcome {
    Hits(Vec<SearchHit>),
    TimedOut,
    Failed(VectorStoreError),
}

pub struct SearchEngine {
    registry: Arc<Registry>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> Self {
        Self {
            registry,
            store,
            embedder,
            config,
        }
    }

    /// Search one repository by path.
    pub async fn search_code(
        &self,
        path: &str,
        query: &str,
        limit: usize,
        extension_filter: Option<Vec<String>>,
    ) -> Result<Vec<CodeSearchResult>, SearchError> {
        let limit = clamp_limit(limit);
        let outcome = self.registry.resolve(path).await;
        let record = outcome
            .record
            .filter(|r| r.is_indexed())
            .ok_or_else(|| SearchError::NotIndexed(path.to_string()))?;
        let collection = record
            .default_branch_state()
            .and_then(|s| s.collection_name.clone())
            .ok_or_else(|| SearchError::NotIndexed(path.to_string()))?;

        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        let request = SearchRequest {
            query_text: query.to_string(),
            query_vector: vectors.into_iter().next().unwrap_or_default(),
            limit,
            extension_filter,
        };
        let hits = self.store.hybrid_search(&collection, &request).await?;

        Ok(hits
            .into_iter()
            .map(|hit| attribute_hit(hit, &record.display_name, &record.canonical_id, &collection, ScoreNormalization::Raw))
            .collect())
    }

    /// Fan a query out across every indexed collection, optionally
    /// restricted to `repos` (display names or canonical IDs).
    pub async fn search_all(
        &self,
        query: &str,
        limit: usize,
        repos: Option<Vec<String>>,
        extension_filter: Option<Vec<String>>,
    ) -> Result<SearchAllResponse, SearchError> {
        let limit = clamp_limit(limit);
        let targets = self.discover_targets(repos.as_deref()).await?;
        let collections_queried = targets.len();
        if targets.is_empty() {
            return Ok(SearchAllResponse {
                results: Vec::new(),
                summary: SearchSummary::default(),
            });
        }

        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        let request = Arc::new(SearchRequest {
            query_text: query.to_string(),
            query_vector: vectors.into_iter().next().unwrap_or_default(),
            limit,
            extension_filter,
        });

        let per_collection_timeout = self.config.per_collection_timeout;
        let store = self.store.clone();
        let mut fan_out = stream::iter(targets.clone())
            .map(|target| {
                let store = store.clone();
                let request = request.clone();
                async move {
                    let outcome = match tokio::time::timeout(
                        per_collection_timeout,
                        store.hybrid_search(&target.collection, &request),
                    )
                    .await
                    {
                        Ok(Ok(hits)) => CollectionOutcome::Hits(hits),
                        Ok(Err(e)) => CollectionOutcome::Failed(e),
                        Err(_) => CollectionOutcome::TimedOut,
                    };
                    (target, outcome)
                }
            })
            .buffer_unordered(self.config.max_concurrency);

        let mut results: Vec<CodeSearchResult> = Vec::new();
        let mut skipped_by_timeout: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        let mut completed: HashSet<String> = HashSet::new();

        // The global deadline is soft: whatever completed before it fires
        // is returned, the rest is reported as skipped.
        let global_deadline = tokio::time::sleep(self.config.global_timeout);
        tokio::pin!(global_deadline);

        loop {
            tokio::select! {
                next = fan_out.next() => {
                    let Some((target, outcome)) = next else { break };
                    completed.insert(target.collection.clone());
                    match outcome {
                        CollectionOutcome::Hits(hits) => {
                            results.extend(normalize_batch(hits, &target, self.config.normalization));
                        }
                        CollectionOutcome::TimedOut => {
                            warn!(collection = %target.collection, "Collection search timed out; skipping");
                            skipped_by_timeout.push(target.collection.clone());
                        }
                        CollectionOutcome::Failed(e) => {
                            warn!(collection = %target.collection, "Collection search failed: {e}");
                            failed.push(target.collection.clone());
                        }
                    }
                }
                _ = &mut global_deadline => {
                    for target in &targets {
                        if !completed.contains(&target.collection) {
                            skipped_by_timeout.push(target.collection.clone());
                        }
                    }
                    warn!(
                        pending = skipped_by_timeout.len(),
                        "Global search deadline reached; returning partial results"
                    );
                    break;
                }
            }
        }

        merge_and_rank(&mut results, limit);
        skipped_by_timeout.sort();
        failed.sort();

        let summary = SearchSummary {
            collections_queried,
            collections_skipped_by_timeout: skipped_by_timeout,
            collections_failed: failed,
            total_results: results.len(),
        };
        info!(
            queried = summary.collections_queried,
            skipped = summary.collections_skipped_by_timeout.len(),
            failed = summary.collections_failed.len(),
            results = summary.total_results,
            "Cross-repo search complete"
        );
        Ok(SearchAllResponse { results, summary })
    }

    /// Candidate collections: the registry's indexed records merged with a
    /// live store enumeration (catches repos indexed by another process),
    /// deduplicated by collection name.
    async fn discover_targets(
        &self,
        repos: Option<&[String]>,
    ) -> Result<Vec<SearchTarget>, SearchError> {
        let mut by_collection: HashMap<String, SearchTarget> = HashMap::new();

        for record in self.registry.list_indexed().await {
            for collection in record.collection_names() {
                by_collection
                    .entry(collection.to_string())
                    .or_insert_with(|| SearchTarget {
                        collection: collection.to_string(),
                        display_name: record.display_name.clone(),
                        canonical_id: record.canonical_id.clone(),
                    });
            }
        }

        match self.store.list_collections().await {
            Ok(live) => {
                for name in live {
                    if store::collection::is_service_collection(&name) {
                        by_collection
                            .entry(name.clone())
                            .or_insert_with(|| SearchTarget {
                                display_name: name.clone(),
                                canonical_id: name.clone(),
                                collection: name,
                            });
                    }
                }
            }
            Err(e) => {
                // Registry-known collections still work without the live view.
                warn!("Could not enumerate live collections: {e}");
            }
        }

        let mut targets: Vec<SearchTarget> = by_collection.into_values().collect();
        if let Some(filter) = repos
            && !filter.is_empty()
        {
            targets.retain(|t| {
                filter
                    .iter()
                    .any(|want| want == &t.display_name || want == &t.canonical_id)
            });
        }
        targets.sort_by(|a, b| a.collection.cmp(&b.collection));
        Ok(targets)
    }
}

fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_RESULT_LIMIT)
}

fn attribute_hit(
    hit: SearchHit,
    display_name: &str,
    canonical_id: &str,
    collection: &str,
    normalization: ScoreNormalization,
) -> CodeSearchResult {
    CodeSearchResult {
        repo_display_name: display_name.to_string(),
        canonical_repo_id: canonical_id.to_string(),
        relative_path: hit.relative_path,
        start_line: hit.start_line,
        end_line: hit.end_line,
        language: hit.language,
        content: hit.content,
        score: hit.score,
        source_collection: collection.to_string(),
        normalization,
    }
}

/// Rescale one collection's batch and attach attribution.
fn normalize_batch(
    hits: Vec<SearchHit>,
    target: &SearchTarget,
    normalization: ScoreNormalization,
) -> Vec<CodeSearchResult> {
    let scores: Vec<f32> = match normalization {
        ScoreNormalization::Raw => hits.iter().map(|h| h.score).collect(),
        ScoreNormalization::MinMax => {
            let min = hits.iter().map(|h| h.score).fold(f32::INFINITY, f32::min);
            let max = hits
                .iter()
                .map(|h| h.score)
                .fold(f32::NEG_INFINITY, f32::max);
            hits.iter()
                .map(|h| {
                    if (max - min).abs() < f32::EPSILON {
                        1.0
                    } else {
                        (h.score - min) / (max - min)
                    }
                })
                .collect()
        }
    };

    hits.into_iter()
        .zip(scores)
        .map(|(mut hit, score)| {
            hit.score = score;
            attribute_hit(
                hit,
                &target.display_name,
                &target.canonical_id,
                &target.collection,
                normalization,
            )
        })
        .collect()
}

/// Deterministic merge: score descending, then a stable tiebreak on
/// `(repo_display_name, relative_path, start_line)`, truncated to `limit`.
fn merge_and_rank(results: &mut Vec<CodeSearchResult>, limit: usize) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.repo_display_name.cmp(&b.repo_display_name))
            .then_with(|| a.relative_path.cmp(&b.relative_path))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });
    results.truncate(limit);
}
