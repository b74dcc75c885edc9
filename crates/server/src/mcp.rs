//! The MCP tool surface: one dispatch table instance per session, all
//! sharing the registry, snapshot store, and vector store through the
//! application context.
//!
//! Domain failures are returned as structured tool errors with a
//! machine-readable kind and a human-readable message; protocol errors are
//! reserved for malformed requests. Tool errors never leak internal paths
//! or secrets.

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use services::services::{
    context::AppContext,
    indexer::{IndexRequest, IndexerError},
    search::SearchError,
};
use store::{BranchStatus, RepoRecord};
use tracing::{debug, info};

#[derive(Clone)]
pub struct ContextServer {
    ctx: AppContext,
    tool_router: ToolRouter<Self>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IndexCodebaseParams {
    /// Absolute path to the codebase, or a git clone URL.
    pub path: String,
    /// Re-index from scratch even if an index already exists.
    #[serde(default)]
    pub force: Option<bool>,
    /// Splitter to use; only the built-in line splitter ships here, an AST
    /// splitter can be wired in externally.
    #[serde(default)]
    pub splitter: Option<String>,
    /// File extensions to index instead of the default set.
    #[serde(default)]
    pub custom_extensions: Option<Vec<String>>,
    /// Additional glob patterns to exclude from indexing.
    #[serde(default)]
    pub ignore_patterns: Option<Vec<String>>,
    /// Branch to record the index under; defaults to the checked-out branch.
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchCodeParams {
    /// Path to a registered codebase.
    pub path: String,
    /// Natural-language query.
    pub query: String,
    /// Maximum results, capped at 50.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Restrict results to these file extensions.
    #[serde(default)]
    pub extension_filter: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchAllParams {
    /// Natural-language query.
    pub query: String,
    /// Maximum merged results, capped at 50.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Restrict to these repositories (display names or canonical IDs).
    #[serde(default)]
    pub repos: Option<Vec<String>>,
    /// Restrict results to these file extensions.
    #[serde(default)]
    pub extension_filter: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PathParams {
    /// Path to a registered codebase.
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListRepositoriesParams {
    /// Filter by index status: "indexed", "indexing", or "failed".
    #[serde(default)]
    pub status: Option<String>,
    /// Case-insensitive substring match on the display name.
    #[serde(default)]
    pub name_substring: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexingStatusResponse {
    canonical_id: String,
    display_name: String,
    branch: String,
    status: BranchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    indexing_percentage: Option<f32>,
    indexed_files: usize,
    total_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_indexed: Option<chrono::DateTime<chrono::Utc>>,
}

fn ok_json<T: Serialize>(tool: &'static str, payload: &T) -> Result<CallToolResult, McpError> {
    info!(tool, outcome = "ok", "tool invocation");
    let rendered = serde_json::to_string_pretty(payload)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(rendered)]))
}

fn tool_error(tool: &'static str, kind: &'static str, message: String) -> CallToolResult {
    info!(tool, outcome = "error", kind, "tool invocation");
    CallToolResult::error(vec![Content::text(
        json!({ "kind": kind, "message": message }).to_string(),
    )])
}

fn index_error(tool: &'static str, error: IndexerError) -> CallToolResult {
    let kind = match &error {
        IndexerError::PathNotFound(_)
        | IndexerError::InvalidUrl(_)
        | IndexerError::InvalidIgnorePattern(_) => "validation",
        IndexerError::CloneFailed(_)
        | IndexerError::VectorStore(_)
        | IndexerError::Embedding(_) => "external",
        IndexerError::Registry(_) | IndexerError::Io(_) => "internal",
    };
    tool_error(tool, kind, error.to_string())
}

fn search_error(tool: &'static str, error: SearchError) -> CallToolResult {
    let kind = match &error {
        SearchError::NotIndexed(_) => "not_found",
        SearchError::Embedding(_) | SearchError::VectorStore(_) => "external",
    };
    tool_error(tool, kind, error.to_string())
}

#[tool_router]
impl ContextServer {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Index a codebase for semantic search. Accepts a local path or a git clone URL; re-registering another checkout of an already-indexed repository records it as an alias instead of re-indexing."
    )]
    async fn index_codebase(
        &self,
        Parameters(params): Parameters<IndexCodebaseParams>,
    ) -> Result<CallToolResult, McpError> {
        if let Some(splitter) = params.splitter.as_deref()
            && splitter != "langchain"
        {
            debug!(splitter, "Requested splitter not available; using line splitter");
        }
        let request = IndexRequest {
            target: params.path,
            force: params.force.unwrap_or(false),
            custom_extensions: params.custom_extensions,
            ignore_patterns: params.ignore_patterns,
            branch: params.branch,
        };
        match self.ctx.indexer().index(request).await {
            Ok(outcome) => ok_json("index_codebase", &outcome),
            Err(e) => Ok(index_error("index_codebase", e)),
        }
    }

    #[tool(description = "Semantic search over one indexed codebase, addressed by path.")]
    async fn search_code(
        &self,
        Parameters(params): Parameters<SearchCodeParams>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .ctx
            .search()
            .search_code(
                &params.path,
                &params.query,
                params.limit.unwrap_or(10),
                params.extension_filter,
            )
            .await
        {
            Ok(results) => ok_json("search_code", &results),
            Err(e) => Ok(search_error("search_code", e)),
        }
    }

    #[tool(
        description = "Semantic search across every indexed repository, with per-repository attribution. Optionally restricted to a set of repositories."
    )]
    async fn search_all(
        &self,
        Parameters(params): Parameters<SearchAllParams>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .ctx
            .search()
            .search_all(
                &params.query,
                params.limit.unwrap_or(10),
                params.repos,
                params.extension_filter,
            )
            .await
        {
            Ok(response) => ok_json("search_all", &response),
            Err(e) => Ok(search_error("search_all", e)),
        }
    }

    #[tool(description = "Drop a codebase's index and remove it from the registry.")]
    async fn clear_index(
        &self,
        Parameters(params): Parameters<PathParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self.ctx.registry().resolve(&params.path).await;
        let Some(record) = outcome.record else {
            return Ok(tool_error(
                "clear_index",
                "not_found",
                format!("no registered repository at {}", params.path),
            ));
        };

        let collections: Vec<String> = record.collection_names().map(str::to_string).collect();
        for collection in &collections {
            use services::services::vector_store::VectorStoreError;
            match self.ctx.vector_store().drop_collection(collection).await {
                Ok(()) | Err(VectorStoreError::CollectionNotFound(_)) => {}
                Err(e) => {
                    return Ok(tool_error("clear_index", "external", e.to_string()));
                }
            }
        }

        if let Err(e) = self
            .ctx
            .registry()
            .remove_by_canonical_id(&record.canonical_id)
            .await
        {
            return Ok(tool_error("clear_index", "internal", e.to_string()));
        }

        ok_json(
            "clear_index",
            &json!({
                "canonicalId": record.canonical_id,
                "removedCollections": collections,
            }),
        )
    }

    #[tool(description = "Report the indexing status of a codebase.")]
    async fn get_indexing_status(
        &self,
        Parameters(params): Parameters<PathParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self.ctx.registry().resolve(&params.path).await;
        let Some(record) = outcome.record else {
            return Ok(tool_error(
                "get_indexing_status",
                "not_found",
                format!("no registered repository at {}", params.path),
            ));
        };
        let Some(branch) = record.default_branch.clone() else {
            return Ok(tool_error(
                "get_indexing_status",
                "not_found",
                format!(
                    "{} is registered but has never been indexed",
                    record.display_name
                ),
            ));
        };
        let Some(state) = record.branches.get(&branch) else {
            return Ok(tool_error(
                "get_indexing_status",
                "internal",
                format!("branch state missing for {branch}"),
            ));
        };

        ok_json(
            "get_indexing_status",
            &IndexingStatusResponse {
                canonical_id: record.canonical_id.clone(),
                display_name: record.display_name.clone(),
                branch: branch.clone(),
                status: state.status,
                indexing_percentage: state.indexing_percentage,
                indexed_files: state.indexed_files,
                total_chunks: state.total_chunks,
                error_message: state.error_message.clone(),
                last_indexed: state.last_indexed,
            },
        )
    }

    #[tool(description = "List registered repositories, optionally filtered by status or name.")]
    async fn list_repositories(
        &self,
        Parameters(params): Parameters<ListRepositoriesParams>,
    ) -> Result<CallToolResult, McpError> {
        let status = match params.status.as_deref() {
            None => None,
            Some("indexed") => Some(BranchStatus::Indexed),
            Some("indexing") => Some(BranchStatus::Indexing),
            Some("failed") => Some(BranchStatus::Failed),
            Some(other) => {
                return Ok(tool_error(
                    "list_repositories",
                    "validation",
                    format!("unknown status filter: {other}"),
                ));
            }
        };

        let needle = params.name_substring.map(|s| s.to_lowercase());
        let repos: Vec<RepoRecord> = self
            .ctx
            .registry()
            .list_all()
            .await
            .into_iter()
            .filter(|record| match status {
                None => true,
                Some(want) => record
                    .default_branch_state()
                    .is_some_and(|s| s.status == want),
            })
            .filter(|record| match &needle {
                None => true,
                Some(needle) => record.display_name.to_lowercase().contains(needle),
            })
            .collect();

        ok_json("list_repositories", &repos)
    }
}

#[tool_handler]
impl ServerHandler for ContextServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Semantic code search over registered git repositories. Index a repository \
                 with index_codebase, then query it with search_code or across all \
                 repositories with search_all."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
