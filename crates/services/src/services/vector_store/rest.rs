//! REST client for a Milvus-style vector database HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::warn;
use url::Url;

use super::{ChunkRecord, SearchHit, SearchRequest, VectorStore, VectorStoreError};

pub struct RestVectorStore {
    base: Url,
    http: Client,
    token: Option<String>,
    hybrid: bool,
}

impl RestVectorStore {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    const MAX_RETRIES: usize = 3;

    pub fn new(
        base_url: &str,
        token: Option<String>,
        hybrid: bool,
    ) -> Result<Self, VectorStoreError> {
        let base = Url::parse(base_url).map_err(|e| VectorStoreError::Url(e.to_string()))?;
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("code-context/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VectorStoreError::Transport(e.to_string()))?;
        Ok(Self {
            base,
            http,
            token,
            hybrid,
        })
    }

    async fn post_once(&self, path: &str, body: &Value) -> Result<Value, VectorStoreError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| VectorStoreError::Url(e.to_string()))?;
        let mut request = self.http.post(url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                VectorStoreError::Timeout
            } else {
                VectorStoreError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::Http {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| VectorStoreError::Serde(e.to_string()))
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, VectorStoreError> {
        (|| self.post_once(path, &body))
            .retry(ExponentialBuilder::default().with_max_times(Self::MAX_RETRIES))
            .when(VectorStoreError::should_retry)
            .notify(|err, dur| warn!("Retrying vector store call in {dur:?} after {err}"))
            .await
    }
}

fn extension_filter_expr(extensions: &[String]) -> String {
    let quoted: Vec<String> = extensions
        .iter()
        .map(|ext| {
            let ext = ext.strip_prefix('.').unwrap_or(ext);
            format!("\"{ext}\"")
        })
        .collect();
    format!("fileExtension in [{}]", quoted.join(", "))
}

fn hit_from_row(row: &Value) -> Option<SearchHit> {
    Some(SearchHit {
        relative_path: row.get("relativePath")?.as_str()?.to_string(),
        start_line: row.get("startLine")?.as_u64()? as usize,
        end_line: row.get("endLine")?.as_u64()? as usize,
        language: row
            .get("language")
            .and_then(Value::as_str)
            .unwrap_or("text")
            .to_string(),
        content: row
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        score: row.get("distance").or_else(|| row.get("score"))?.as_f64()? as f32,
    })
}

fn file_extension(relative_path: &str) -> &str {
    relative_path.rsplit('.').next().unwrap_or("")
}

#[async_trait]
impl VectorStore for RestVectorStore {
    fn hybrid_enabled(&self) -> bool {
        self.hybrid
    }

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        let response = self
            .post("v2/vectordb/collections/list", json!({}))
            .await?;
        let names = response
            .get("data")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    async fn ensure_collection(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<(), VectorStoreError> {
        if self.has_collection(name).await? {
            return Ok(());
        }
        self.post(
            "v2/vectordb/collections/create",
            json!({
                "collectionName": name,
                "dimension": dimension,
                "idType": "VarChar",
                "metricType": "COSINE",
            }),
        )
        .await?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<(), VectorStoreError> {
        self.post(
            "v2/vectordb/collections/drop",
            json!({ "collectionName": name }),
        )
        .await?;
        Ok(())
    }

    async fn rename_collection(&self, old: &str, new: &str) -> Result<(), VectorStoreError> {
        self.post(
            "v2/vectordb/collections/rename",
            json!({ "collectionName": old, "newCollectionName": new }),
        )
        .await?;
        Ok(())
    }

    async fn upsert_chunks(
        &self,
        collection: &str,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), VectorStoreError> {
        let rows: Vec<Value> = chunks
            .into_iter()
            .map(|chunk| {
                json!({
                    "id": chunk.id,
                    "vector": chunk.vector,
                    "relativePath": chunk.relative_path,
                    "startLine": chunk.start_line,
                    "endLine": chunk.end_line,
                    "language": chunk.language,
                    "content": chunk.content,
                    "fileExtension": file_extension(&chunk.relative_path),
                })
            })
            .collect();
        self.post(
            "v2/vectordb/entities/upsert",
            json!({ "collectionName": collection, "data": rows }),
        )
        .await?;
        Ok(())
    }

    async fn hybrid_search(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        let mut body = json!({
            "collectionName": collection,
            "data": [request.query_vector],
            "annsField": "vector",
            "limit": request.limit,
            "outputFields": ["relativePath", "startLine", "endLine", "language", "content"],
        });
        if self.hybrid {
            // Hybrid mode adds a sparse BM25 leg over the raw query text;
            // the store fuses the two rankings server-side.
            body["sparseQuery"] = json!(request.query_text);
        }
        if let Some(extensions) = &request.extension_filter
            && !extensions.is_empty()
        {
            body["filter"] = json!(extension_filter_expr(extensions));
        }

        let response = self.post("v2/vectordb/entities/search", body).await?;
        let hits = response
            .get("data")
            .and_then(Value::as_array)
            .map(|rows| rows.iter().filter_map(hit_from_row).collect())
            .unwrap_or_default();
        Ok(hits)
    }
}
