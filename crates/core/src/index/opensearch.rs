use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::index::DocumentIndex;
use crate::models::{Chunk, Query, ScoredChunk};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

/// Connection settings for the remote search backend. Which backend a
/// pipeline uses (this one or [`crate::index::MemoryIndex`]) is decided by
/// configuration, not code.
#[derive(Debug, Clone)]
pub struct OpenSearchConfig {
    pub endpoint: String,
    pub index_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub verify_tls: bool,
    pub vector_dimensions: usize,
}

impl OpenSearchConfig {
    pub fn new(endpoint: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            index_name: index_name.into(),
            username: None,
            password: None,
            verify_tls: true,
            vector_dimensions: crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

/// Durable index backed by an OpenSearch-compatible engine over its REST
/// API. Keyword queries run BM25 on the backend; dense queries use its knn
/// search over the stored embedding field.
pub struct OpenSearchIndex {
    client: Client,
    config: OpenSearchConfig,
    auth_header: Option<String>,
}

impl OpenSearchIndex {
    pub fn new(config: OpenSearchConfig) -> Result<Self, IndexError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        let auth_header = match (&config.username, &config.password) {
            (Some(user), Some(password)) => Some(format!(
                "Basic {}",
                STANDARD.encode(format!("{user}:{password}"))
            )),
            _ => None,
        };

        Ok(Self {
            client,
            config,
            auth_header,
        })
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/{}{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.index_name,
            suffix
        )
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_header {
            Some(header) => builder.header("Authorization", header),
            None => builder,
        }
    }

    /// Create the index with text and knn-vector mappings if absent.
    pub async fn ensure_index(&self) -> Result<(), IndexError> {
        let response = self.request(self.client.head(self.url(""))).send().await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }

        if !response.status().is_client_error() {
            return Err(IndexError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .request(self.client.put(self.url("")))
            .json(&json!({
                "settings": {
                    "number_of_shards": 1,
                    "number_of_replicas": 0,
                    "index.knn": true
                },
                "mappings": {
                    "properties": {
                        "chunk_id": {"type": "keyword"},
                        "document_id": {"type": "keyword"},
                        "source_path": {"type": "keyword"},
                        "ordinal": {"type": "long"},
                        "word_count": {"type": "integer"},
                        "text": {"type": "text"},
                        "embedding": {
                            "type": "knn_vector",
                            "dimension": self.config.vector_dimensions,
                            "method": {
                                "name": "hnsw",
                                "space_type": "cosinesimil"
                            }
                        }
                    }
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::Request(format!(
                "index setup failed with {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn bulk(&self, operations: Vec<Value>) -> Result<(), IndexError> {
        if operations.is_empty() {
            return Ok(());
        }

        let payload: String = operations
            .into_iter()
            .map(|value| serde_json::to_string(&value))
            .collect::<Result<Vec<_>, serde_json::Error>>()?
            .join("\n")
            + "\n";

        let response = self
            .request(self.client.post(self.url("/_bulk?refresh=true")))
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        if body.pointer("/errors").and_then(Value::as_bool) == Some(true) {
            return Err(IndexError::BackendResponse {
                backend: "opensearch".to_string(),
                details: "bulk request reported item errors".to_string(),
            });
        }

        Ok(())
    }

    async fn search(&self, body: Value) -> Result<Vec<ScoredChunk>, IndexError> {
        let response = self
            .request(self.client.post(self.url("/_search")))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::new();
        for hit in hits {
            let score = hit.pointer("/_score").and_then(Value::as_f64).unwrap_or(0.0);
            let source = hit.pointer("/_source").cloned().ok_or_else(|| {
                IndexError::BackendResponse {
                    backend: "opensearch".to_string(),
                    details: "search hit without _source".to_string(),
                }
            })?;
            let chunk: Chunk = serde_json::from_value(source)?;
            result.push(ScoredChunk { chunk, score });
        }

        Ok(result)
    }

    /// Page query for stored chunks. `ordinal` repeats across documents, so
    /// `chunk_id` breaks ties to keep the order stable between page requests.
    fn page_query(offset: usize, limit: usize) -> Value {
        json!({
            "from": offset,
            "size": limit,
            "sort": [{"ordinal": "asc"}, {"chunk_id": "asc"}],
            "query": {"match_all": {}}
        })
    }

    async fn fail_if_empty(&self) -> Result<(), IndexError> {
        if self.count().await? == 0 {
            return Err(IndexError::EmptyIndex);
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentIndex for OpenSearchIndex {
    async fn write_chunks(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        let mut operations = Vec::with_capacity(chunks.len() * 2);
        for chunk in chunks {
            operations.push(json!({
                "index": {
                    "_index": self.config.index_name,
                    "_id": chunk.chunk_id,
                }
            }));
            operations.push(serde_json::to_value(chunk)?);
        }
        self.bulk(operations).await
    }

    async fn delete_all(&self) -> Result<(), IndexError> {
        let response = self
            .request(
                self.client
                    .post(self.url("/_delete_by_query?refresh=true")),
            )
            .json(&json!({"query": {"match_all": {}}}))
            .send()
            .await?;

        // A missing index is already an empty index.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let response = self
            .request(self.client.get(self.url("/_count")))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        let count = body
            .pointer("/count")
            .and_then(Value::as_u64)
            .ok_or_else(|| IndexError::BackendResponse {
                backend: "opensearch".to_string(),
                details: "count response without count field".to_string(),
            })?;

        Ok(count as usize)
    }

    async fn chunks_page(&self, offset: usize, limit: usize) -> Result<Vec<Chunk>, IndexError> {
        let hits = self.search(Self::page_query(offset, limit)).await?;

        Ok(hits.into_iter().map(|scored| scored.chunk).collect())
    }

    async fn update_embeddings(&self, embedder: &dyn Embedder) -> Result<usize, IndexError> {
        self.fail_if_empty().await?;

        let chunks = self.all_chunks().await?;
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;

        let mut operations = Vec::with_capacity(chunks.len() * 2);
        for (chunk, vector) in chunks.iter().zip(vectors) {
            if vector.len() != self.config.vector_dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: self.config.vector_dimensions,
                    got: vector.len(),
                });
            }
            operations.push(json!({
                "update": {
                    "_index": self.config.index_name,
                    "_id": chunk.chunk_id,
                }
            }));
            operations.push(json!({"doc": {"embedding": vector}}));
        }

        self.bulk(operations).await?;
        Ok(chunks.len())
    }

    async fn query_keyword(&self, query: &Query) -> Result<Vec<ScoredChunk>, IndexError> {
        self.fail_if_empty().await?;

        self.search(json!({
            "size": query.top_k,
            "query": {
                "match": {"text": query.text}
            }
        }))
        .await
    }

    async fn query_embedding(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        self.fail_if_empty().await?;

        if query_vector.len() != self.config.vector_dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.vector_dimensions,
                got: query_vector.len(),
            });
        }

        self.search(json!({
            "size": top_k,
            "query": {
                "knn": {
                    "embedding": {
                        "vector": query_vector,
                        "k": top_k
                    }
                }
            }
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_header_is_rendered_when_credentials_are_set() {
        let mut config = OpenSearchConfig::new("https://localhost:9200", "chunks");
        config.username = Some("admin".to_string());
        config.password = Some("secret".to_string());

        let index = OpenSearchIndex::new(config).unwrap();
        let header = index.auth_header.as_deref().unwrap();
        assert!(header.starts_with("Basic "));
        assert_eq!(header, format!("Basic {}", STANDARD.encode("admin:secret")));
    }

    #[test]
    fn no_auth_header_without_credentials() {
        let index = OpenSearchIndex::new(OpenSearchConfig::new("http://localhost:9200", "chunks"))
            .unwrap();
        assert!(index.auth_header.is_none());
    }

    #[test]
    fn page_query_sorts_on_ordinal_then_chunk_id() {
        let body = OpenSearchIndex::page_query(256, 256);
        let sort = body.pointer("/sort").and_then(Value::as_array).unwrap();
        assert_eq!(sort.len(), 2);
        assert_eq!(sort[0], json!({"ordinal": "asc"}));
        assert_eq!(sort[1], json!({"chunk_id": "asc"}));
        assert_eq!(body.pointer("/from"), Some(&json!(256)));
    }

    #[test]
    fn urls_join_without_double_slashes() {
        let index = OpenSearchIndex::new(OpenSearchConfig::new("http://localhost:9200/", "chunks"))
            .unwrap();
        assert_eq!(index.url("/_search"), "http://localhost:9200/chunks/_search");
        assert_eq!(index.url(""), "http://localhost:9200/chunks");
    }
}
