use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::index::DocumentIndex;
use crate::models::{Query, ScoredChunk};
use async_trait::async_trait;

/// Shared contract for both retrieval variants: a ranked list of scored
/// chunks, descending by relevance, at most `top_k` long.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &Query) -> Result<Vec<ScoredChunk>, IndexError>;
}

#[async_trait]
impl<T: Retriever + ?Sized> Retriever for Box<T> {
    async fn retrieve(&self, query: &Query) -> Result<Vec<ScoredChunk>, IndexError> {
        (**self).retrieve(query).await
    }
}

/// Term-overlap retrieval delegating to the index's BM25-style scoring.
pub struct KeywordRetriever<I> {
    index: I,
}

impl<I: DocumentIndex> KeywordRetriever<I> {
    pub fn new(index: I) -> Self {
        Self { index }
    }
}

#[async_trait]
impl<I: DocumentIndex> Retriever for KeywordRetriever<I> {
    async fn retrieve(&self, query: &Query) -> Result<Vec<ScoredChunk>, IndexError> {
        self.index.query_keyword(query).await
    }
}

/// Dense retrieval: embeds the query, then cosine similarity against stored
/// chunk embeddings.
pub struct EmbeddingRetriever<I, E> {
    index: I,
    embedder: E,
}

impl<I: DocumentIndex, E: Embedder> EmbeddingRetriever<I, E> {
    pub fn new(index: I, embedder: E) -> Self {
        Self { index, embedder }
    }
}

#[async_trait]
impl<I: DocumentIndex, E: Embedder> Retriever for EmbeddingRetriever<I, E> {
    async fn retrieve(&self, query: &Query) -> Result<Vec<ScoredChunk>, IndexError> {
        let query_vector = self.embedder.embed(&query.text).await?;
        self.index.query_embedding(&query_vector, query.top_k).await
    }
}
