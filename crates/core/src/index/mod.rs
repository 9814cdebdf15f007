use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::models::{Chunk, Query, ScoredChunk};
use async_trait::async_trait;

pub mod memory;
pub mod opensearch;

pub use memory::MemoryIndex;
pub use opensearch::{OpenSearchConfig, OpenSearchIndex};

/// A store of chunks with sparse and dense query support. Backends are
/// selected by configuration; the contract is identical for the in-process
/// store and the remote search engine.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Append chunks, keyed by chunk id. Writing the same chunk twice
    /// overwrites in place rather than duplicating.
    async fn write_chunks(&self, chunks: &[Chunk]) -> Result<(), IndexError>;

    /// Explicit reset: the index holds zero chunks afterwards.
    async fn delete_all(&self) -> Result<(), IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;

    /// One page of stored chunks in ordinal order. Callers restart iteration
    /// by paging from offset zero again.
    async fn chunks_page(&self, offset: usize, limit: usize) -> Result<Vec<Chunk>, IndexError>;

    /// Compute and persist dense vectors for every stored chunk. Required
    /// before any dense-similarity query succeeds. Returns the number of
    /// chunks embedded.
    async fn update_embeddings(&self, embedder: &dyn Embedder) -> Result<usize, IndexError>;

    /// Term-based relevance query. Fails with [`IndexError::EmptyIndex`]
    /// when no chunks are stored.
    async fn query_keyword(&self, query: &Query) -> Result<Vec<ScoredChunk>, IndexError>;

    /// Cosine-similarity query against stored embeddings. Fails with
    /// [`IndexError::EmptyIndex`] on an empty store and
    /// [`IndexError::EmbeddingsMissing`] when embeddings were never computed.
    async fn query_embedding(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError>;

    /// Drain the whole store page by page.
    async fn all_chunks(&self) -> Result<Vec<Chunk>, IndexError> {
        const PAGE: usize = 256;
        let mut collected = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.chunks_page(offset, PAGE).await?;
            let fetched = page.len();
            collected.extend(page);
            if fetched < PAGE {
                return Ok(collected);
            }
            offset += fetched;
        }
    }
}

#[async_trait]
impl<T: DocumentIndex + ?Sized> DocumentIndex for std::sync::Arc<T> {
    async fn write_chunks(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        (**self).write_chunks(chunks).await
    }

    async fn delete_all(&self) -> Result<(), IndexError> {
        (**self).delete_all().await
    }

    async fn count(&self) -> Result<usize, IndexError> {
        (**self).count().await
    }

    async fn chunks_page(&self, offset: usize, limit: usize) -> Result<Vec<Chunk>, IndexError> {
        (**self).chunks_page(offset, limit).await
    }

    async fn update_embeddings(&self, embedder: &dyn Embedder) -> Result<usize, IndexError> {
        (**self).update_embeddings(embedder).await
    }

    async fn query_keyword(&self, query: &Query) -> Result<Vec<ScoredChunk>, IndexError> {
        (**self).query_keyword(query).await
    }

    async fn query_embedding(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        (**self).query_embedding(query_vector, top_k).await
    }
}

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let left_norm = l2_norm(left);
    let right_norm = l2_norm(right);
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = left.iter().zip(right.iter()).map(|(a, b)| a * b).sum();
    dot / (left_norm * right_norm)
}

#[cfg(test)]
mod tests {
    use super::{cosine_similarity, l2_norm};

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5f32, 0.5, 0.7];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_scores_zero_instead_of_nan() {
        let a = vec![0.0f32, 0.0];
        let b = vec![1.0f32, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(l2_norm(&a), 0.0);
    }
}
