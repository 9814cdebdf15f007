use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::index::{cosine_similarity, DocumentIndex};
use crate::models::{Chunk, Query, ScoredChunk};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

const BM25_K1: f64 = 1.5;
const BM25_B: f64 = 0.75;

/// In-process document index for experimentation and tests. Insertion order
/// is preserved; keyword queries use BM25, dense queries cosine similarity.
#[derive(Default)]
pub struct MemoryIndex {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    chunks: Vec<Chunk>,
    by_id: HashMap<String, usize>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pre-populated index, e.g. from a chunk snapshot file.
    pub async fn with_chunks(chunks: &[Chunk]) -> Result<Self, IndexError> {
        let index = Self::new();
        index.write_chunks(chunks).await?;
        Ok(index)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

/// Okapi BM25 over the stored chunk texts.
fn bm25_scores(chunks: &[Chunk], query_terms: &[String]) -> Vec<f64> {
    let tokenized: Vec<Vec<String>> = chunks.iter().map(|chunk| tokenize(&chunk.text)).collect();
    let total = tokenized.len() as f64;
    let average_length =
        tokenized.iter().map(|tokens| tokens.len() as f64).sum::<f64>() / total.max(1.0);

    let mut document_frequency: HashMap<&str, usize> = HashMap::new();
    for term in query_terms {
        let containing = tokenized
            .iter()
            .filter(|tokens| tokens.iter().any(|token| token == term))
            .count();
        document_frequency.insert(term.as_str(), containing);
    }

    tokenized
        .iter()
        .map(|tokens| {
            let length = tokens.len() as f64;
            query_terms
                .iter()
                .map(|term| {
                    let tf = tokens.iter().filter(|token| *token == term).count() as f64;
                    if tf == 0.0 {
                        return 0.0;
                    }
                    let df = document_frequency[term.as_str()] as f64;
                    let idf = ((total - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let denominator =
                        tf + BM25_K1 * (1.0 - BM25_B + BM25_B * length / average_length.max(1.0));
                    idf * tf * (BM25_K1 + 1.0) / denominator
                })
                .sum()
        })
        .collect()
}

fn top_k(mut scored: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    scored.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.chunk.chunk_id.cmp(&right.chunk.chunk_id))
    });
    scored.truncate(k);
    scored
}

#[async_trait]
impl DocumentIndex for MemoryIndex {
    async fn write_chunks(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        let mut inner = self.inner.write().await;
        for chunk in chunks {
            match inner.by_id.get(&chunk.chunk_id).copied() {
                Some(position) => inner.chunks[position] = chunk.clone(),
                None => {
                    let position = inner.chunks.len();
                    inner.by_id.insert(chunk.chunk_id.clone(), position);
                    inner.chunks.push(chunk.clone());
                }
            }
        }
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), IndexError> {
        let mut inner = self.inner.write().await;
        inner.chunks.clear();
        inner.by_id.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.inner.read().await.chunks.len())
    }

    async fn chunks_page(&self, offset: usize, limit: usize) -> Result<Vec<Chunk>, IndexError> {
        let inner = self.inner.read().await;
        Ok(inner
            .chunks
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_embeddings(&self, embedder: &dyn Embedder) -> Result<usize, IndexError> {
        let texts: Vec<String> = {
            let inner = self.inner.read().await;
            inner.chunks.iter().map(|chunk| chunk.text.clone()).collect()
        };

        if texts.is_empty() {
            return Err(IndexError::EmptyIndex);
        }

        let vectors = embedder.embed_batch(&texts).await?;

        let mut inner = self.inner.write().await;
        if inner.chunks.len() != vectors.len() {
            return Err(IndexError::Request(format!(
                "index changed during embedding: {} chunks, {} vectors",
                inner.chunks.len(),
                vectors.len()
            )));
        }
        for (chunk, vector) in inner.chunks.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
        }
        Ok(inner.chunks.len())
    }

    async fn query_keyword(&self, query: &Query) -> Result<Vec<ScoredChunk>, IndexError> {
        let inner = self.inner.read().await;
        if inner.chunks.is_empty() {
            return Err(IndexError::EmptyIndex);
        }

        let terms = query.terms();
        let scores = bm25_scores(&inner.chunks, &terms);

        let scored = inner
            .chunks
            .iter()
            .zip(scores)
            .filter(|(_, score)| *score > 0.0)
            .map(|(chunk, score)| ScoredChunk {
                chunk: chunk.clone(),
                score,
            })
            .collect();

        Ok(top_k(scored, query.top_k))
    }

    async fn query_embedding(
        &self,
        query_vector: &[f32],
        top_k_limit: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let inner = self.inner.read().await;
        if inner.chunks.is_empty() {
            return Err(IndexError::EmptyIndex);
        }
        if inner.chunks.iter().all(|chunk| chunk.embedding.is_none()) {
            return Err(IndexError::EmbeddingsMissing);
        }

        let scored = inner
            .chunks
            .iter()
            .filter_map(|chunk| {
                chunk.embedding.as_ref().map(|embedding| {
                    if embedding.len() != query_vector.len() {
                        return Err(IndexError::DimensionMismatch {
                            expected: embedding.len(),
                            got: query_vector.len(),
                        });
                    }
                    Ok(ScoredChunk {
                        chunk: chunk.clone(),
                        score: f64::from(cosine_similarity(query_vector, embedding)),
                    })
                })
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        Ok(top_k(scored, top_k_limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{split_document, SplitPolicy};
    use crate::embeddings::HashEmbedder;
    use crate::models::Document;
    use chrono::Utc;

    fn chunks_from(text: &str) -> Vec<Chunk> {
        let document = Document {
            document_id: "doc-1".to_string(),
            title: "test.pdf".to_string(),
            source_path: "/tmp/test.pdf".to_string(),
            text: text.to_string(),
            language: Some("en".to_string()),
            page_count: 1,
            fetched_at: Utc::now(),
        };
        let policy = SplitPolicy {
            split_length: 8,
            ..SplitPolicy::default()
        };
        split_document(&document, &policy).unwrap()
    }

    #[tokio::test]
    async fn double_write_then_reset_leaves_index_empty() {
        let index = MemoryIndex::new();
        let chunks = chunks_from("Writing twice must not duplicate. Reset must clear.");

        index.write_chunks(&chunks).await.unwrap();
        index.write_chunks(&chunks).await.unwrap();
        assert_eq!(index.count().await.unwrap(), chunks.len());

        index.delete_all().await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn iteration_is_restartable_and_ordered() {
        let index = MemoryIndex::new();
        let chunks =
            chunks_from("First sentence here. Second sentence here. Third sentence here.");
        index.write_chunks(&chunks).await.unwrap();

        let first_pass = index.all_chunks().await.unwrap();
        let second_pass = index.all_chunks().await.unwrap();
        assert_eq!(first_pass, second_pass);

        let ordinals: Vec<u64> = first_pass.iter().map(|chunk| chunk.ordinal).collect();
        let mut sorted = ordinals.clone();
        sorted.sort_unstable();
        assert_eq!(ordinals, sorted);
    }

    #[tokio::test]
    async fn keyword_query_on_single_matching_chunk_ranks_it_first() {
        let index = MemoryIndex::new();
        index
            .write_chunks(&chunks_from("The capital of France is Paris."))
            .await
            .unwrap();

        let hits = index
            .query_keyword(&Query::new("capital of France", 5))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].chunk.text.contains("Paris"));
    }

    #[tokio::test]
    async fn keyword_query_on_empty_index_fails() {
        let index = MemoryIndex::new();
        let result = index.query_keyword(&Query::new("anything", 5)).await;
        assert!(matches!(result, Err(IndexError::EmptyIndex)));
    }

    #[tokio::test]
    async fn bm25_prefers_the_chunk_with_more_matching_terms() {
        let index = MemoryIndex::new();
        index
            .write_chunks(&chunks_from(
                "Hydraulic pumps move fluid under pressure. \
                 The cafeteria menu changes every week. \
                 Pump maintenance requires hydraulic fluid checks.",
            ))
            .await
            .unwrap();

        let hits = index
            .query_keyword(&Query::new("hydraulic fluid pressure", 3))
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].chunk.text.to_lowercase().contains("hydraulic"));
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn dense_query_requires_embeddings() {
        let index = MemoryIndex::new();
        index
            .write_chunks(&chunks_from("Dense queries need vectors first."))
            .await
            .unwrap();

        let result = index.query_embedding(&[0.1; 128], 1).await;
        assert!(matches!(result, Err(IndexError::EmbeddingsMissing)));
    }

    #[tokio::test]
    async fn dense_query_returns_one_hit_with_top_k_one() {
        let index = MemoryIndex::new();
        index
            .write_chunks(&chunks_from(
                "Solar panels convert light. Wind turbines convert motion.",
            ))
            .await
            .unwrap();

        let embedder = HashEmbedder::default();
        let embedded = index.update_embeddings(&embedder).await.unwrap();
        assert!(embedded >= 1);

        let query_vector = embedder.embed("solar light").await.unwrap();
        let hits = index.query_embedding(&query_vector, 1).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn dense_query_on_empty_index_fails() {
        let index = MemoryIndex::new();
        let result = index.query_embedding(&[0.0; 4], 1).await;
        assert!(matches!(result, Err(IndexError::EmptyIndex)));
    }

    #[tokio::test]
    async fn embedding_empty_index_fails() {
        let index = MemoryIndex::new();
        let result = index.update_embeddings(&HashEmbedder::default()).await;
        assert!(matches!(result, Err(IndexError::EmptyIndex)));
    }
}
