use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One extracted source document, before chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub source_path: String,
    pub text: String,
    pub language: Option<String>,
    pub page_count: u32,
    pub fetched_at: DateTime<Utc>,
}

/// A retrieval unit derived from exactly one [`Document`].
///
/// `ordinal` preserves source order; `chunk_id` is content-addressed, so
/// writing the same chunk twice overwrites rather than duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub source_path: String,
    pub ordinal: u64,
    pub text: String,
    pub word_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub top_k: usize,
}

impl Query {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
        }
    }

    pub fn terms(&self) -> Vec<String> {
        self.text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(|token| token.to_lowercase())
            .collect()
    }
}

/// Retriever output: a chunk paired with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// Per-request answer. Not persisted anywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    Extracted {
        answer_id: uuid::Uuid,
        span: String,
        confidence: f64,
        chunk_id: String,
    },
    Generated {
        answer_id: uuid::Uuid,
        text: String,
        context_chunk_ids: Vec<String>,
    },
}

impl Answer {
    pub fn text(&self) -> &str {
        match self {
            Answer::Extracted { span, .. } => span,
            Answer::Generated { text, .. } => text,
        }
    }
}
