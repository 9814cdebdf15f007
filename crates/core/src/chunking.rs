use crate::error::IngestError;
use crate::models::{Chunk, Document};
use sha2::{Digest, Sha256};

/// How a document is split into retrieval chunks.
#[derive(Debug, Clone, Copy)]
pub struct SplitPolicy {
    /// Target chunk size in words. A single sentence longer than this may
    /// overflow the target when `respect_sentence_boundaries` is set.
    pub split_length: usize,
    pub respect_sentence_boundaries: bool,
    pub clean_whitespace: bool,
    pub clean_empty_lines: bool,
}

impl Default for SplitPolicy {
    fn default() -> Self {
        Self {
            split_length: 100,
            respect_sentence_boundaries: true,
            clean_whitespace: true,
            clean_empty_lines: true,
        }
    }
}

impl SplitPolicy {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.split_length == 0 {
            return Err(IngestError::InvalidSplitPolicy(
                "split_length must be at least 1 word".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    // split_whitespace covers Unicode whitespace, non-breaking spaces included.
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn drop_empty_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split text into sentences on terminal punctuation followed by whitespace.
/// Abbreviation handling is deliberately minimal; a trailing fragment without
/// terminal punctuation is kept as its own sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |next| next.is_whitespace());
            if at_boundary {
                let sentence = current.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                current.clear();
            }
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Pack sentences into word-bounded segments without breaking inside a
/// sentence. A sentence longer than the budget becomes its own segment.
fn pack_sentences(sentences: &[String], split_length: usize) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut current_words = 0;

    for sentence in sentences {
        let words = word_count(sentence);

        if current_words > 0 && current_words + words > split_length {
            segments.push(std::mem::take(&mut current));
            current_words = 0;
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
        current_words += words;
    }

    if !current.is_empty() {
        segments.push(current);
    }

    segments
}

/// Hard word-window split when sentence boundaries are not respected.
fn pack_words(text: &str, split_length: usize) -> Vec<String> {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .chunks(split_length)
        .map(|window| window.join(" "))
        .collect()
}

/// Split one document into ordered, provenance-tagged chunks.
///
/// Every chunk's text comes verbatim from the (cleaned) source; concatenating
/// the chunks in ordinal order reproduces the source modulo whitespace
/// normalization.
pub fn split_document(document: &Document, policy: &SplitPolicy) -> Result<Vec<Chunk>, IngestError> {
    policy.validate()?;

    let mut text = document.text.clone();
    if policy.clean_empty_lines {
        text = drop_empty_lines(&text);
    }
    if policy.clean_whitespace {
        text = normalize_whitespace(&text);
    }

    if text.trim().is_empty() {
        return Err(IngestError::EmptyDocument(document.source_path.clone()));
    }

    let segments = if policy.respect_sentence_boundaries {
        pack_sentences(&split_sentences(&text), policy.split_length)
    } else {
        pack_words(&text, policy.split_length)
    };

    Ok(segments
        .into_iter()
        .enumerate()
        .map(|(ordinal, segment)| {
            let words = word_count(&segment);
            Chunk {
                chunk_id: make_chunk_id(&document.document_id, ordinal as u64, &segment),
                document_id: document.document_id.clone(),
                source_path: document.source_path.clone(),
                ordinal: ordinal as u64,
                word_count: words,
                text: segment,
                embedding: None,
            }
        })
        .collect())
}

pub fn split_documents(
    documents: &[Document],
    policy: &SplitPolicy,
) -> Result<Vec<Chunk>, IngestError> {
    let mut chunks = Vec::new();
    for document in documents {
        chunks.extend(split_document(document, policy)?);
    }
    Ok(chunks)
}

fn make_chunk_id(document_id: &str, ordinal: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(ordinal.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn document(text: &str) -> Document {
        Document {
            document_id: "doc-1".to_string(),
            title: "test.pdf".to_string(),
            source_path: "/tmp/test.pdf".to_string(),
            text: text.to_string(),
            language: Some("en".to_string()),
            page_count: 1,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        assert_eq!(normalize_whitespace(input), "A lot of spacing");
    }

    #[test]
    fn non_breaking_spaces_collapse_like_any_whitespace() {
        let input = "total\u{a0}revenue\u{a0} 2024";
        assert_eq!(normalize_whitespace(input), "total revenue 2024");
    }

    #[test]
    fn sentences_split_on_terminal_punctuation() {
        let sentences = split_sentences("First one. Second one! Is this third? tail");
        assert_eq!(
            sentences,
            vec!["First one.", "Second one!", "Is this third?", "tail"]
        );
    }

    #[test]
    fn chunks_respect_word_budget() {
        let text = (0..20)
            .map(|i| format!("Sentence number {i} has exactly six words."))
            .collect::<Vec<_>>()
            .join(" ");
        let policy = SplitPolicy {
            split_length: 20,
            ..SplitPolicy::default()
        };

        let chunks = split_document(&document(&text), &policy).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.word_count <= 20, "chunk overflowed: {}", chunk.text);
        }
    }

    #[test]
    fn oversized_sentence_overflows_rather_than_splits() {
        let long = (0..30).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ") + ".";
        let policy = SplitPolicy {
            split_length: 10,
            ..SplitPolicy::default()
        };

        let chunks = split_document(&document(&long), &policy).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].word_count, 30);
    }

    #[test]
    fn concatenated_chunks_reconstruct_the_source() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota kappa.";
        let policy = SplitPolicy {
            split_length: 5,
            ..SplitPolicy::default()
        };

        let chunks = split_document(&document(text), &policy).unwrap();
        let rebuilt = chunks
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(rebuilt, normalize_whitespace(text));
    }

    #[test]
    fn chunk_order_follows_source_order() {
        let text = "One two three. Four five six. Seven eight nine.";
        let policy = SplitPolicy {
            split_length: 3,
            ..SplitPolicy::default()
        };

        let chunks = split_document(&document(text), &policy).unwrap();
        let ordinals: Vec<u64> = chunks.iter().map(|chunk| chunk.ordinal).collect();
        assert_eq!(ordinals, (0..chunks.len() as u64).collect::<Vec<_>>());
        assert!(chunks[0].text.starts_with("One"));
    }

    #[test]
    fn word_window_split_ignores_sentences() {
        let text = "one two three four five six seven";
        let policy = SplitPolicy {
            split_length: 3,
            respect_sentence_boundaries: false,
            ..SplitPolicy::default()
        };

        let chunks = split_document(&document(text), &policy).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "one two three");
        assert_eq!(chunks[2].text, "seven");
    }

    #[test]
    fn zero_split_length_is_rejected() {
        let policy = SplitPolicy {
            split_length: 0,
            ..SplitPolicy::default()
        };
        assert!(split_document(&document("text."), &policy).is_err());
    }

    #[test]
    fn rewriting_same_text_yields_same_chunk_ids() {
        let policy = SplitPolicy::default();
        let first = split_document(&document("Stable text."), &policy).unwrap();
        let second = split_document(&document("Stable text."), &policy).unwrap();
        assert_eq!(first[0].chunk_id, second[0].chunk_id);
    }
}
