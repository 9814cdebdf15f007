use crate::answer::AnswerGenerator;
use crate::chunking::split_sentences;
use crate::error::AnswerError;
use crate::models::{Answer, Chunk, Query};
use async_trait::async_trait;
use std::collections::HashSet;
use uuid::Uuid;

const STOPWORDS: [&str; 28] = [
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "of", "in", "on", "at", "to",
    "for", "and", "or", "what", "which", "who", "whom", "when", "where", "why", "how", "do",
    "does", "did",
];

/// Lexical span extraction: locate the sentence with the highest term
/// overlap against the question, then return its longest contiguous run of
/// non-question words verbatim. Never invents text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveReader;

impl ExtractiveReader {
    pub fn new() -> Self {
        Self
    }
}

fn normalize(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

fn content_terms(text: &str) -> Vec<String> {
    let stop: HashSet<&str> = STOPWORDS.iter().copied().collect();
    text.split_whitespace()
        .map(normalize)
        .filter(|term| !term.is_empty() && !stop.contains(term.as_str()))
        .collect()
}

fn overlap_score(question_terms: &[String], sentence: &str) -> f64 {
    if question_terms.is_empty() {
        return 0.0;
    }
    let sentence_terms: HashSet<String> =
        sentence.split_whitespace().map(normalize).collect();
    let matched = question_terms
        .iter()
        .filter(|term| sentence_terms.contains(*term))
        .count();
    matched as f64 / question_terms.len() as f64
}

/// Longest contiguous run of words that are neither question terms nor
/// stopwords, kept verbatim. Falls back to the whole sentence when every
/// word belongs to the question.
fn extract_span(sentence: &str, question_terms: &[String]) -> String {
    let stop: HashSet<&str> = STOPWORDS.iter().copied().collect();
    let question: HashSet<&str> = question_terms.iter().map(String::as_str).collect();

    let words: Vec<&str> = sentence.split_whitespace().collect();
    let mut best: &[&str] = &[];
    let mut run_start = None;

    for (position, word) in words.iter().enumerate() {
        let normalized = normalize(word);
        let is_answer_word = !normalized.is_empty()
            && !stop.contains(normalized.as_str())
            && !question.contains(normalized.as_str());

        match (is_answer_word, run_start) {
            (true, None) => run_start = Some(position),
            (false, Some(start)) => {
                if position - start > best.len() {
                    best = &words[start..position];
                }
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        if words.len() - start > best.len() {
            best = &words[start..];
        }
    }

    let span = if best.is_empty() {
        sentence.to_string()
    } else {
        best.join(" ")
    };

    span.trim_matches(|c: char| !c.is_alphanumeric() && c != '%')
        .to_string()
}

#[async_trait]
impl AnswerGenerator for ExtractiveReader {
    async fn answer(&self, query: &Query, context: &[Chunk]) -> Result<Answer, AnswerError> {
        if context.is_empty() {
            return Err(AnswerError::NoContext);
        }

        let question_terms = content_terms(&query.text);

        let mut best: Option<(f64, String, String)> = None;
        for chunk in context {
            for sentence in split_sentences(&chunk.text) {
                let score = overlap_score(&question_terms, &sentence);
                let replace = best
                    .as_ref()
                    .map(|(best_score, _, _)| score > *best_score)
                    .unwrap_or(true);
                if replace {
                    best = Some((score, sentence, chunk.chunk_id.clone()));
                }
            }
        }

        let (confidence, sentence, chunk_id) = best.ok_or(AnswerError::NoContext)?;
        let span = extract_span(&sentence, &question_terms);

        Ok(Answer::Extracted {
            answer_id: Uuid::new_v4(),
            span,
            confidence,
            chunk_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            document_id: "doc-1".to_string(),
            source_path: "/tmp/test.pdf".to_string(),
            ordinal: 0,
            text: text.to_string(),
            word_count: text.split_whitespace().count(),
            embedding: None,
        }
    }

    #[tokio::test]
    async fn extracts_paris_from_the_capital_sentence() {
        let reader = ExtractiveReader::new();
        let context = vec![chunk("c2", "The capital of France is Paris.")];
        let query = Query::new("What is the capital of France?", 1);

        let answer = reader.answer(&query, &context).await.unwrap();
        match answer {
            Answer::Extracted {
                span,
                confidence,
                chunk_id,
                ..
            } => {
                assert_eq!(span, "Paris");
                assert!(confidence > 0.9);
                assert_eq!(chunk_id, "c2");
            }
            other => panic!("expected an extracted span, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn picks_the_most_relevant_chunk_out_of_several() {
        let reader = ExtractiveReader::new();
        let context = vec![
            chunk("c1", "Berlin is a large city in Germany."),
            chunk("c2", "The capital of France is Paris."),
            chunk("c3", "Madrid has many museums."),
        ];
        let query = Query::new("What is the capital of France?", 3);

        let answer = reader.answer(&query, &context).await.unwrap();
        match answer {
            Answer::Extracted { chunk_id, span, .. } => {
                assert_eq!(chunk_id, "c2");
                assert_eq!(span, "Paris");
            }
            other => panic!("expected an extracted span, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn span_words_always_come_from_the_context() {
        let reader = ExtractiveReader::new();
        let text = "Revenue grew by 12% last year according to the annual report.";
        let context = vec![chunk("c1", text)];
        let query = Query::new("How much did revenue grow?", 1);

        let answer = reader.answer(&query, &context).await.unwrap();
        for word in answer.text().split_whitespace() {
            let normalized = normalize(word);
            assert!(
                text.to_lowercase().contains(&normalized),
                "invented word: {word}"
            );
        }
    }

    #[tokio::test]
    async fn empty_context_is_an_error() {
        let reader = ExtractiveReader::new();
        let result = reader
            .answer(&Query::new("anything?", 1), &[])
            .await;
        assert!(matches!(result, Err(AnswerError::NoContext)));
    }
}
