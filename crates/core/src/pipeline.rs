use crate::answer::AnswerGenerator;
use crate::error::AnswerError;
use crate::models::{Answer, Query, ScoredChunk};
use crate::retriever::Retriever;

/// Everything a caller needs from one question: the answer plus the ranked
/// chunks it was grounded on.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub answer: Answer,
    pub retrieved: Vec<ScoredChunk>,
}

/// Fixed two-stage composition: retriever output feeds the answer
/// generator. Parameters travel with each invocation; the topology never
/// changes. Retrieval and generation errors both propagate untouched.
pub struct QaPipeline<R, G> {
    retriever: R,
    generator: G,
}

impl<R, G> QaPipeline<R, G>
where
    R: Retriever,
    G: AnswerGenerator,
{
    pub fn new(retriever: R, generator: G) -> Self {
        Self {
            retriever,
            generator,
        }
    }

    pub async fn run(&self, question: &str, top_k: usize) -> Result<PipelineOutput, AnswerError> {
        let query = Query::new(question, top_k);
        let retrieved = self.retriever.retrieve(&query).await?;

        let context: Vec<_> = retrieved
            .iter()
            .map(|scored| scored.chunk.clone())
            .collect();
        let answer = self.generator.answer(&query, &context).await?;

        Ok(PipelineOutput { answer, retrieved })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::ExtractiveReader;
    use crate::chunking::{split_document, SplitPolicy};
    use crate::error::IndexError;
    use crate::index::{DocumentIndex, MemoryIndex};
    use crate::models::Document;
    use crate::retriever::KeywordRetriever;
    use chrono::Utc;

    fn fixture_document() -> Document {
        Document {
            document_id: "doc-1".to_string(),
            title: "facts.pdf".to_string(),
            source_path: "/tmp/facts.pdf".to_string(),
            text: "Berlin is the largest city in Germany. \
                   The capital of France is Paris. \
                   Madrid hosts the national museum of Spain."
                .to_string(),
            language: Some("en".to_string()),
            page_count: 1,
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn keyword_retrieval_plus_extraction_answers_the_capital_question() {
        let policy = SplitPolicy {
            split_length: 8,
            ..SplitPolicy::default()
        };
        let chunks = split_document(&fixture_document(), &policy).unwrap();
        assert_eq!(chunks.len(), 3);

        let index = MemoryIndex::new();
        index.write_chunks(&chunks).await.unwrap();

        let pipeline = QaPipeline::new(KeywordRetriever::new(index), ExtractiveReader::new());
        let output = pipeline
            .run("What is the capital of France?", 1)
            .await
            .unwrap();

        assert_eq!(output.retrieved.len(), 1);
        assert!(output.retrieved[0].chunk.text.contains("Paris"));
        assert_eq!(output.answer.text(), "Paris");
    }

    #[tokio::test]
    async fn empty_index_error_surfaces_through_the_pipeline() {
        let pipeline = QaPipeline::new(
            KeywordRetriever::new(MemoryIndex::new()),
            ExtractiveReader::new(),
        );
        let result = pipeline.run("What is the capital of France?", 1).await;
        assert!(matches!(
            result,
            Err(AnswerError::Retrieval(IndexError::EmptyIndex))
        ));
    }
}
