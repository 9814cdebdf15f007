use crate::error::AnswerError;
use crate::models::{Answer, Chunk, Query};
use async_trait::async_trait;

pub mod extractive;
pub mod generative;

pub use extractive::ExtractiveReader;
pub use generative::{
    AzureOpenAiConfig, AzureOpenAiGenerator, GenerativeReader, LocalHttpGenerator, TextGenerator,
};

/// Shared contract for both answering variants: produce an [`Answer`] from
/// the question and the retrieved context chunks.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn answer(&self, query: &Query, context: &[Chunk]) -> Result<Answer, AnswerError>;
}

#[async_trait]
impl<T: AnswerGenerator + ?Sized> AnswerGenerator for Box<T> {
    async fn answer(&self, query: &Query, context: &[Chunk]) -> Result<Answer, AnswerError> {
        (**self).answer(query, context).await
    }
}
