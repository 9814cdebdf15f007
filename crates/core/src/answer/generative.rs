use crate::answer::AnswerGenerator;
use crate::error::AnswerError;
use crate::models::{Answer, Chunk, Query};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One method, one concern: turn a prompt into text. Implemented per model
/// backend (hosted deployment, local server, test stubs).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AnswerError>;
}

pub const DEFAULT_ANSWER_WORD_BUDGET: usize = 100;

/// Prompt-based answering: interpolates the retrieved chunks and the
/// question into a fixed instruction and delegates to a [`TextGenerator`].
pub struct GenerativeReader<G> {
    generator: G,
    word_budget: usize,
}

impl<G: TextGenerator> GenerativeReader<G> {
    pub fn new(generator: G) -> Self {
        Self {
            generator,
            word_budget: DEFAULT_ANSWER_WORD_BUDGET,
        }
    }

    pub fn with_word_budget(mut self, word_budget: usize) -> Self {
        self.word_budget = word_budget.max(1);
        self
    }

    pub fn build_prompt(&self, question: &str, context: &[Chunk]) -> String {
        let paragraphs = context
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        format!(
            "Synthesize a comprehensive answer from the following paragraphs and \
             the given question. Answer in no more than {} words. Use only \
             information from the paragraphs.\n\n\
             Paragraphs:\n{}\n\nQuestion: {}\n\nAnswer:",
            self.word_budget, paragraphs, question
        )
    }
}

#[async_trait]
impl<G: TextGenerator> AnswerGenerator for GenerativeReader<G> {
    async fn answer(&self, query: &Query, context: &[Chunk]) -> Result<Answer, AnswerError> {
        if context.is_empty() {
            return Err(AnswerError::NoContext);
        }

        let prompt = self.build_prompt(&query.text, context);
        let text = self.generator.generate(&prompt).await?;

        if text.trim().is_empty() {
            return Err(AnswerError::MalformedResponse(
                "model returned an empty completion".to_string(),
            ));
        }

        Ok(Answer::Generated {
            answer_id: Uuid::new_v4(),
            text: text.trim().to_string(),
            context_chunk_ids: context.iter().map(|chunk| chunk.chunk_id.clone()).collect(),
        })
    }
}

/// Hosted chat-completions deployment. The API key is read from the
/// environment by the caller; nothing here persists it.
#[derive(Debug, Clone)]
pub struct AzureOpenAiConfig {
    pub base_url: String,
    pub deployment: String,
    pub api_version: String,
    pub api_key: String,
    pub max_tokens: u32,
}

pub struct AzureOpenAiGenerator {
    client: Client,
    config: AzureOpenAiConfig,
}

impl AzureOpenAiGenerator {
    pub fn new(config: AzureOpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.deployment,
            self.config.api_version
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[async_trait]
impl TextGenerator for AzureOpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, AnswerError> {
        let request = ChatRequest {
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(self.completions_url())
            .header("api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AnswerError::Upstream(format!(
                "deployment {} returned {}",
                self.config.deployment,
                response.status()
            )));
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|error| AnswerError::MalformedResponse(error.to_string()))?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                AnswerError::MalformedResponse("completion has no choices".to_string())
            })
    }
}

/// Local small-model server speaking the `/api/generate` contract.
pub struct LocalHttpGenerator {
    client: Client,
    base_url: String,
    model: String,
}

impl LocalHttpGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct LocalGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct LocalGenerateResponse {
    response: String,
}

#[async_trait]
impl TextGenerator for LocalHttpGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, AnswerError> {
        let response = self
            .client
            .post(format!(
                "{}/api/generate",
                self.base_url.trim_end_matches('/')
            ))
            .json(&LocalGenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AnswerError::Upstream(format!(
                "local model {} returned {}",
                self.model,
                response.status()
            )));
        }

        let payload: LocalGenerateResponse = response
            .json()
            .await
            .map_err(|error| AnswerError::MalformedResponse(error.to_string()))?;

        Ok(payload.response)
    }
}
