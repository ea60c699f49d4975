use crate::chunking::TextChunk;
use crate::error::RagError;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error};
use std::sync::Arc;

/// Answer text returned whenever the engine fails, whatever the cause
pub const ERROR_ANSWER: &str = "Error while generating answer.";

/// Decoding parameters sent with every generation request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub max_output_tokens: i32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        GenerationParams {
            temperature: 0.3,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 512,
        }
    }
}

/// A generative model that completes a prompt
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;
}

/// How an answer came about. Failures keep the error code for diagnosis even
/// though their text is always [`ERROR_ANSWER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    Generated,
    Failed { code: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub outcome: AnswerOutcome,
}

impl Answer {
    pub fn generated(text: impl Into<String>) -> Self {
        Answer {
            text: text.into(),
            outcome: AnswerOutcome::Generated,
        }
    }

    pub fn failed(err: &RagError) -> Self {
        Answer {
            text: ERROR_ANSWER.to_string(),
            outcome: AnswerOutcome::Failed { code: err.code() },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AnswerOutcome::Failed { .. })
    }
}

/// Build the single "stuff" prompt: every context chunk, then the question
pub fn build_prompt(query: &str, context: &[TextChunk]) -> String {
    let context = context
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<&str>>()
        .join("\n\n");

    format!(
        "Use the following pieces of context to answer the question at the end. \
         If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
         {}\n\nQuestion: {}\nHelpful Answer:",
        context, query
    )
}

/// Produces answers from a query and its retrieved context
#[derive(Clone)]
pub struct AnswerGenerator {
    model: Arc<dyn LanguageModel>,
    params: GenerationParams,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        AnswerGenerator {
            model,
            params: GenerationParams::default(),
        }
    }

    /// Generate an answer; model failures become the sentinel answer
    pub async fn generate(&self, query: &str, context: &[TextChunk]) -> Answer {
        match self.try_generate(query, context).await {
            Ok(text) => Answer::generated(text),
            Err(e) => {
                error!("[{}] {}", e.code(), e);
                Answer::failed(&e)
            }
        }
    }

    async fn try_generate(&self, query: &str, context: &[TextChunk]) -> crate::error::Result<String> {
        let prompt = build_prompt(query, context);
        debug!(
            "Generating answer from {} context chunks ({} prompt chars)",
            context.len(),
            prompt.len()
        );

        self.model
            .generate(&prompt, &self.params)
            .await
            .map_err(RagError::Generation)
    }
}
