//! Summarizer gateways.

pub mod openrouter;

pub use openrouter::OpenAiCompatibleSummarizer;

use async_trait::async_trait;

use crate::error::SummarizationError;

/// Generated summary of one article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub text: String,
}

/// LLM capability that condenses article text
#[async_trait]
pub trait SummarizerGateway: Send + Sync {
    /// Summarize `text`, optionally capped at `max_length` characters
    async fn summarize(&self, text: &str, max_length: Option<usize>) -> Result<Summary, SummarizationError>;
}
