//! Schema-guided extraction: OCR text + candidate schemas → structured record.
//!
//! This module is intentionally thin — prompt construction lives in
//! [`crate::prompts`] and response parsing in [`super::parse`], both pure,
//! so the only thing here is the model call itself. The call is made with a
//! sampling temperature of zero: downstream validation assumes stable
//! formatting, so determinism is part of the contract, not a tunable.

use crate::error::ExtractError;
use crate::model::{CandidateRecord, ReceiptType};
use crate::pipeline::parse::parse_extraction;
use crate::prompts::{build_extraction_prompt, EXTRACTION_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use tracing::debug;

/// Sampling temperature for every extraction call. Not configurable.
const EXTRACTION_TEMPERATURE: f32 = 0.0;

/// Maps extracted text onto one of the candidate receipt types.
#[async_trait]
pub trait SchemaExtractor: Send + Sync {
    /// Produce a best-effort structured record for `text`.
    ///
    /// `candidates` must be non-empty — the orchestrator rejects empty
    /// candidate sets before ever calling this. One model call per
    /// invocation; no internal retries.
    async fn extract(
        &self,
        text: &str,
        candidates: &[ReceiptType],
    ) -> Result<CandidateRecord, ExtractError>;
}

/// Extraction via a chat-completion model behind [`LLMProvider`].
pub struct LlmExtractor {
    provider: Arc<dyn LLMProvider>,
    max_tokens: usize,
}

impl LlmExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, max_tokens: usize) -> Self {
        Self {
            provider,
            max_tokens,
        }
    }
}

#[async_trait]
impl SchemaExtractor for LlmExtractor {
    async fn extract(
        &self,
        text: &str,
        candidates: &[ReceiptType],
    ) -> Result<CandidateRecord, ExtractError> {
        let messages = vec![
            ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
            ChatMessage::user(build_extraction_prompt(text, candidates)),
        ];

        let options = CompletionOptions {
            temperature: Some(EXTRACTION_TEMPERATURE),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ExtractError::Upstream(e.to_string()))?;

        debug!(
            "extraction call used {} input / {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );

        parse_extraction(&response.content, candidates)
    }
}
