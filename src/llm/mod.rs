//! LLM integration.
//!
//! A single `LlmProvider` trait over chat completion, implemented by an
//! OpenAI-compatible HTTP backend. The classifier and reply generator
//! only ever see the trait, so tests swap in canned providers.

pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::config::LlmSettings;
use crate::error::LlmError;

/// A single message in a chat completion conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A chat completion request. Temperature and token limits fall back to
/// the provider's configured defaults when unset.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A completed chat response with token accounting for cost tracking.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Abstraction over a chat completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Model identifier, for logging and cost records.
    fn model_name(&self) -> &str;
}

/// Create the production provider from configuration.
pub fn create_provider(settings: &LlmSettings, api_key: SecretString) -> Arc<dyn LlmProvider> {
    tracing::info!(model = %settings.model, api_base = %settings.api_base, "Using LLM provider");
    Arc::new(http::HttpProvider::new(settings.clone(), api_key))
}
