//! Language-model completion contract.
//!
//! All classification, judgment, critique, and generation calls go through
//! [`CompletionService`]. Callers request JSON-only output and validate the
//! reply against a per-call-site schema (see [`crate::structured`]); a
//! non-conforming reply is a recoverable failure, never trusted as data.

use anyhow::Result;
use async_trait::async_trait;

/// A single completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON-object-only response.
    pub json: bool,
}

impl CompletionRequest {
    pub fn json(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: 0.1,
            max_tokens: None,
            json: true,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Raw completion text plus provider-reported usage, when available.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Returns the model identifier used for completions.
    fn model_name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}
