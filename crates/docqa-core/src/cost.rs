//! Static cost estimation.
//!
//! Token counts come from provider-reported usage when present and from a
//! characters-per-token heuristic otherwise. The resulting
//! [`CostEstimate`] is an approximation for observability only; it is never
//! a billing figure.

use serde::{Deserialize, Serialize};

use crate::llm::{Completion, CompletionRequest};
use crate::models::CostEstimate;

const CHARS_PER_TOKEN: u64 = 4;

/// Rough token count for `text` (ceil(chars / 4)).
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Per-1K-token prices in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    pub embedding_per_1k: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            input_per_1k: 0.00015,
            output_per_1k: 0.0006,
            embedding_per_1k: 0.00002,
        }
    }
}

impl CostModel {
    pub fn estimate(&self, usage: &TokenUsage) -> CostEstimate {
        let usd = usage.input_tokens as f64 / 1000.0 * self.input_per_1k
            + usage.output_tokens as f64 / 1000.0 * self.output_per_1k
            + usage.embedding_tokens as f64 / 1000.0 * self.embedding_per_1k;
        CostEstimate {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            embedding_tokens: usage.embedding_tokens,
            estimated_usd: usd,
        }
    }
}

/// Token tally for the external calls a stage actually made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub embedding_tokens: u64,
}

impl TokenUsage {
    /// Record one successful completion call.
    pub fn record_completion(&mut self, request: &CompletionRequest, completion: &Completion) {
        self.input_tokens += completion.input_tokens.unwrap_or_else(|| {
            estimate_tokens(&request.system) + estimate_tokens(&request.prompt)
        });
        self.output_tokens += completion
            .output_tokens
            .unwrap_or_else(|| estimate_tokens(&completion.text));
    }

    pub fn record_embedding(&mut self, text: &str) {
        self.embedding_tokens += estimate_tokens(text);
    }

    pub fn merge(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.embedding_tokens += other.embedding_tokens;
    }
}
