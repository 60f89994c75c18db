//! Completion clients implementing [`CompletionService`].
//!
//! - **[`DisabledLlm`]**: always fails; the pipeline falls back to heuristics
//!   where it can and reports a generation error where it cannot.
//! - **[`OpenAiChat`]**: any OpenAI-compatible `/chat/completions` endpoint.
//! - **[`OllamaChat`]**: a local Ollama instance's `/api/chat` endpoint.
//!
//! Both network clients request JSON-only output when the request asks for
//! it and retry transient failures through [`retry_with_backoff`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use docqa_core::llm::{Completion, CompletionRequest, CompletionService};

use crate::config::LlmConfig;
use crate::retry::{is_retryable, post_json, retry_with_backoff, RetryPolicy};

pub struct DisabledLlm;

#[async_trait]
impl CompletionService for DisabledLlm {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
        bail!("LLM provider is disabled; set [llm].provider to enable answer generation")
    }
}

// ============ OpenAI-compatible ============

/// Chat completions client. Requires `OPENAI_API_KEY`.
pub struct OpenAiChat {
    model: String,
    url: String,
    api_key: String,
    temperature: Option<f32>,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("llm.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            client,
            policy: RetryPolicy::new(config.max_retries),
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": self.temperature.unwrap_or(request.temperature),
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if request.json {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait]
impl CompletionService for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = self.request_body(request);
        let url = format!("{}/chat/completions", self.url);
        let json = retry_with_backoff(&self.policy, is_retryable, "openai chat", || {
            post_json(&self.client, "OpenAI", &url, Some(self.api_key.as_str()), &body)
        })
        .await?;
        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &Value) -> Result<Completion> {
    let text = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid chat response: no message content in choices"))?;
    let usage = json.get("usage");
    Ok(Completion {
        text: text.to_string(),
        input_tokens: usage
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(|t| t.as_u64()),
        output_tokens: usage
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|t| t.as_u64()),
    })
}

// ============ Ollama ============

/// Ollama `/api/chat` client (default `http://localhost:11434`).
pub struct OllamaChat {
    model: String,
    url: String,
    temperature: Option<f32>,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("llm.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            client,
            policy: RetryPolicy::new(config.max_retries),
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut options = json!({
            "temperature": self.temperature.unwrap_or(request.temperature),
        });
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = json!(max_tokens);
        }
        let mut body = json!({
            "model": self.model,
            "stream": false,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
            "options": options,
        });
        if request.json {
            body["format"] = json!("json");
        }
        body
    }
}

#[async_trait]
impl CompletionService for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = self.request_body(request);
        let url = format!("{}/api/chat", self.url);
        let json = retry_with_backoff(&self.policy, is_retryable, "ollama chat", || {
            post_json(&self.client, "Ollama", &url, None, &body)
        })
        .await
        .map_err(|e| anyhow!("Ollama chat failed (is Ollama running at {}?): {}", self.url, e))?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &Value) -> Result<Completion> {
    let text = json
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing message content"))?;
    Ok(Completion {
        text: text.to_string(),
        input_tokens: json.get("prompt_eval_count").and_then(|t| t.as_u64()),
        output_tokens: json.get("eval_count").and_then(|t| t.as_u64()),
    })
}

/// Build the completion client named by `config.provider`.
pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn CompletionService>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledLlm)),
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ollama() -> OllamaChat {
        OllamaChat::new(&LlmConfig {
            provider: "ollama".into(),
            model: Some("llama3".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_openai_usage() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"answer\": \"x\"}"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30}
        });
        let c = parse_openai_response(&body).unwrap();
        assert_eq!(c.text, "{\"answer\": \"x\"}");
        assert_eq!(c.input_tokens, Some(120));
        assert_eq!(c.output_tokens, Some(30));
    }

    #[test]
    fn test_parse_openai_without_choices_fails() {
        assert!(parse_openai_response(&json!({"choices": []})).is_err());
    }

    #[test]
    fn test_parse_ollama_counts() {
        let body = json!({
            "message": {"role": "assistant", "content": "{}"},
            "prompt_eval_count": 40,
            "done": true
        });
        let c = parse_ollama_response(&body).unwrap();
        assert_eq!(c.text, "{}");
        assert_eq!(c.input_tokens, Some(40));
        assert_eq!(c.output_tokens, None);
    }

    #[test]
    fn test_ollama_body_requests_json() {
        let chat = ollama();
        let body = chat.request_body(&CompletionRequest::json("sys", "user").with_max_tokens(256));
        assert_eq!(body["format"], "json");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 256);
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn test_configured_temperature_overrides_request() {
        let mut chat = ollama();
        chat.temperature = Some(0.0);
        let body = chat.request_body(&CompletionRequest::json("s", "p").with_temperature(0.7));
        assert_eq!(body["options"]["temperature"], 0.0);
    }

    #[test]
    fn test_create_llm_selection() {
        let llm = create_llm(&LlmConfig::default()).unwrap();
        assert_eq!(llm.model_name(), "disabled");
        assert!(create_llm(&LlmConfig {
            provider: "ollama".into(),
            ..Default::default()
        })
        .is_err());
    }
}
