//! OpenAI-compatible chat completion client.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{CompletionGateway, CompletionRequest};

/// Connection settings for [`HttpGateway`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Provider base URL, without the endpoint path.
    pub base_url: String,
    /// Bearer token, when the provider requires one.
    pub api_key: Option<String>,
    /// Model identifier passed through verbatim.
    pub model: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        // A local Ollama install speaking the OpenAI dialect.
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: None,
            model: "llama3.1".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// [`CompletionGateway`] backed by a `/chat/completions` endpoint.
pub struct HttpGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, config })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl CompletionGateway for HttpGateway {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
        });

        let mut http_request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request
            .send()
            .await
            .context("completion request failed")?;
        let status = response.status();
        if !status.is_success() {
            // The status code stays in the message so the caller's
            // classification heuristic can see quota refusals.
            let detail = response.text().await.unwrap_or_default();
            bail!("completion request returned {status}: {detail}");
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("failed to decode completion response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .context("completion response contained no choices")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_local_ollama() {
        let config = GatewayConfig::default();
        assert!(config.base_url.contains("11434"));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn response_shape_decodes() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": "hello"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "hello");
    }

    #[test]
    fn empty_choice_list_decodes() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(parsed.choices.is_empty());
    }
}
