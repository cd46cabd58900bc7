//! LLM provider client trait and the OpenAI-style implementation

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::error::LlmError;
use crate::config::LlmConfig;

/// Message role in a chat transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a chat transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Extra keyword-style parameters forwarded with each provider call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallKwargs {
    pub temperature: Option<f64>,
    pub seed: Option<u64>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
}

/// A completed provider call: assistant text plus raw usage metadata
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// Raw provider response body; the usage parser owns its shape
    pub usage_meta: Value,
}

/// Provider interface consumed by the service layer.
#[async_trait]
pub trait LlmClient: Send + Sync + 'static {
    /// Model name used for accounting
    fn model(&self) -> &str;

    /// Submit one chat completion.
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        kwargs: &CallKwargs,
    ) -> Result<Completion, LlmError>;
}

/// Client for OpenAI-compatible chat completion APIs (OpenAI, Azure
/// OpenAI deployments, and compatible gateways).
pub struct OpenAiClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl OpenAiClient {
    /// Create a client from configuration, reading the API key from the
    /// environment variable named in the config.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            LlmError::Auth(format!("environment variable {} not set", config.api_key_env))
        })?;
        let timeout = Duration::from_millis(config.timeout_ms);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LlmError::Network)?;
        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            timeout,
        })
    }

    fn build_request_body(&self, messages: &[ChatMessage], kwargs: &CallKwargs) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(temperature) = kwargs.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(seed) = kwargs.seed {
            body["seed"] = json!(seed);
        }
        if let Some(max_tokens) = kwargs.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        kwargs: &CallKwargs,
    ) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(messages, kwargs);
        let timeout = kwargs
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    LlmError::Timeout(timeout)
                } else {
                    LlmError::Network(err)
                }
            })?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LlmError::RateLimited { retry_after });
        }
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, message));
        }

        let raw: Value = response.json().await.map_err(LlmError::Network)?;
        let text = raw["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse("no message content in response".to_string()))?
            .to_string();
        debug!(model = %self.model, response_chars = text.len(), "chat completion received");
        Ok(Completion {
            text,
            usage_meta: raw,
        })
    }
}

/// Create a provider client by name. Unknown providers are a configuration
/// error.
pub fn create_client(config: &LlmConfig) -> Result<std::sync::Arc<dyn LlmClient>, LlmError> {
    match config.provider.as_str() {
        "openai" | "azure" => Ok(std::sync::Arc::new(OpenAiClient::from_config(config)?)),
        other => Err(LlmError::InvalidResponse(format!(
            "unknown LLM provider: {other:?}; supported: openai, azure"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> OpenAiClient {
        OpenAiClient {
            model: "gpt-4o".to_string(),
            api_key: "test-key".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            http: Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_build_request_body_basic() {
        let client = test_client();
        let messages = vec![
            ChatMessage::system("You are helpful"),
            ChatMessage::user("Hello"),
        ];
        let body = client.build_request_body(&messages, &CallKwargs::default());
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hello");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_build_request_body_with_kwargs() {
        let client = test_client();
        let kwargs = CallKwargs {
            temperature: Some(0.0),
            seed: Some(42),
            max_tokens: Some(1000),
            timeout_secs: None,
        };
        let body = client.build_request_body(&[ChatMessage::user("hi")], &kwargs);
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["seed"], 42);
        assert_eq!(body["max_tokens"], 1000);
    }

    #[test]
    fn test_create_client_unknown_provider() {
        let config = LlmConfig {
            provider: "frontier".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_client(&config).is_err());
    }

    #[test]
    fn test_message_constructors() {
        assert_eq!(ChatMessage::system("s").role, Role::System);
        assert_eq!(ChatMessage::user("u").role, Role::User);
        assert_eq!(ChatMessage::assistant("a").role, Role::Assistant);
    }
}
