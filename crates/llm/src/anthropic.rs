//! Anthropic Claude Provider
//!
//! Implementation of the LlmProvider trait for Anthropic's Messages API.

use async_trait::async_trait;
use serde::Deserialize;

use crate::http_client::{build_http_client, HttpClientOptions};
use crate::provider::{missing_api_key_error, parse_http_error, LlmProvider};
use crate::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, MessageRole, ProviderConfig,
    StopReason, UsageStats,
};

/// Default Anthropic API endpoint
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Current API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude provider
pub struct AnthropicProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with the given configuration
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(&HttpClientOptions {
            proxy_url: config.proxy_url.clone(),
            request_timeout: None,
        })?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL)
    }

    /// Build the request body for the API
    fn build_request_body(
        &self,
        messages: &[Message],
        system: Option<&str>,
        request_options: &LlmRequestOptions,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": request_options
                .max_tokens_override
                .unwrap_or(self.config.max_tokens),
            "temperature": request_options
                .temperature_override
                .unwrap_or(self.config.temperature),
        });

        // System messages in the conversation are folded into the system block
        let mut system_text: Vec<&str> = system.into_iter().collect();
        system_text.extend(
            messages
                .iter()
                .filter(|m| m.role == MessageRole::System)
                .map(|m| m.content.as_str()),
        );
        if !system_text.is_empty() {
            body["system"] = serde_json::json!([{
                "type": "text",
                "text": system_text.join("\n\n"),
            }]);
        }

        let claude_messages: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| {
                let role = match m.role {
                    MessageRole::Assistant => "assistant",
                    _ => "user",
                };
                serde_json::json!({ "role": role, "content": m.content })
            })
            .collect();
        body["messages"] = serde_json::json!(claude_messages);

        body
    }

    fn parse_response(&self, response: ClaudeResponse) -> LlmResponse {
        let text: Vec<String> = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect();

        let stop_reason = response
            .stop_reason
            .as_deref()
            .map(StopReason::from)
            .unwrap_or(StopReason::EndTurn);

        LlmResponse {
            content: if text.is_empty() {
                None
            } else {
                Some(text.join(""))
            },
            stop_reason,
            usage: UsageStats {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
            },
            model: response.model,
        }
    }

    async fn post(&self, api_key: &str, body: &serde_json::Value) -> LlmResult<(u16, String)> {
        let response = self
            .client
            .post(self.base_url())
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body_text = response.text().await.map_err(|e| LlmError::NetworkError {
            message: e.to_string(),
        })?;
        Ok((status, body_text))
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| missing_api_key_error("anthropic"))?;

        let body = self.build_request_body(&messages, system.as_deref(), &request_options);
        let (status, body_text) = self.post(api_key, &body).await?;

        if status != 200 {
            return Err(parse_http_error(status, &body_text, "anthropic"));
        }

        let claude_response: ClaudeResponse =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ParseError {
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(self.parse_response(claude_response))
    }

    async fn health_check(&self) -> LlmResult<()> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| missing_api_key_error("anthropic"))?;

        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": 1,
            "messages": [{"role": "user", "content": "Hi"}]
        });

        match self.post(api_key, &body).await? {
            (200, _) => Ok(()),
            (status, body) => Err(parse_http_error(status, &body, "anthropic")),
        }
    }
}

/// Claude API response format
#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: ResponseUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    input_tokens: u32,
    output_tokens: u32,
}
