//! LLM Types
//!
//! Request, response and error types shared by every provider.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported LLM provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Anthropic,
    OpenAI,
}

impl ProviderType {
    /// Environment variable holding the API key for this provider.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderType::Anthropic => "ANTHROPIC_API_KEY",
            ProviderType::OpenAI => "OPENAI_API_KEY",
        }
    }

    /// Model used when the configuration does not name one.
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderType::Anthropic => "claude-3-5-sonnet-20241022",
            ProviderType::OpenAI => "gpt-4o",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::Anthropic => write!(f, "anthropic"),
            ProviderType::OpenAI => write!(f, "openai"),
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderType::Anthropic),
            "openai" | "gpt" => Ok(ProviderType::OpenAI),
            other => Err(format!("Unknown LLM provider: {}", other)),
        }
    }
}

/// Shape the caller expects the completion to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free text (may still contain JSON)
    #[default]
    Text,
    /// A single JSON object; providers with a native JSON mode enable it
    JsonObject,
}

/// Per-request options for provider behavior.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmRequestOptions {
    /// Optional temperature override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_override: Option<f32>,
    /// Optional max token override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens_override: Option<u32>,
    /// Expected response shape.
    #[serde(default)]
    pub response_format: ResponseFormat,
}

impl LlmRequestOptions {
    /// Options for a call that must answer with a JSON object.
    pub fn json(temperature: f32) -> Self {
        Self {
            temperature_override: Some(temperature),
            max_tokens_override: None,
            response_format: ResponseFormat::JsonObject,
        }
    }

    /// Options for a free-text call.
    pub fn text(temperature: f32) -> Self {
        Self {
            temperature_override: Some(temperature),
            ..Default::default()
        }
    }
}

/// Configuration for an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// The provider type
    pub provider: ProviderType,
    /// API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL override (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model name to use
    pub model: String,
    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Proxy URL for outbound requests (http, https or socks5)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    /// Provider-specific options
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.2
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::Anthropic,
            api_key: None,
            base_url: None,
            model: ProviderType::Anthropic.default_model().to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            proxy_url: None,
            options: HashMap::new(),
        }
    }
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl UsageStats {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Why the model stopped generating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl From<&str> for StopReason {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "end_turn" | "stop" => StopReason::EndTurn,
            "max_tokens" | "length" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// Complete response from a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub stop_reason: StopReason,
    pub usage: UsageStats,
    pub model: String,
}

impl LlmResponse {
    /// Build a plain end-of-turn response carrying `text`.
    pub fn from_text(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            stop_reason: StopReason::EndTurn,
            usage: UsageStats::default(),
            model: model.into(),
        }
    }

    /// Text content, or an empty string when the provider returned none.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    pub fn was_truncated(&self) -> bool {
        self.stop_reason == StopReason::MaxTokens
    }
}

/// Errors surfaced by providers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmError {
    AuthenticationFailed { message: String },
    RateLimited {
        message: String,
        retry_after: Option<u32>,
    },
    ModelNotFound { model: String },
    InvalidRequest { message: String },
    ServerError {
        message: String,
        status: Option<u16>,
    },
    NetworkError { message: String },
    ParseError { message: String },
    ProviderUnavailable { message: String },
    Timeout { seconds: u64 },
    Other { message: String },
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::AuthenticationFailed { message } => {
                write!(f, "Authentication failed: {}", message)
            }
            LlmError::RateLimited { message, .. } => write!(f, "Rate limited: {}", message),
            LlmError::ModelNotFound { model } => write!(f, "Model not found: {}", model),
            LlmError::InvalidRequest { message } => write!(f, "Invalid request: {}", message),
            LlmError::ServerError { message, status } => {
                if let Some(s) = status {
                    write!(f, "Server error ({}): {}", s, message)
                } else {
                    write!(f, "Server error: {}", message)
                }
            }
            LlmError::NetworkError { message } => write!(f, "Network error: {}", message),
            LlmError::ParseError { message } => write!(f, "Parse error: {}", message),
            LlmError::ProviderUnavailable { message } => {
                write!(f, "Provider unavailable: {}", message)
            }
            LlmError::Timeout { seconds } => {
                write!(f, "LLM call timed out after {}s", seconds)
            }
            LlmError::Other { message } => write!(f, "Error: {}", message),
        }
    }
}

impl std::error::Error for LlmError {}

pub type LlmResult<T> = Result<T, LlmError>;
