//! k8s-rca LLM
//!
//! A single completion interface over two interchangeable providers:
//! - Anthropic Claude (Messages API)
//! - OpenAI (Chat Completions API)
//!
//! Also includes the HTTP client factory and a provider factory keyed by
//! `ProviderType`.

pub mod anthropic;
pub mod factory;
pub mod http_client;
pub mod openai;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use factory::create_provider;
pub use http_client::{build_http_client, HttpClientOptions};
pub use openai::OpenAIProvider;
pub use provider::{missing_api_key_error, parse_http_error, LlmProvider};
pub use types::*;
