//! Provider Factory

use std::sync::Arc;

use crate::anthropic::AnthropicProvider;
use crate::openai::OpenAIProvider;
use crate::provider::LlmProvider;
use crate::types::{LlmResult, ProviderConfig, ProviderType};

/// Build the provider selected by `config.provider`.
pub fn create_provider(config: ProviderConfig) -> LlmResult<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.provider {
        ProviderType::Anthropic => Arc::new(AnthropicProvider::new(config)?),
        ProviderType::OpenAI => Arc::new(OpenAIProvider::new(config)?),
    };
    tracing::debug!(
        provider = provider.name(),
        model = provider.model(),
        "LLM provider created"
    );
    Ok(provider)
}
