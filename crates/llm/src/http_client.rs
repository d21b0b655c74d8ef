//! HTTP Client Factory
//!
//! Builds the reqwest client every provider shares its settings with.

use std::time::Duration;

use crate::types::{LlmError, LlmResult};

/// Options applied to a provider's HTTP client.
#[derive(Debug, Clone, Default)]
pub struct HttpClientOptions {
    /// Proxy URL (`http://`, `https://` or `socks5://`). `None` disables proxies,
    /// ignoring environment variables.
    pub proxy_url: Option<String>,
    /// Whole-request timeout enforced by reqwest.
    pub request_timeout: Option<Duration>,
}

/// Build a `reqwest::Client` from the given options.
pub fn build_http_client(options: &HttpClientOptions) -> LlmResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder();

    match &options.proxy_url {
        Some(url) => {
            let proxy = reqwest::Proxy::all(url).map_err(|e| LlmError::InvalidRequest {
                message: format!("Invalid proxy URL {}: {}", url, e),
            })?;
            builder = builder.proxy(proxy);
        }
        None => {
            builder = builder.no_proxy();
        }
    }

    if let Some(timeout) = options.request_timeout {
        builder = builder.timeout(timeout);
    }

    builder.build().map_err(|e| LlmError::ProviderUnavailable {
        message: format!("Failed to build HTTP client: {}", e),
    })
}
