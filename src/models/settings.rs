//! Settings Models
//!
//! Application configuration stored in config.json.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use k8s_rca_llm::{ProviderConfig, ProviderType};

/// LLM section of the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub provider: ProviderType,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_llm_timeout() -> u64 {
    45
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderType::Anthropic,
            model: ProviderType::Anthropic.default_model().to_string(),
            base_url: None,
            proxy_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmSettings {
    /// Provider configuration with the API key taken from the provider's env var.
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            provider: self.provider,
            api_key: std::env::var(self.provider.api_key_env())
                .ok()
                .filter(|k| !k.trim().is_empty()),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            proxy_url: self.proxy_url.clone(),
            options: Default::default(),
        }
    }
}

/// Cluster access section of the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
    /// kubeconfig context; the current context when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default = "default_cluster_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: u32,
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_cluster_timeout() -> u64 {
    30
}

fn default_log_tail_lines() -> u32 {
    100
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            context: None,
            timeout_secs: default_cluster_timeout(),
            log_tail_lines: default_log_tail_lines(),
        }
    }
}

/// Where investigations and audit trails are written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Data directory; `~/.k8s-rca/data` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Write the JSONL prompt log
    #[serde(default = "default_true")]
    pub prompt_log: bool,
    /// Write the evidence audit trail
    #[serde(default = "default_true")]
    pub evidence_log: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            prompt_log: true,
            evidence_log: true,
        }
    }
}

/// Application configuration stored in config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub cluster: ClusterSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default = "default_namespace")]
    pub default_namespace: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            cluster: ClusterSettings::default(),
            storage: StorageSettings::default(),
            default_namespace: default_namespace(),
        }
    }
}

impl AppConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.llm.model.trim().is_empty() {
            return Err("llm.model must not be empty".to_string());
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(format!(
                "Invalid llm.temperature: {}. Must be between 0.0 and 2.0",
                self.llm.temperature
            ));
        }

        if self.llm.max_tokens == 0 {
            return Err("llm.max_tokens must be greater than 0".to_string());
        }

        if self.llm.timeout_secs == 0 || self.cluster.timeout_secs == 0 {
            return Err("timeouts must be at least 1 second".to_string());
        }

        if self.cluster.kubectl.trim().is_empty() {
            return Err("cluster.kubectl must not be empty".to_string());
        }

        if self.default_namespace.trim().is_empty() {
            return Err("default_namespace must not be empty".to_string());
        }

        Ok(())
    }
}
