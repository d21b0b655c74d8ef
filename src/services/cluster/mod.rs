//! Cluster Access
//!
//! Read-only query surface over a Kubernetes cluster. Analyzers and the
//! investigation engine only ever see the [`ClusterClient`] trait; the kubectl
//! implementation lives in [`kubectl`].
//!
//! Contract shared by every implementation:
//! - nothing here mutates the cluster
//! - "nothing found" is an empty collection, never an error
//! - connectivity problems are errors, and callers degrade instead of failing

pub mod kubectl;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use kubectl::{ensure_read_only, split_command_line, KubectlClient, READ_ONLY_VERBS};

/// Errors raised by a cluster client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    /// kubectl missing or the API server unreachable
    #[error("Cluster unavailable: {0}")]
    Unavailable(String),

    #[error("Cluster call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// A command that could modify the cluster was refused
    #[error("Refused non read-only command: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to parse cluster output: {0}")]
    Parse(String),
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Read-only Kubernetes queries. Resources are returned as the JSON objects
/// the API server serves.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_pods(&self, namespace: &str) -> ClusterResult<Vec<Value>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> ClusterResult<Option<Value>>;

    async fn get_services(&self, namespace: &str) -> ClusterResult<Vec<Value>>;

    async fn get_deployments(&self, namespace: &str) -> ClusterResult<Vec<Value>>;

    /// Events, optionally narrowed with a field selector such as
    /// `involvedObject.name=api-1` or `type!=Normal`
    async fn get_events(
        &self,
        namespace: &str,
        field_selector: Option<&str>,
    ) -> ClusterResult<Vec<Value>>;

    async fn get_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: u32,
    ) -> ClusterResult<String>;

    /// `metrics.k8s.io` pod metrics; empty when no metrics server is installed
    async fn get_pod_metrics(&self, namespace: &str) -> ClusterResult<Vec<Value>>;

    async fn get_node_metrics(&self) -> ClusterResult<Vec<Value>>;

    async fn get_network_policies(&self, namespace: &str) -> ClusterResult<Vec<Value>>;

    async fn get_endpoints(&self, namespace: &str) -> ClusterResult<Vec<Value>>;

    async fn get_hpas(&self, namespace: &str) -> ClusterResult<Vec<Value>>;

    async fn get_nodes(&self) -> ClusterResult<Vec<Value>>;

    async fn get_ingresses(&self, namespace: &str) -> ClusterResult<Vec<Value>>;

    async fn get_pvcs(&self, namespace: &str) -> ClusterResult<Vec<Value>>;

    /// Human-readable `kubectl describe` output
    async fn describe(&self, kind: &str, name: &str, namespace: &str) -> ClusterResult<String>;

    /// Run an arbitrary kubectl invocation after the read-only check.
    /// `args` excludes the `kubectl` binary itself.
    async fn run_read_only(&self, args: &[String]) -> ClusterResult<String>;
}

/// `metadata.name` of a resource, or an empty string
pub fn resource_name(resource: &Value) -> &str {
    resource
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// `metadata.labels` as string pairs
pub fn resource_labels(resource: &Value) -> Vec<(&str, &str)> {
    string_map(resource.pointer("/metadata/labels"))
}

/// Iterate a JSON object of string values, skipping non-strings
pub fn string_map(value: Option<&Value>) -> Vec<(&str, &str)> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.as_str(), v)))
                .collect()
        })
        .unwrap_or_default()
}
