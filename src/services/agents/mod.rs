//! Analyzers
//!
//! Rule-based analyzers, one per signal type. Each reads the cluster through
//! [`ClusterClient`], never fails as a whole, and reports what it found
//! together with the reasoning that led there.
//!
//! ## Module Organization
//!
//! - `resources` - pod, deployment and workload status
//! - `events` - warning events, scheduling, volumes, nodes, control plane
//! - `logs` - error-pattern scans over container logs
//! - `metrics` - usage against limits and capacity, HPAs, resource configuration
//! - `topology` - services, endpoints, network policies, ingresses

pub mod events;
pub mod logs;
pub mod metrics;
pub mod resources;
pub mod topology;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::models::{Finding, ReasoningStep, Severity};
use crate::services::cluster::{ClusterClient, ClusterError};

pub use events::EventsAnalyzer;
pub use logs::LogsAnalyzer;
pub use metrics::MetricsAnalyzer;
pub use resources::ResourcesAnalyzer;
pub use topology::TopologyAnalyzer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Resources,
    Events,
    Logs,
    Metrics,
    Topology,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Resources,
        AgentKind::Events,
        AgentKind::Logs,
        AgentKind::Metrics,
        AgentKind::Topology,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Resources => "resources",
            AgentKind::Events => "events",
            AgentKind::Logs => "logs",
            AgentKind::Metrics => "metrics",
            AgentKind::Topology => "topology",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "resources" | "resource" => Ok(AgentKind::Resources),
            "events" | "event" => Ok(AgentKind::Events),
            "logs" | "log" => Ok(AgentKind::Logs),
            "metrics" | "metric" => Ok(AgentKind::Metrics),
            "topology" => Ok(AgentKind::Topology),
            other => Err(format!("Unknown agent: {}", other)),
        }
    }
}

/// Output of one analyzer run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent: AgentKind,
    pub findings: Vec<Finding>,
    pub reasoning_steps: Vec<ReasoningStep>,
    /// Collaborator failures that cut the analysis short
    #[serde(default)]
    pub errors: Vec<String>,
}

impl AgentReport {
    pub fn new(agent: AgentKind) -> Self {
        Self {
            agent,
            findings: Vec::new(),
            reasoning_steps: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn add_finding(
        &mut self,
        component: impl Into<String>,
        issue: impl Into<String>,
        severity: Severity,
        evidence: impl Into<String>,
        recommendation: impl Into<String>,
    ) {
        self.findings.push(
            Finding::new(component, issue, severity, evidence, recommendation)
                .with_agent(self.agent.as_str()),
        );
    }

    pub fn reason(&mut self, observation: impl Into<String>, conclusion: impl Into<String>) {
        self.reasoning_steps.push(ReasoningStep {
            observation: observation.into(),
            conclusion: conclusion.into(),
        });
    }

    /// Record a failed cluster read and carry on with whatever is left.
    pub fn record_error(&mut self, what: &str, err: &ClusterError) {
        warn!(agent = self.agent.as_str(), what, error = %err, "Cluster read failed");
        self.errors.push(format!("{}: {}", what, err));
        self.reason(
            format!("Error while fetching {}: {}", what, err),
            format!("Unable to analyze {}", what),
        );
    }

    /// Unwrap a cluster read, recording the failure and substituting empty data.
    pub fn collect<T: Default>(&mut self, what: &str, result: Result<T, ClusterError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => {
                self.record_error(what, &err);
                T::default()
            }
        }
    }
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn analyze(&self, cluster: &dyn ClusterClient, namespace: &str) -> AgentReport;
}

/// Build the analyzer for one kind
pub fn analyzer_for(kind: AgentKind, log_tail_lines: u32) -> Arc<dyn Analyzer> {
    match kind {
        AgentKind::Resources => Arc::new(ResourcesAnalyzer),
        AgentKind::Events => Arc::new(EventsAnalyzer),
        AgentKind::Logs => Arc::new(LogsAnalyzer::new(log_tail_lines)),
        AgentKind::Metrics => Arc::new(MetricsAnalyzer),
        AgentKind::Topology => Arc::new(TopologyAnalyzer),
    }
}

// Helpers over raw Kubernetes JSON shared by the analyzers.

pub(crate) fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

pub(crate) fn i64_at(value: &Value, pointer: &str) -> i64 {
    value.pointer(pointer).and_then(Value::as_i64).unwrap_or(0)
}

pub(crate) fn array_at<'a>(value: &'a Value, pointer: &str) -> &'a [Value] {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Container and init container statuses of a pod
pub(crate) fn container_statuses(pod: &Value) -> impl Iterator<Item = &Value> {
    array_at(pod, "/status/containerStatuses")
        .iter()
        .chain(array_at(pod, "/status/initContainerStatuses").iter())
}

/// Condition `status` of a pod or node condition type, if reported
pub(crate) fn condition_status<'a>(resource: &'a Value, condition_type: &str) -> Option<&'a str> {
    array_at(resource, "/status/conditions")
        .iter()
        .find(|c| str_at(c, "/type") == condition_type)
        .map(|c| str_at(c, "/status"))
}

/// Every selector pair is present in `labels`. An empty selector matches nothing.
pub(crate) fn selector_matches(selector: &[(&str, &str)], labels: &[(&str, &str)]) -> bool {
    !selector.is_empty() && selector.iter().all(|pair| labels.contains(pair))
}
