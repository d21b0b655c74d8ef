//! Finding Models
//!
//! Findings are what the analyzers produce and what an investigation starts from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of a finding.
///
/// The derived ordering follows declaration order, so sorting ascending puts
/// `Critical` first and `Info` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    /// 0 for critical through 4 for info.
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// Critical or high.
    pub fn is_urgent(&self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            "info" => Ok(Severity::Info),
            other => Err(format!("Unknown severity: {}", other)),
        }
    }
}

/// A single detected issue attributed to one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// `Kind/name` style identifier, e.g. `Pod/database-xyz`
    pub component: String,
    pub issue: String,
    pub severity: Severity,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub recommendation: String,
    /// Analyzer that produced the finding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl Finding {
    pub fn new(
        component: impl Into<String>,
        issue: impl Into<String>,
        severity: Severity,
        evidence: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            issue: issue.into(),
            severity,
            evidence: evidence.into(),
            recommendation: recommendation.into(),
            agent: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Prefix of the component before the first `/`, or `"Other"`.
    pub fn component_group(&self) -> &str {
        match self.component.split_once('/') {
            Some((kind, _)) if !kind.is_empty() => kind,
            _ => "Other",
        }
    }

    /// Kubernetes kind and object name, when the component has the `Kind/name` shape.
    ///
    /// Container suffixes (`Pod/web-1/nginx`) are dropped.
    pub fn kind_and_name(&self) -> Option<(&str, &str)> {
        parse_component(&self.component)
    }

    /// One-line summary used in accumulated findings and prompts.
    pub fn summary(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.severity.as_str().to_uppercase(),
            self.component,
            self.issue
        )
    }
}

/// Split a `Kind/name[/...]` component identifier.
pub fn parse_component(component: &str) -> Option<(&str, &str)> {
    let mut parts = component.splitn(3, '/');
    let kind = parts.next().filter(|k| !k.is_empty())?;
    let name = parts.next().filter(|n| !n.is_empty())?;
    Some((kind, name))
}

/// Sort findings most urgent first. Stable, so equal severities keep input order.
pub fn sort_by_severity(findings: &mut [Finding]) {
    findings.sort_by_key(|f| f.severity);
}

/// An observation/conclusion pair recorded by an analyzer while it works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub observation: String,
    pub conclusion: String,
}
