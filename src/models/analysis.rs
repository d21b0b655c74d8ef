//! Analysis Models
//!
//! Hypotheses, investigation plans, executable steps, step results and
//! conclusions. These are the clean shapes the rest of the crate works with;
//! the lenient wire formats the model answers in are normalized into them by
//! the investigation engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Clamp a model-reported confidence into [0, 1]. NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A candidate causal explanation for a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub description: String,
    pub confidence: f64,
    #[serde(default)]
    pub investigation_steps: Vec<String>,
    #[serde(default)]
    pub related_components: Vec<String>,
}

impl Hypothesis {
    pub fn new(description: impl Into<String>, confidence: f64) -> Self {
        Self {
            description: description.into(),
            confidence: clamp_confidence(confidence),
            investigation_steps: Vec::new(),
            related_components: Vec::new(),
        }
    }

    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.investigation_steps = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_related<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related_components = components.into_iter().map(Into::into).collect();
        self
    }

    /// Hypotheses are identified by description when rejected.
    pub fn same_as(&self, other: &Hypothesis) -> bool {
        self.description == other.description
    }
}

/// Coarse step category as the model names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Command,
    Analysis,
    Correlation,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Command => "command",
            StepType::Analysis => "analysis",
            StepType::Correlation => "correlation",
        }
    }
}

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "command" | "kubectl" | "query" => Ok(StepType::Command),
            "analysis" | "analyze" => Ok(StepType::Analysis),
            "correlation" | "correlate" => Ok(StepType::Correlation),
            other => Err(format!("Unknown step type: {}", other)),
        }
    }
}

/// What executing a step actually does. Decided once when a plan or an
/// evidence analysis is parsed, never re-derived at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    FetchLogs,
    DescribeResource,
    FetchEvents,
    RunCommands { commands: Vec<String> },
    Analyze,
    Correlate { components: Vec<String> },
}

impl StepAction {
    /// Map a model-described step onto a concrete action.
    ///
    /// Command steps are matched on their description (logs, describe/status,
    /// events, in that order); anything else runs the literal commands.
    pub fn classify(
        step_type: StepType,
        description: &str,
        commands: &[String],
        components: &[String],
    ) -> Self {
        match step_type {
            StepType::Analysis => StepAction::Analyze,
            StepType::Correlation => StepAction::Correlate {
                components: components.to_vec(),
            },
            StepType::Command => {
                let desc = description.to_lowercase();
                if desc.contains("logs") {
                    StepAction::FetchLogs
                } else if desc.contains("describe") || desc.contains("status") {
                    StepAction::DescribeResource
                } else if desc.contains("events") {
                    StepAction::FetchEvents
                } else {
                    StepAction::RunCommands {
                        commands: commands.to_vec(),
                    }
                }
            }
        }
    }

    pub fn step_type(&self) -> StepType {
        match self {
            StepAction::FetchLogs
            | StepAction::DescribeResource
            | StepAction::FetchEvents
            | StepAction::RunCommands { .. } => StepType::Command,
            StepAction::Analyze => StepType::Analysis,
            StepAction::Correlate { .. } => StepType::Correlation,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepAction::FetchLogs => "fetch logs",
            StepAction::DescribeResource => "describe resource",
            StepAction::FetchEvents => "fetch events",
            StepAction::RunCommands { .. } => "run commands",
            StepAction::Analyze => "analyze",
            StepAction::Correlate { .. } => "correlate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!("Unknown priority: {}", other)),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        })
    }
}

/// An executable investigation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextStep {
    pub description: String,
    pub action: StepAction,
    #[serde(default)]
    pub priority: Priority,
}

impl NextStep {
    pub fn new(description: impl Into<String>, action: StepAction, priority: Priority) -> Self {
        Self {
            description: description.into(),
            action,
            priority,
        }
    }

    pub fn step_type(&self) -> StepType {
        self.action.step_type()
    }
}

/// A displayed step of an investigation plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub description: String,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub expected_if_true: String,
    #[serde(default)]
    pub expected_if_false: String,
}

/// Terminal artifact of an investigation branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conclusion {
    pub text: String,
    pub confidence: f64,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub confirmed: bool,
}

impl Conclusion {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence: clamp_confidence(confidence),
            recommendations: Vec::new(),
            confirmed: false,
        }
    }
}

/// Plan for testing one hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationPlan {
    pub steps: Vec<Step>,
    #[serde(default)]
    pub evidence_needed: Vec<String>,
    #[serde(default)]
    pub conclusion_criteria: String,
    #[serde(default)]
    pub next_steps: Vec<NextStep>,
    /// Present only when the model already offered one with the plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<Conclusion>,
}

/// Verdict of an evidence analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Assessment {
    Supported,
    Refuted,
    Inconclusive,
    Error,
}

impl Assessment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Assessment::Supported => "supported",
            Assessment::Refuted => "refuted",
            Assessment::Inconclusive => "inconclusive",
            Assessment::Error => "error",
        }
    }
}

impl FromStr for Assessment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        // Models sometimes echo the option list ("supported/refuted") or add prose
        if lowered.starts_with("support") {
            Ok(Assessment::Supported)
        } else if lowered.starts_with("refut") {
            Ok(Assessment::Refuted)
        } else if lowered.starts_with("inconclusive") {
            Ok(Assessment::Inconclusive)
        } else if lowered.starts_with("error") {
            Ok(Assessment::Error)
        } else {
            Err(format!("Unknown assessment: {}", s))
        }
    }
}

/// Result of analyzing collected evidence against a hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceAnalysis {
    pub assessment: Assessment,
    pub confidence: f64,
    #[serde(default)]
    pub next_steps: Vec<NextStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<Conclusion>,
}

/// Outcome of executing one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: NextStep,
    pub executed_at: DateTime<Utc>,
    /// Evidence keyed by source (`logs`, `describe`, `events`, `<key>_error`, ...)
    #[serde(default)]
    pub evidence: BTreeMap<String, serde_json::Value>,
    pub analysis: EvidenceAnalysis,
}

impl StepResult {
    pub fn conclusion(&self) -> Option<&Conclusion> {
        self.analysis.conclusion.as_ref()
    }
}
