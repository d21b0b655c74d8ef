//! Investigation History Models
//!
//! The analysis history is an append-only ledger of state-machine transitions.
//! The session stage and selection fields next to it are a cache of where the
//! ledger says the user is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::analysis::{Conclusion, Hypothesis, InvestigationPlan, NextStep, StepResult};
use super::finding::Finding;

/// Stage of the interactive investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    #[default]
    ComponentSelection,
    HypothesisGeneration,
    Investigation,
    Conclusion,
}

impl SessionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStage::ComponentSelection => "component_selection",
            SessionStage::HypothesisGeneration => "hypothesis_generation",
            SessionStage::Investigation => "investigation",
            SessionStage::Conclusion => "conclusion",
        }
    }

    /// Human-readable label for display
    pub fn label(&self) -> &'static str {
        match self {
            SessionStage::ComponentSelection => "Select a component",
            SessionStage::HypothesisGeneration => "Choose a hypothesis",
            SessionStage::Investigation => "Investigate",
            SessionStage::Conclusion => "Conclusion",
        }
    }
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "component_selection" => Ok(SessionStage::ComponentSelection),
            "hypothesis_generation" => Ok(SessionStage::HypothesisGeneration),
            "investigation" => Ok(SessionStage::Investigation),
            "conclusion" => Ok(SessionStage::Conclusion),
            other => Err(format!("Unknown session stage: {}", other)),
        }
    }
}

/// Tag of a history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStage {
    Initial,
    ComponentSelection,
    HypothesisSelection,
    InvestigationStep,
    HypothesisRejection,
    Conclusion,
    Report,
}

impl HistoryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStage::Initial => "initial",
            HistoryStage::ComponentSelection => "component_selection",
            HistoryStage::HypothesisSelection => "hypothesis_selection",
            HistoryStage::InvestigationStep => "investigation_step",
            HistoryStage::HypothesisRejection => "hypothesis_rejection",
            HistoryStage::Conclusion => "conclusion",
            HistoryStage::Report => "report",
        }
    }

    /// Title used when rendering the history as prose
    pub fn title(&self) -> &'static str {
        match self {
            HistoryStage::Initial => "Initial Findings",
            HistoryStage::ComponentSelection => "Component Selection",
            HistoryStage::HypothesisSelection => "Hypothesis Selection",
            HistoryStage::InvestigationStep => "Investigation Step",
            HistoryStage::HypothesisRejection => "Hypothesis Rejection",
            HistoryStage::Conclusion => "Conclusion",
            HistoryStage::Report => "Report",
        }
    }
}

/// Payload of a history record, tagged by stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum HistoryData {
    Initial {
        findings: Vec<Finding>,
    },
    ComponentSelection {
        component: String,
        finding: Finding,
        hypotheses: Vec<Hypothesis>,
    },
    HypothesisSelection {
        component: String,
        finding: Finding,
        hypothesis: Hypothesis,
        plan: InvestigationPlan,
    },
    InvestigationStep {
        component: String,
        finding: Finding,
        hypothesis: Hypothesis,
        step: NextStep,
        result: StepResult,
    },
    HypothesisRejection {
        component: String,
        finding: Finding,
        rejected: Hypothesis,
        /// Candidates still open after this rejection
        remaining: Vec<Hypothesis>,
    },
    Conclusion {
        component: String,
        finding: Finding,
        hypothesis: Hypothesis,
        conclusion: Conclusion,
    },
    Report {
        report: String,
    },
}

impl HistoryData {
    pub fn stage(&self) -> HistoryStage {
        match self {
            HistoryData::Initial { .. } => HistoryStage::Initial,
            HistoryData::ComponentSelection { .. } => HistoryStage::ComponentSelection,
            HistoryData::HypothesisSelection { .. } => HistoryStage::HypothesisSelection,
            HistoryData::InvestigationStep { .. } => HistoryStage::InvestigationStep,
            HistoryData::HypothesisRejection { .. } => HistoryStage::HypothesisRejection,
            HistoryData::Conclusion { .. } => HistoryStage::Conclusion,
            HistoryData::Report { .. } => HistoryStage::Report,
        }
    }
}

/// One record of the analysis history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub data: HistoryData,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn now(data: HistoryData) -> Self {
        Self {
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn stage(&self) -> HistoryStage {
        self.data.stage()
    }
}

/// Breadcrumb kind for the diagnostic path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Hypothesis,
    InvestigationStep,
    Conclusion,
    Rejection,
}

/// Presentational breadcrumb. Never consulted for control flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticStep {
    pub kind: DiagnosticKind,
    pub description: String,
}

impl DiagnosticStep {
    pub fn new(kind: DiagnosticKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }
}

/// Persisted state of the interactive investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionState {
    #[serde(default)]
    pub stage: SessionStage,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_hypothesis: Option<Hypothesis>,
    #[serde(default)]
    pub diagnostic_path: Vec<DiagnosticStep>,
}

impl SessionState {
    /// Append a record. The only way history grows.
    pub fn record(&mut self, data: HistoryData) {
        self.history.push(HistoryEntry::now(data));
    }

    /// Most recent entry matching `pred`, scanning backward.
    pub fn latest<F>(&self, pred: F) -> Option<(usize, &HistoryEntry)>
    where
        F: Fn(&HistoryEntry) -> bool,
    {
        self.history.iter().enumerate().rev().find(|(_, e)| pred(e))
    }

    /// First entry at or after `from` matching `pred`, scanning forward.
    pub fn first_from<F>(&self, from: usize, pred: F) -> Option<(usize, &HistoryEntry)>
    where
        F: Fn(&HistoryEntry) -> bool,
    {
        self.history
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, e)| pred(e))
    }

    pub fn latest_of(&self, stages: &[HistoryStage]) -> Option<(usize, &HistoryEntry)> {
        self.latest(|e| stages.contains(&e.stage()))
    }

    /// Findings of the most recent `initial` record.
    pub fn initial_findings(&self) -> &[Finding] {
        match self.latest_of(&[HistoryStage::Initial]) {
            Some((_, HistoryEntry { data: HistoryData::Initial { findings }, .. })) => findings,
            _ => &[],
        }
    }
}
