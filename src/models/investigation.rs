//! Investigation Models
//!
//! The investigation is the persisted unit of work. Everything a user does in
//! one diagnostic session ends up in one of these records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::analysis::Priority;
use super::history::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    #[default]
    InProgress,
    Completed,
}

impl InvestigationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestigationStatus::InProgress => "in_progress",
            InvestigationStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for InvestigationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: ConversationRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn now(role: ConversationRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Timestamped evidence or agent-findings payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedData {
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl TimestampedData {
    pub fn now(data: serde_json::Value) -> Self {
        Self {
            data,
            timestamp: Utc::now(),
        }
    }
}

/// What accepting a suggestion would do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuggestionAction {
    RunAgent { agent: String },
    CheckEvents { field_selector: Option<String> },
    CheckLogs { pod: String },
    Investigate { component: String },
}

/// A suggested next action shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    pub action: SuggestionAction,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub reasoning: String,
}

/// Top-level persisted investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investigation {
    pub id: String,
    pub title: String,
    pub namespace: String,
    #[serde(default)]
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub status: InvestigationStatus,
    #[serde(default)]
    pub conversation: Vec<ConversationEntry>,
    #[serde(default)]
    pub evidence: BTreeMap<String, Vec<TimestampedData>>,
    #[serde(default)]
    pub agent_findings: BTreeMap<String, TimestampedData>,
    #[serde(default)]
    pub next_actions: Vec<Suggestion>,
    #[serde(default)]
    pub accumulated_findings: Vec<String>,
    #[serde(default)]
    pub session: SessionState,
}

impl Investigation {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        namespace: impl Into<String>,
        context: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            namespace: namespace.into(),
            context,
            created_at: now,
            updated_at: now,
            summary: String::new(),
            status: InvestigationStatus::InProgress,
            conversation: Vec::new(),
            evidence: BTreeMap::new(),
            agent_findings: BTreeMap::new(),
            next_actions: Vec::new(),
            accumulated_findings: Vec::new(),
            session: SessionState::default(),
        }
    }

    pub fn summary_row(&self) -> InvestigationSummary {
        InvestigationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            namespace: self.namespace.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            summary: self.summary.clone(),
        }
    }
}

/// Partial update merged into an investigation. `None` fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvestigationUpdate {
    pub title: Option<String>,
    pub namespace: Option<String>,
    pub context: Option<String>,
    pub summary: Option<String>,
    pub status: Option<InvestigationStatus>,
}

impl InvestigationUpdate {
    pub fn apply(self, investigation: &mut Investigation) {
        if let Some(title) = self.title {
            investigation.title = title;
        }
        if let Some(namespace) = self.namespace {
            investigation.namespace = namespace;
        }
        if let Some(context) = self.context {
            investigation.context = Some(context);
        }
        if let Some(summary) = self.summary {
            investigation.summary = summary;
        }
        if let Some(status) = self.status {
            investigation.status = status;
        }
    }
}

/// Listing metadata for an investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationSummary {
    pub id: String,
    pub title: String,
    pub namespace: String,
    pub status: InvestigationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub summary: String,
}
