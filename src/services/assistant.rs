//! Conversational Assistant
//!
//! Free-form questions about an investigation and suggested next actions.
//! Both keep the conversation and the suggestion list in the investigation
//! record.

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use k8s_rca_core::{parse_object_or_else, truncate_with_marker};

use crate::models::{
    sort_by_severity, ConversationRole, Finding, Investigation, Priority, Suggestion,
    SuggestionAction,
};
use crate::services::investigation::RcaEngine;
use crate::storage::InvestigationStore;
use crate::utils::error::AppResult;

/// Conversation entries included as context
const HISTORY_WINDOW: usize = 10;
/// Findings listed in the suggestion prompt
const SUGGESTION_FINDINGS: usize = 15;
const MAX_SUGGESTIONS: usize = 5;
const SUMMARY_MAX_CHARS: usize = 1500;

pub fn build_assistant_system_prompt(namespace: &str) -> String {
    format!(
        r#"You are an AI assistant specialized in Kubernetes troubleshooting and root cause analysis.
The user is investigating their cluster, specifically the namespace '{}'.

When you answer:
1. Ground every statement in the investigation context you are given
2. Use exact counts and error states, never vague quantifiers like "several" or "some"
3. Name the specific resources involved
4. End with concrete next steps the user can take

If the user asks something general like "what's wrong", identify the actual issues from the
context instead of asking for clarification."#,
        namespace
    )
}

pub fn build_assistant_user_message(context: &str, query: &str) -> String {
    format!(
        "## Investigation Context\n{}\n\n## Question\n{}",
        context, query
    )
}

pub fn build_suggestions_system_prompt() -> String {
    r#"You are a Kubernetes Root Cause Analysis Expert.
Suggest the most useful next actions for the findings you are given, most useful first.

Respond with ONLY a JSON object of this shape:
{
  "suggestions": [
    {
      "text": "Short description shown to the user",
      "action": {"type": "run_agent", "agent": "logs"},
      "priority": "high",
      "reasoning": "Why this helps"
    }
  ]
}

Action types:
- {"type": "run_agent", "agent": "metrics|logs|events|topology|resources|comprehensive"}
- {"type": "check_events", "field_selector": "involvedObject.name=pod-name"}
- {"type": "check_logs", "pod": "pod-name"}
- {"type": "investigate", "component": "Kind/name"}"#
        .to_string()
}

pub fn build_suggestions_user_message(namespace: &str, findings: &[Finding]) -> String {
    let mut sorted = findings.to_vec();
    sort_by_severity(&mut sorted);

    let listed = if sorted.is_empty() {
        "No findings yet.".to_string()
    } else {
        sorted
            .iter()
            .take(SUGGESTION_FINDINGS)
            .map(|f| format!("- {}", f.summary()))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "## Findings in namespace {}\n{}\n\nSuggest up to {} next actions.",
        namespace, listed, MAX_SUGGESTIONS
    )
}

/// Run the full analysis, the resources analyzer, and look at non-Normal events
pub fn default_suggestions() -> Vec<Suggestion> {
    vec![
        Suggestion {
            text: "Run a comprehensive analysis".to_string(),
            action: SuggestionAction::RunAgent {
                agent: "comprehensive".to_string(),
            },
            priority: Priority::High,
            reasoning: "Covers every analyzer and correlates their findings".to_string(),
        },
        Suggestion {
            text: "Check resource health".to_string(),
            action: SuggestionAction::RunAgent {
                agent: "resources".to_string(),
            },
            priority: Priority::Medium,
            reasoning: "Pod, deployment and volume status are the most common culprits"
                .to_string(),
        },
        Suggestion {
            text: "View recent warning events".to_string(),
            action: SuggestionAction::CheckEvents {
                field_selector: Some("type!=Normal".to_string()),
            },
            priority: Priority::Medium,
            reasoning: "Warning events usually point at the failing resource".to_string(),
        },
    ]
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SuggestionWire {
    text: String,
    action: Value,
    priority: Option<String>,
    reasoning: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SuggestionsWire {
    suggestions: Vec<SuggestionWire>,
}

fn field<'a>(action: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| action.get(*name).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

/// Map a model-described action; unknown types are dropped
fn action_from(action: &Value) -> Option<SuggestionAction> {
    match field(action, &["type"])? {
        "run_agent" => Some(SuggestionAction::RunAgent {
            agent: field(action, &["agent", "agent_type"])?.to_string(),
        }),
        "check_events" => Some(SuggestionAction::CheckEvents {
            field_selector: field(action, &["field_selector"]).map(str::to_string),
        }),
        "check_logs" => Some(SuggestionAction::CheckLogs {
            pod: field(action, &["pod", "pod_name"])?.to_string(),
        }),
        "investigate" => Some(SuggestionAction::Investigate {
            component: field(action, &["component"])?.to_string(),
        }),
        "check_resource" => {
            let kind = field(action, &["resource_type"])?;
            let name = field(action, &["resource_name"])?;
            Some(SuggestionAction::Investigate {
                component: format!("{}/{}", kind, name),
            })
        }
        _ => None,
    }
}

impl SuggestionWire {
    fn into_suggestion(self) -> Option<Suggestion> {
        if self.text.trim().is_empty() {
            return None;
        }
        Some(Suggestion {
            action: action_from(&self.action)?,
            priority: self
                .priority
                .as_deref()
                .and_then(|p| p.parse().ok())
                .unwrap_or_default(),
            text: self.text,
            reasoning: self.reasoning,
        })
    }
}

/// Context block for a question: what the investigation knows so far
pub fn build_context(investigation: &Investigation) -> String {
    let mut out = format!(
        "Title: {}\nNamespace: {}\nStage: {}\n",
        investigation.title,
        investigation.namespace,
        investigation.session.stage.as_str()
    );

    if !investigation.summary.trim().is_empty() {
        out.push_str(&format!(
            "\n### Summary\n{}\n",
            truncate_with_marker(&investigation.summary, SUMMARY_MAX_CHARS)
        ));
    }

    if !investigation.accumulated_findings.is_empty() {
        out.push_str("\n### Findings so far\n");
        for finding in &investigation.accumulated_findings {
            out.push_str(&format!("- {}\n", finding));
        }
    }

    let recent = investigation
        .conversation
        .len()
        .saturating_sub(HISTORY_WINDOW);
    if recent < investigation.conversation.len() {
        out.push_str("\n### Recent conversation\n");
        for entry in &investigation.conversation[recent..] {
            let role = match entry.role {
                ConversationRole::User => "User",
                ConversationRole::Assistant => "Assistant",
                ConversationRole::System => "System",
            };
            out.push_str(&format!("{}: {}\n", role, entry.content));
        }
    }

    out
}

pub struct Assistant {
    store: InvestigationStore,
    engine: RcaEngine,
}

impl Assistant {
    pub fn new(store: InvestigationStore, engine: RcaEngine) -> Self {
        Self { store, engine }
    }

    /// Answer a question about an investigation. Both sides of the exchange
    /// are appended to its conversation; a model failure becomes an apology.
    pub async fn ask(&self, investigation_id: &str, query: &str) -> AppResult<String> {
        let investigation = self.store.require(investigation_id)?;
        self.store
            .add_conversation_entry(investigation_id, ConversationRole::User, query)?;

        let system = build_assistant_system_prompt(&investigation.namespace);
        let user = build_assistant_user_message(&build_context(&investigation), query);

        let reply = match self.engine.complete("assistant_query", &system, &user, false).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => "I could not produce an answer to that question. Try rephrasing it.".to_string(),
            Err(e) => {
                warn!(investigation_id, error = %e, "Assistant query failed");
                format!("I'm sorry, I couldn't answer that right now: {}", e)
            }
        };

        self.store
            .add_conversation_entry(investigation_id, ConversationRole::Assistant, &reply)?;
        info!(investigation_id, chars = reply.len(), "Assistant replied");
        Ok(reply)
    }

    /// Ask for next actions and store them on the investigation. Falls back to
    /// the default suggestions when the model gives nothing usable.
    pub async fn suggest_next_actions(
        &self,
        investigation_id: &str,
        findings: &[Finding],
    ) -> AppResult<Vec<Suggestion>> {
        let investigation = self.store.require(investigation_id)?;
        let system = build_suggestions_system_prompt();
        let user = build_suggestions_user_message(&investigation.namespace, findings);

        let suggestions: Vec<Suggestion> =
            match self.engine.complete("suggest_next_actions", &system, &user, true).await {
                Ok(text) => {
                    let wire: SuggestionsWire = parse_object_or_else(&text, |err| {
                        warn!(investigation_id, error = %err, "Unparseable suggestions");
                        SuggestionsWire::default()
                    });
                    wire.suggestions
                        .into_iter()
                        .filter_map(SuggestionWire::into_suggestion)
                        .take(MAX_SUGGESTIONS)
                        .collect()
                }
                Err(e) => {
                    warn!(investigation_id, error = %e, "Suggestion request failed");
                    Vec::new()
                }
            };

        let suggestions = if suggestions.is_empty() {
            default_suggestions()
        } else {
            suggestions
        };

        self.store
            .update_next_actions(investigation_id, suggestions.clone())?;
        Ok(suggestions)
    }
}
