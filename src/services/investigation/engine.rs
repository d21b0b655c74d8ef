//! Investigation Engine
//!
//! The model-backed operations of an investigation: hypotheses, plans, step
//! execution with evidence analysis, component evidence bundles and the final
//! report. Every operation returns a usable value whatever the model or the
//! cluster does; failures are logged and replaced with fallbacks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use k8s_rca_core::{parse_object_or_else, parse_or_else, truncate_with_marker};
use k8s_rca_llm::{LlmError, LlmProvider, LlmRequestOptions, LlmResult, Message};

use super::prompts::{
    build_evidence_system_prompt, build_evidence_user_message, build_hypotheses_system_prompt,
    build_hypotheses_user_message, build_plan_system_prompt, build_plan_user_message,
    build_report_system_prompt, build_report_user_message,
};
use crate::models::{
    clamp_confidence, parse_component, AppConfig, Assessment, Conclusion, EvidenceAnalysis,
    Finding, HistoryData, HistoryEntry, Hypothesis, InvestigationPlan, NextStep, Priority, Step,
    StepAction, StepResult, StepType,
};
use crate::services::agents::{condition_status, str_at};
use crate::services::cluster::{resource_name, split_command_line, ClusterClient, ClusterResult};
use crate::storage::{EvidenceLogger, PromptLogger};

/// Longest evidence string sent to the model
pub const EVIDENCE_MAX_CHARS: usize = 2000;

/// Tunables for model and cluster calls
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub llm_timeout: Duration,
    pub temperature: f32,
    pub log_tail_lines: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            llm_timeout: Duration::from_secs(45),
            temperature: 0.2,
            log_tail_lines: 100,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
            temperature: config.llm.temperature,
            log_tail_lines: config.cluster.log_tail_lines,
        }
    }
}

// Wire shapes the model answers in. Every field is optional; normalization
// into the model types happens below.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HypothesisWire {
    description: String,
    confidence: Value,
    investigation_steps: Vec<Value>,
    related_components: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HypothesesWire {
    Wrapped { hypotheses: Vec<HypothesisWire> },
    List(Vec<HypothesisWire>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StepWire {
    description: String,
    commands: Value,
    expected_if_true: String,
    expected_if_false: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NextStepWire {
    description: String,
    #[serde(rename = "type")]
    step_type: Option<String>,
    priority: Option<String>,
    commands: Value,
    components: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConclusionWire {
    #[serde(alias = "conclusion", alias = "description")]
    text: String,
    confidence: Value,
    recommendations: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlanWire {
    steps: Vec<StepWire>,
    evidence_needed: Vec<Value>,
    conclusion_criteria: Value,
    next_steps: Vec<Value>,
    conclusion: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnalysisWire {
    assessment: Value,
    confidence: Value,
    next_steps: Vec<Value>,
    conclusion: Value,
}

/// Number or numeric string, clamped; `default` otherwise
fn confidence_of(value: &Value, default: f64) -> f64 {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok().map(|v| {
            if s.trim().ends_with('%') {
                v / 100.0
            } else {
                v
            }
        }),
        _ => None,
    };
    clamp_confidence(raw.unwrap_or(default))
}

/// Strings, or the `description`/`text` of objects, in order
fn text_list(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get("description")
                .or_else(|| map.get("text"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .filter(|s| !s.trim().is_empty())
        .collect()
}

/// A command list given as an array or a single string
fn command_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => vec![s.clone()],
        Value::Array(items) => text_list(items),
        _ => Vec::new(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl HypothesisWire {
    fn into_hypothesis(self) -> Option<Hypothesis> {
        if self.description.trim().is_empty() {
            return None;
        }
        Some(
            Hypothesis::new(self.description, confidence_of(&self.confidence, 0.5))
                .with_steps(text_list(&self.investigation_steps))
                .with_related(text_list(&self.related_components)),
        )
    }
}

impl NextStepWire {
    fn into_next_step(self, fallback_components: &[String]) -> Option<NextStep> {
        if self.description.trim().is_empty() {
            return None;
        }
        // Models sometimes echo the option list ("command/analysis/correlation")
        let step_type = self
            .step_type
            .as_deref()
            .and_then(|t| t.split(['/', '|']).next())
            .and_then(|t| t.parse::<StepType>().ok())
            .unwrap_or(StepType::Command);
        let priority = self
            .priority
            .as_deref()
            .and_then(|p| p.split(['/', '|']).next())
            .and_then(|p| p.parse::<Priority>().ok())
            .unwrap_or_default();
        let mut components = text_list(&self.components);
        if components.is_empty() {
            components = fallback_components.to_vec();
        }
        let action = StepAction::classify(
            step_type,
            &self.description,
            &command_list(&self.commands),
            &components,
        );
        Some(NextStep::new(self.description, action, priority))
    }
}

impl ConclusionWire {
    fn into_conclusion(self, default_confidence: f64) -> Option<Conclusion> {
        if self.text.trim().is_empty() {
            return None;
        }
        let mut conclusion =
            Conclusion::new(self.text, confidence_of(&self.confidence, default_confidence));
        conclusion.recommendations = text_list(&self.recommendations);
        Some(conclusion)
    }
}

/// A conclusion given as an object or as bare text
fn conclusion_from(value: Value, default_confidence: f64) -> Option<Conclusion> {
    match value {
        Value::String(text) => ConclusionWire {
            text,
            ..Default::default()
        }
        .into_conclusion(default_confidence),
        Value::Object(_) => serde_json::from_value::<ConclusionWire>(value)
            .ok()?
            .into_conclusion(default_confidence),
        _ => None,
    }
}

/// Next steps given as objects or bare descriptions. Unusable entries are dropped.
fn next_steps_from(values: Vec<Value>, fallback_components: &[String]) -> Vec<NextStep> {
    values
        .into_iter()
        .filter_map(|value| match value {
            Value::String(description) => Some(NextStepWire {
                description,
                ..Default::default()
            }),
            Value::Object(_) => serde_json::from_value::<NextStepWire>(value).ok(),
            _ => None,
        })
        .filter_map(|wire| wire.into_next_step(fallback_components))
        .collect()
}

/// Fallback for unparseable hypotheses
pub fn unknown_issue_hypotheses(component: &str) -> Vec<Hypothesis> {
    vec![Hypothesis::new(format!("Unknown issue with {}", component), 0.5)
        .with_steps([
            format!("Check logs for {}", component),
            format!("Verify configuration of {}", component),
            "Check related resources and dependencies".to_string(),
        ])]
}

/// Fallback when the model could not be reached
pub fn llm_error_hypotheses(component: &str, err: &LlmError) -> Vec<Hypothesis> {
    vec![Hypothesis::new(
        format!("Error occurred while analyzing {}: {}", component, err),
        0.3,
    )
    .with_steps([
        "Check system connectivity",
        "Verify LLM API access",
        "Try again with more specific information",
    ])]
}

fn fallback_steps(component: &str, namespace: &str) -> Vec<Step> {
    let (kind, name) = parse_component(component).unwrap_or(("pod", component));
    vec![
        Step {
            description: format!("Check logs for {}", component),
            commands: vec![format!("kubectl logs {} -n {}", name, namespace)],
            expected_if_true: "Errors or warnings consistent with the hypothesis".to_string(),
            expected_if_false: "No errors related to the hypothesis".to_string(),
        },
        Step {
            description: "Examine resource status".to_string(),
            commands: vec![format!(
                "kubectl describe {} {} -n {}",
                kind.to_lowercase(),
                name,
                namespace
            )],
            expected_if_true: "Resource status or events showing the suspected problem"
                .to_string(),
            expected_if_false: "Resource healthy with no related events".to_string(),
        },
    ]
}

/// The default two-step plan
pub fn fallback_plan(component: &str, namespace: &str) -> InvestigationPlan {
    InvestigationPlan {
        steps: fallback_steps(component, namespace),
        evidence_needed: vec![
            "Logs".to_string(),
            "Resource status".to_string(),
            "Events".to_string(),
        ],
        conclusion_criteria: "Strong correlation between observed symptoms and hypothesis predictions"
            .to_string(),
        next_steps: vec![
            NextStep::new(
                format!("Check logs for {}", component),
                StepAction::FetchLogs,
                Priority::High,
            ),
            NextStep::new(
                "Examine resource status",
                StepAction::DescribeResource,
                Priority::High,
            ),
            NextStep::new(
                "Gather more specific information if results are inconclusive",
                StepAction::Analyze,
                Priority::Medium,
            ),
        ],
        conclusion: None,
    }
}

fn inconclusive_analysis() -> EvidenceAnalysis {
    EvidenceAnalysis {
        assessment: Assessment::Inconclusive,
        confidence: 0.3,
        next_steps: vec![NextStep::new(
            "Gather more evidence about the issue",
            StepAction::DescribeResource,
            Priority::High,
        )],
        conclusion: None,
    }
}

fn error_analysis() -> EvidenceAnalysis {
    EvidenceAnalysis {
        assessment: Assessment::Error,
        confidence: 0.0,
        next_steps: vec![NextStep::new(
            "Try a different investigation approach",
            StepAction::Analyze,
            Priority::High,
        )],
        conclusion: None,
    }
}

/// Render collected evidence for the analysis prompt. Strings are truncated,
/// lists numbered and maps printed as `key: value` lines.
pub fn render_evidence(evidence: &BTreeMap<String, Value>, max_chars: usize) -> String {
    let mut out = String::new();
    for (key, value) in evidence {
        out.push_str(&format!("\n### {}\n", title_case(key)));
        match value {
            Value::String(s) => out.push_str(&truncate_with_marker(s, max_chars)),
            Value::Array(items) if items.is_empty() => out.push_str("(none)"),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    out.push_str(&format!(
                        "{}. {}\n",
                        i + 1,
                        truncate_with_marker(&compact(item), max_chars)
                    ));
                }
            }
            Value::Object(map) => {
                for (k, v) in map {
                    out.push_str(&format!(
                        "{}: {}\n",
                        k,
                        truncate_with_marker(&compact(v), max_chars)
                    ));
                }
            }
            other => out.push_str(&other.to_string()),
        }
        out.push('\n');
    }
    out
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Collapse the history into the prose the report prompt is built from
pub fn render_history(history: &[HistoryEntry]) -> String {
    let mut out = String::new();
    for (i, entry) in history.iter().enumerate() {
        out.push_str(&format!("\n### Step {}: {}\n", i + 1, entry.stage().title()));
        match &entry.data {
            HistoryData::Initial { findings } => {
                out.push_str(&format!(
                    "Initial analysis identified {} findings.\n",
                    findings.len()
                ));
                for finding in findings {
                    out.push_str(&format!("- {}\n", finding.summary()));
                }
            }
            HistoryData::ComponentSelection {
                component, finding, ..
            } => {
                out.push_str(&format!("Selected component: {}\n", component));
                out.push_str(&format!("Issue: {}\n", finding.issue));
            }
            HistoryData::HypothesisSelection { hypothesis, .. } => {
                out.push_str(&format!("Selected hypothesis: {}\n", hypothesis.description));
                out.push_str(&format!("Confidence: {:.2}\n", hypothesis.confidence));
            }
            HistoryData::InvestigationStep { step, result, .. } => {
                out.push_str(&format!("Investigation step: {}\n", step.description));
                out.push_str("Evidence collected:\n");
                for key in result.evidence.keys() {
                    out.push_str(&format!("- {}: [data available]\n", title_case(key)));
                }
                out.push_str(&format!(
                    "Assessment: {} ({:.2})\n",
                    result.analysis.assessment.as_str(),
                    result.analysis.confidence
                ));
            }
            HistoryData::HypothesisRejection {
                rejected,
                remaining,
                ..
            } => {
                out.push_str(&format!("Rejected hypothesis: {}\n", rejected.description));
                out.push_str(&format!("Remaining candidates: {}\n", remaining.len()));
            }
            HistoryData::Conclusion { conclusion, .. } => {
                out.push_str(&format!("Conclusion: {}\n", conclusion.text));
                out.push_str(&format!("Confidence: {:.2}\n", conclusion.confidence));
                for rec in &conclusion.recommendations {
                    out.push_str(&format!("- Recommendation: {}\n", rec));
                }
            }
            HistoryData::Report { .. } => {
                out.push_str("A report was generated.\n");
            }
        }
    }
    out
}

fn record<T: Serialize>(evidence: &mut BTreeMap<String, Value>, key: &str, result: ClusterResult<T>) {
    match result.map(|v| serde_json::to_value(v)) {
        Ok(Ok(value)) => {
            evidence.insert(key.to_string(), value);
        }
        Ok(Err(e)) => {
            evidence.insert(format!("{}_error", key), Value::String(e.to_string()));
        }
        Err(e) => {
            warn!(key, error = %e, "Evidence collection failed");
            evidence.insert(format!("{}_error", key), Value::String(e.to_string()));
        }
    }
}

/// Drives the model and the cluster for one namespace
#[derive(Clone)]
pub struct RcaEngine {
    llm: Arc<dyn LlmProvider>,
    cluster: Arc<dyn ClusterClient>,
    namespace: String,
    options: EngineOptions,
    prompt_log: Option<PromptLogger>,
    evidence_log: Option<EvidenceLogger>,
}

impl RcaEngine {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        cluster: Arc<dyn ClusterClient>,
        namespace: impl Into<String>,
        options: EngineOptions,
    ) -> Self {
        Self {
            llm,
            cluster,
            namespace: namespace.into(),
            options,
            prompt_log: None,
            evidence_log: None,
        }
    }

    pub fn with_prompt_log(mut self, logger: PromptLogger) -> Self {
        self.prompt_log = Some(logger);
        self
    }

    pub fn with_evidence_log(mut self, logger: EvidenceLogger) -> Self {
        self.evidence_log = Some(logger);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn evidence_log(&self) -> Option<&EvidenceLogger> {
        self.evidence_log.as_ref()
    }

    /// One bounded model call. The exchange goes to the prompt log either way.
    pub async fn complete(
        &self,
        purpose: &str,
        system: &str,
        user: &str,
        expect_json: bool,
    ) -> LlmResult<String> {
        let options = if expect_json {
            LlmRequestOptions::json(self.options.temperature)
        } else {
            LlmRequestOptions::text(self.options.temperature)
        };

        debug!(purpose, model = self.llm.model(), "Sending model request");
        let call = self.llm.send_message(
            vec![Message::user(user)],
            Some(system.to_string()),
            options,
        );
        let result = match tokio::time::timeout(self.options.llm_timeout, call).await {
            Ok(result) => result.map(|response| response.text().to_string()),
            Err(_) => {
                self.log_system_event(
                    "llm_timeout",
                    json!({
                        "purpose": purpose,
                        "model": self.llm.model(),
                        "timeout_ms": self.options.llm_timeout.as_millis() as u64,
                    }),
                );
                Err(LlmError::Timeout {
                    seconds: self.options.llm_timeout.as_secs(),
                })
            }
        };

        if let Some(logger) = &self.prompt_log {
            let (response, metadata) = match &result {
                Ok(text) => (text.clone(), json!({"model": self.llm.model()})),
                Err(e) => (
                    String::new(),
                    json!({"model": self.llm.model(), "error": e.to_string()}),
                ),
            };
            if let Err(e) = logger.log_interaction(purpose, system, user, &response, metadata) {
                warn!(error = %e, "Failed to write prompt log");
            }
        }

        result
    }

    fn log_system_event(&self, event: &str, metadata: Value) {
        if let Some(logger) = &self.prompt_log {
            if let Err(e) = logger.log_system_event(event, metadata) {
                warn!(error = %e, "Failed to write prompt log");
            }
        }
    }

    /// Candidate root causes for a finding. Never empty.
    pub async fn generate_hypotheses(&self, component: &str, finding: &Finding) -> Vec<Hypothesis> {
        let system = build_hypotheses_system_prompt();
        let user = build_hypotheses_user_message(component, finding);

        let text = match self.complete("generate_hypotheses", &system, &user, true).await {
            Ok(text) => text,
            Err(err) => {
                warn!(component, error = %err, "Hypothesis generation failed");
                return llm_error_hypotheses(component, &err);
            }
        };

        let wire: Option<HypothesesWire> = parse_or_else(&text, |err| {
            warn!(component, error = %err, "Unparseable hypotheses, using fallback");
            None
        });
        let list = match wire {
            Some(HypothesesWire::Wrapped { hypotheses }) | Some(HypothesesWire::List(hypotheses)) => {
                hypotheses
            }
            None => Vec::new(),
        };
        let hypotheses: Vec<Hypothesis> = list
            .into_iter()
            .filter_map(HypothesisWire::into_hypothesis)
            .collect();

        if hypotheses.is_empty() {
            return unknown_issue_hypotheses(component);
        }
        info!(component, count = hypotheses.len(), "Generated hypotheses");
        hypotheses
    }

    /// Plan for testing `hypothesis`. Always has at least one step and one
    /// runnable next step.
    pub async fn get_investigation_plan(
        &self,
        component: &str,
        finding: &Finding,
        hypothesis: &Hypothesis,
    ) -> InvestigationPlan {
        let system = build_plan_system_prompt();
        let user = build_plan_user_message(component, finding, hypothesis, &self.namespace);

        let text = match self.complete("investigation_plan", &system, &user, true).await {
            Ok(text) => text,
            Err(err) => {
                warn!(component, error = %err, "Plan generation failed");
                return fallback_plan(component, &self.namespace);
            }
        };
        let Some(wire) = parse_object_or_else::<Option<PlanWire>, _>(&text, |err| {
            warn!(component, error = %err, "Unparseable plan, using fallback");
            None
        }) else {
            return fallback_plan(component, &self.namespace);
        };

        let mut steps: Vec<Step> = wire
            .steps
            .into_iter()
            .filter(|s| !s.description.trim().is_empty())
            .map(|s| Step {
                commands: command_list(&s.commands),
                description: s.description,
                expected_if_true: s.expected_if_true,
                expected_if_false: s.expected_if_false,
            })
            .collect();
        if steps.is_empty() {
            steps = fallback_steps(component, &self.namespace);
        }

        let mut next_steps = next_steps_from(wire.next_steps, &hypothesis.related_components);
        if next_steps.is_empty() {
            next_steps = steps
                .iter()
                .map(|s| {
                    let action =
                        StepAction::classify(StepType::Command, &s.description, &s.commands, &[]);
                    NextStep::new(s.description.clone(), action, Priority::Medium)
                })
                .collect();
        }

        InvestigationPlan {
            steps,
            evidence_needed: text_list(&wire.evidence_needed),
            conclusion_criteria: value_text(&wire.conclusion_criteria),
            next_steps,
            conclusion: conclusion_from(wire.conclusion, 0.0),
        }
    }

    /// Run one step against the cluster and have the model judge the evidence
    pub async fn execute_step(
        &self,
        component: &str,
        finding: &Finding,
        hypothesis: &Hypothesis,
        step: &NextStep,
    ) -> StepResult {
        let evidence = self.gather_step_evidence(component, &step.action).await;
        let analysis = self
            .analyze_evidence(component, finding, hypothesis, &evidence)
            .await;

        let result = StepResult {
            step: step.clone(),
            executed_at: Utc::now(),
            evidence,
            analysis,
        };

        if let Some(logger) = &self.evidence_log {
            if let Err(e) = logger.log_investigation_step(component, hypothesis, step, &result) {
                warn!(component, error = %e, "Failed to log investigation step");
            }
        }

        info!(
            component,
            action = step.action.label(),
            assessment = result.analysis.assessment.as_str(),
            confidence = result.analysis.confidence,
            "Executed investigation step"
        );
        result
    }

    async fn gather_step_evidence(
        &self,
        component: &str,
        action: &StepAction,
    ) -> BTreeMap<String, Value> {
        let ns = self.namespace.as_str();
        let name = parse_component(component).map_or(component, |(_, name)| name);
        let mut evidence = BTreeMap::new();

        match action {
            StepAction::FetchLogs => match self.resolve_pod(component).await {
                Ok(Some((pod, container))) => {
                    let logs = self
                        .cluster
                        .get_pod_logs(ns, &pod, container.as_deref(), self.options.log_tail_lines)
                        .await;
                    record(&mut evidence, "logs", logs);
                }
                Ok(None) => {
                    evidence.insert(
                        "logs_error".to_string(),
                        Value::String(format!("No pod found for {}", component)),
                    );
                }
                Err(e) => record::<()>(&mut evidence, "logs", Err(e)),
            },
            StepAction::DescribeResource => match parse_component(component) {
                Some((kind, name)) => {
                    let output = self.cluster.describe(&kind.to_lowercase(), name, ns).await;
                    record(&mut evidence, "describe", output);
                }
                None => {
                    evidence.insert(
                        "describe_error".to_string(),
                        Value::String(format!(
                            "{} does not name a Kubernetes resource",
                            component
                        )),
                    );
                }
            },
            StepAction::FetchEvents => {
                let selector = format!("involvedObject.name={}", name);
                let events = self.cluster.get_events(ns, Some(&selector)).await;
                record(&mut evidence, "events", events);
            }
            StepAction::RunCommands { commands } => {
                let mut results = Vec::with_capacity(commands.len());
                for command in commands {
                    results.push(self.run_command(command).await);
                }
                evidence.insert("command_results".to_string(), Value::Array(results));
            }
            StepAction::Analyze => {
                evidence = self.collect_component_evidence(component).await;
            }
            StepAction::Correlate { components } => {
                let targets: Vec<&str> = if components.is_empty() {
                    vec![component]
                } else {
                    components.iter().map(String::as_str).collect()
                };
                let mut correlated = serde_json::Map::new();
                for target in targets {
                    let target_name = parse_component(target).map_or(target, |(_, n)| n);
                    let selector = format!("involvedObject.name={}", target_name);
                    let value = match self.cluster.get_events(ns, Some(&selector)).await {
                        Ok(events) => Value::Array(events),
                        Err(e) => json!({"error": e.to_string()}),
                    };
                    correlated.insert(target.to_string(), value);
                }
                evidence.insert("correlated_events".to_string(), Value::Object(correlated));
            }
        }

        evidence
    }

    /// Pod behind a component: the pod itself, or the first pod named
    /// `{name}-...` for workload kinds. Container suffixes are kept.
    async fn resolve_pod(&self, component: &str) -> ClusterResult<Option<(String, Option<String>)>> {
        let Some((kind, name)) = parse_component(component) else {
            return Ok(None);
        };
        let container = component
            .splitn(3, '/')
            .nth(2)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if kind.eq_ignore_ascii_case("pod") {
            return Ok(Some((name.to_string(), container)));
        }

        let prefix = format!("{}-", name);
        let pods = self.cluster.get_pods(&self.namespace).await?;
        Ok(pods
            .iter()
            .map(resource_name)
            .find(|pod| pod.starts_with(&prefix))
            .map(|pod| (pod.to_string(), None)))
    }

    async fn run_command(&self, command: &str) -> Value {
        let args = split_command_line(command);
        match args.split_first() {
            Some((binary, rest)) if binary == "kubectl" => {
                match self.cluster.run_read_only(rest).await {
                    Ok(output) => json!({"command": command, "success": true, "output": output}),
                    Err(e) => {
                        warn!(command, error = %e, "Step command failed");
                        json!({"command": command, "success": false, "error": e.to_string()})
                    }
                }
            }
            _ => json!({"command": command, "skipped": "not a kubectl command"}),
        }
    }

    /// Ask the model whether `evidence` supports the hypothesis
    pub async fn analyze_evidence(
        &self,
        component: &str,
        finding: &Finding,
        hypothesis: &Hypothesis,
        evidence: &BTreeMap<String, Value>,
    ) -> EvidenceAnalysis {
        let evidence_text = render_evidence(evidence, EVIDENCE_MAX_CHARS);
        let system = build_evidence_system_prompt();
        let user = build_evidence_user_message(component, finding, hypothesis, &evidence_text);

        let text = match self.complete("analyze_evidence", &system, &user, true).await {
            Ok(text) => text,
            Err(err) => {
                warn!(component, error = %err, "Evidence analysis failed");
                return error_analysis();
            }
        };
        let Some(wire) = parse_object_or_else::<Option<AnalysisWire>, _>(&text, |err| {
            warn!(component, error = %err, "Unparseable evidence analysis, using fallback");
            None
        }) else {
            return inconclusive_analysis();
        };

        let confidence = confidence_of(&wire.confidence, 0.5);
        EvidenceAnalysis {
            assessment: wire
                .assessment
                .as_str()
                .and_then(|a| a.parse::<Assessment>().ok())
                .unwrap_or(Assessment::Inconclusive),
            confidence,
            next_steps: next_steps_from(wire.next_steps, &hypothesis.related_components),
            conclusion: conclusion_from(wire.conclusion, confidence),
        }
    }

    /// Everything readily available about one component, plus node readiness
    pub async fn collect_component_evidence(&self, component: &str) -> BTreeMap<String, Value> {
        let ns = self.namespace.as_str();
        let mut evidence = BTreeMap::new();

        match parse_component(component) {
            Some((kind, name)) => {
                let selector = format!("involvedObject.name={}", name);
                match kind.to_lowercase().as_str() {
                    "pod" => {
                        record(&mut evidence, "pod_details", self.cluster.get_pod(ns, name).await);
                        let container = component.splitn(3, '/').nth(2);
                        let logs = self
                            .cluster
                            .get_pod_logs(ns, name, container, self.options.log_tail_lines)
                            .await;
                        record(&mut evidence, "pod_logs", logs);
                        let events = self.cluster.get_events(ns, Some(&selector)).await;
                        record(&mut evidence, "pod_events", events);
                    }
                    "deployment" => {
                        let details = self
                            .cluster
                            .get_deployments(ns)
                            .await
                            .map(|items| find_named(items, name));
                        record(&mut evidence, "deployment_details", details);
                        let prefix = format!("{}-", name);
                        let pods = self.cluster.get_pods(ns).await.map(|pods| {
                            pods.iter()
                                .filter(|p| resource_name(p).starts_with(&prefix))
                                .map(pod_summary)
                                .collect::<Vec<Value>>()
                        });
                        record(&mut evidence, "deployment_pods", pods);
                        let events = self.cluster.get_events(ns, Some(&selector)).await;
                        record(&mut evidence, "deployment_events", events);
                    }
                    "service" => {
                        let details = self
                            .cluster
                            .get_services(ns)
                            .await
                            .map(|items| find_named(items, name));
                        record(&mut evidence, "service_details", details);
                        let endpoints = self
                            .cluster
                            .get_endpoints(ns)
                            .await
                            .map(|items| find_named(items, name));
                        record(&mut evidence, "service_endpoints", endpoints);
                        let events = self.cluster.get_events(ns, Some(&selector)).await;
                        record(&mut evidence, "service_events", events);
                    }
                    "persistentvolumeclaim" | "pvc" => {
                        let details = self
                            .cluster
                            .get_pvcs(ns)
                            .await
                            .map(|items| find_named(items, name));
                        record(&mut evidence, "pvc_details", details);
                        let events = self.cluster.get_events(ns, Some(&selector)).await;
                        record(&mut evidence, "pvc_events", events);
                    }
                    _ => {
                        let events = self.cluster.get_events(ns, Some(&selector)).await;
                        record(&mut evidence, "events", events);
                    }
                }
            }
            None => {
                let events = self.cluster.get_events(ns, Some("type!=Normal")).await;
                record(&mut evidence, "events", events);
            }
        }

        let nodes = self.cluster.get_nodes().await.map(|nodes| {
            nodes
                .iter()
                .map(|node| {
                    json!({
                        "name": resource_name(node),
                        "ready": condition_status(node, "Ready").unwrap_or("Unknown"),
                    })
                })
                .collect::<Vec<Value>>()
        });
        record(&mut evidence, "node_status", nodes);

        evidence
    }

    /// Markdown report over the whole history. Failures come back as an
    /// error string, never as `Err`.
    pub async fn generate_report(&self, history: &[HistoryEntry]) -> String {
        let system = build_report_system_prompt();
        let user = build_report_user_message(&render_history(history));

        match self.complete("generate_report", &system, &user, false).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => "Error generating report: empty response".to_string(),
            Err(err) => {
                warn!(error = %err, "Report generation failed");
                format!("Error generating report: {}", err)
            }
        }
    }
}

fn find_named(items: Vec<Value>, name: &str) -> Option<Value> {
    items.into_iter().find(|item| resource_name(item) == name)
}

fn pod_summary(pod: &Value) -> Value {
    json!({
        "name": resource_name(pod),
        "phase": str_at(pod, "/status/phase"),
        "ready": condition_status(pod, "Ready").unwrap_or("Unknown"),
    })
}
