//! Engine Integration Tests
//!
//! Every model-backed operation returns a usable value whatever the model
//! sends back: garbage, nothing, an error or no answer in time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_rca::models::{Assessment, Hypothesis, NextStep, Priority, StepAction};
use k8s_rca::services::investigation::engine::{fallback_plan, unknown_issue_hypotheses};
use k8s_rca::storage::{PromptLogKind, PromptLogger};
use k8s_rca_llm::LlmError;
use serde_json::Value;
use tempfile::TempDir;

use super::support::{
    crashloop_finding, engine, engine_with_timeout, microservices_cluster, FakeCluster,
    MockLlmProvider,
};

const COMPONENT: &str = "Pod/database-xyz";

fn hypothesis() -> Hypothesis {
    Hypothesis::new("Memory limit too low", 0.8)
}

// ============================================================================
// Hypotheses
// ============================================================================

#[tokio::test]
async fn test_unusable_hypotheses_fall_back() {
    for text in ["I am not able to help with that.", "", "{\"hypotheses\": []}", "[1, 2]"] {
        let llm = Arc::new(MockLlmProvider::with_texts(&[text]));
        let engine = engine(llm, Arc::new(FakeCluster::default()), "default");

        let hypotheses = engine
            .generate_hypotheses(COMPONENT, &crashloop_finding())
            .await;
        assert_eq!(hypotheses, unknown_issue_hypotheses(COMPONENT), "input: {:?}", text);
    }
}

#[tokio::test]
async fn test_model_error_hypotheses() {
    let llm = Arc::new(MockLlmProvider::new(vec![Err(LlmError::ServerError {
        message: "overloaded".to_string(),
        status: Some(529),
    })]));
    let engine = engine(llm, Arc::new(FakeCluster::default()), "default");

    let hypotheses = engine
        .generate_hypotheses(COMPONENT, &crashloop_finding())
        .await;
    assert_eq!(hypotheses.len(), 1);
    assert_eq!(hypotheses[0].confidence, 0.3);
    assert!(hypotheses[0]
        .description
        .starts_with("Error occurred while analyzing Pod/database-xyz"));
}

#[tokio::test]
async fn test_slow_model_times_out() {
    let llm = Arc::new(
        MockLlmProvider::with_texts(&[r#"{"hypotheses": [{"description": "late"}]}"#])
            .with_delay(Duration::from_millis(500)),
    );
    let engine = engine_with_timeout(
        llm,
        Arc::new(FakeCluster::default()),
        Duration::from_millis(20),
    );

    let hypotheses = engine
        .generate_hypotheses(COMPONENT, &crashloop_finding())
        .await;
    assert_eq!(hypotheses.len(), 1);
    assert!(hypotheses[0].description.contains("timed out"));
}

#[tokio::test]
async fn test_hypothesis_confidence_is_clamped() {
    let llm = Arc::new(MockLlmProvider::with_texts(&[
        r#"[{"description": "Node out of disk", "confidence": 7}, {"description": "", "confidence": 0.9}]"#,
    ]));
    let engine = engine(llm, Arc::new(FakeCluster::default()), "default");

    let hypotheses = engine
        .generate_hypotheses(COMPONENT, &crashloop_finding())
        .await;
    assert_eq!(hypotheses.len(), 1);
    assert_eq!(hypotheses[0].confidence, 1.0);
}

// ============================================================================
// Plans
// ============================================================================

#[tokio::test]
async fn test_unusable_plan_falls_back() {
    for response in [Ok("no plan today"), Err(())] {
        let llm = Arc::new(match response {
            Ok(text) => MockLlmProvider::with_texts(&[text]),
            Err(()) => MockLlmProvider::with_texts(&[]),
        });
        let engine = engine(llm, Arc::new(FakeCluster::default()), "shop");

        let plan = engine
            .get_investigation_plan(COMPONENT, &crashloop_finding(), &hypothesis())
            .await;
        assert_eq!(plan, fallback_plan(COMPONENT, "shop"));
        assert!(plan.conclusion.is_none());
    }
}

#[tokio::test]
async fn test_plan_without_next_steps_derives_them() {
    let llm = Arc::new(MockLlmProvider::with_texts(&[r#"{
        "steps": [
            {"description": "Review recent events", "commands": ["kubectl get events -n shop"]},
            {"description": "Check the PVC capacity", "commands": ["kubectl get pvc -n shop"]}
        ],
        "conclusion_criteria": ["disk full", "write errors"]
    }"#]));
    let engine = engine(llm, Arc::new(FakeCluster::default()), "shop");

    let plan = engine
        .get_investigation_plan(COMPONENT, &crashloop_finding(), &hypothesis())
        .await;
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.next_steps[0].action, StepAction::FetchEvents);
    assert_eq!(
        plan.next_steps[1].action,
        StepAction::RunCommands {
            commands: vec!["kubectl get pvc -n shop".to_string()]
        }
    );
}

// ============================================================================
// Step execution
// ============================================================================

#[tokio::test]
async fn test_garbage_analysis_is_inconclusive() {
    let llm = Arc::new(MockLlmProvider::with_texts(&["definitely maybe"]));
    let engine = engine(llm, Arc::new(microservices_cluster()), "shop");
    let step = NextStep::new("Review recent events", StepAction::FetchEvents, Priority::High);

    let result = engine
        .execute_step(COMPONENT, &crashloop_finding(), &hypothesis(), &step)
        .await;

    assert_eq!(result.analysis.assessment, Assessment::Inconclusive);
    assert_eq!(result.analysis.confidence, 0.3);
    assert_eq!(result.analysis.next_steps[0].action, StepAction::DescribeResource);
    let events = result.evidence["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_commands_are_limited_to_kubectl() {
    let cluster = Arc::new(microservices_cluster());
    let llm = Arc::new(MockLlmProvider::with_texts(&[
        r#"{"assessment": "refuted", "confidence": 0.6}"#,
    ]));
    let engine = engine(llm, cluster.clone(), "shop");
    let step = NextStep::new(
        "Inspect volumes",
        StepAction::RunCommands {
            commands: vec![
                "kubectl get pvc -n shop".to_string(),
                "rm -rf /var/lib/postgresql".to_string(),
            ],
        },
        Priority::Medium,
    );

    let result = engine
        .execute_step(COMPONENT, &crashloop_finding(), &hypothesis(), &step)
        .await;

    let results = result.evidence["command_results"].as_array().unwrap();
    assert_eq!(results[0]["success"], Value::Bool(true));
    assert!(results[1].get("skipped").is_some());
    assert_eq!(
        *cluster.commands.lock().unwrap(),
        vec![vec!["get".to_string(), "pvc".to_string(), "-n".to_string(), "shop".to_string()]]
    );
    assert_eq!(result.analysis.assessment, Assessment::Refuted);
    assert!(result.conclusion().is_none());
}

#[tokio::test]
async fn test_unreachable_cluster_is_recorded_as_evidence() {
    let cluster = Arc::new(FakeCluster {
        unavailable: true,
        ..Default::default()
    });
    let llm = Arc::new(MockLlmProvider::with_texts(&[]));
    let engine = engine(llm, cluster, "shop");
    let step = NextStep::new("Check logs", StepAction::FetchLogs, Priority::High);

    let result = engine
        .execute_step("Deployment/api", &crashloop_finding(), &hypothesis(), &step)
        .await;

    assert!(result.evidence["logs_error"]
        .as_str()
        .unwrap()
        .contains("connection refused"));
    assert_eq!(result.analysis.assessment, Assessment::Error);
    assert_eq!(result.analysis.confidence, 0.0);
}

#[tokio::test]
async fn test_component_evidence_for_pod() {
    let llm = Arc::new(MockLlmProvider::with_texts(&[]));
    let engine = engine(llm, Arc::new(microservices_cluster()), "shop");

    let evidence = engine.collect_component_evidence(COMPONENT).await;
    let keys: Vec<&str> = evidence.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["node_status", "pod_details", "pod_events", "pod_logs"]);

    let evidence = engine.collect_component_evidence("Pod/missing").await;
    assert!(evidence.contains_key("pod_logs_error"));
}

// ============================================================================
// Wrapped model output
// ============================================================================

/// The same answer the way models actually send it back
fn wrapped(json: &str) -> Vec<String> {
    vec![
        format!("Based on the evidence, here is my analysis:\n{}", json),
        format!("```json\n{}\n```", json),
        format!("{}\n\nLet me know if you need anything else.", json),
    ]
}

#[tokio::test]
async fn test_prose_wrapped_analysis_keeps_conclusion() {
    let analysis = r#"{"assessment":"supported","confidence":0.9,"next_steps":[],"conclusion":{"text":"postgres is OOM killed","confidence":0.9}}"#;
    for text in wrapped(analysis) {
        let llm = Arc::new(MockLlmProvider::with_texts(&[text.as_str()]));
        let engine = engine(llm, Arc::new(microservices_cluster()), "shop");
        let step = NextStep::new("Review recent events", StepAction::FetchEvents, Priority::High);

        let result = engine
            .execute_step(COMPONENT, &crashloop_finding(), &hypothesis(), &step)
            .await;

        assert_eq!(result.analysis.assessment, Assessment::Supported, "input: {:?}", text);
        assert_eq!(result.analysis.confidence, 0.9);
        let conclusion = result.conclusion().unwrap();
        assert_eq!(conclusion.text, "postgres is OOM killed");
        assert_eq!(conclusion.confidence, 0.9);
    }
}

#[tokio::test]
async fn test_prose_wrapped_analysis_keeps_next_steps() {
    let analysis = r#"{
        "assessment": "refuted",
        "confidence": 0.8,
        "next_steps": [
            {"description": "Review events for the data volume", "type": "command", "priority": "high"}
        ]
    }"#;
    for text in wrapped(analysis) {
        let llm = Arc::new(MockLlmProvider::with_texts(&[text.as_str()]));
        let engine = engine(llm, Arc::new(FakeCluster::default()), "shop");

        let result = engine
            .analyze_evidence(COMPONENT, &crashloop_finding(), &hypothesis(), &BTreeMap::new())
            .await;

        assert_eq!(result.assessment, Assessment::Refuted, "input: {:?}", text);
        assert_eq!(result.confidence, 0.8);
        assert_eq!(result.next_steps.len(), 1);
        assert_eq!(result.next_steps[0].action, StepAction::FetchEvents);
        assert_eq!(result.next_steps[0].priority, Priority::High);
        assert!(result.conclusion.is_none());
    }
}

#[tokio::test]
async fn test_bare_array_is_not_an_analysis() {
    let llm = Arc::new(MockLlmProvider::with_texts(&[
        r#"Here you go: ["supported", 0.95, [], "postgres is OOM killed"]"#,
    ]));
    let engine = engine(llm, Arc::new(FakeCluster::default()), "shop");

    let result = engine
        .analyze_evidence(COMPONENT, &crashloop_finding(), &hypothesis(), &BTreeMap::new())
        .await;
    assert_eq!(result.assessment, Assessment::Inconclusive);
    assert_eq!(result.confidence, 0.3);
}

#[tokio::test]
async fn test_wrapped_hypotheses() {
    let object = r#"{"hypotheses": [
        {"description": "Memory limit too low", "confidence": 0.8},
        {"description": "Disk full", "confidence": 0.4}
    ]}"#;
    let array = r#"[{"description": "Memory limit too low", "confidence": 0.8}, {"description": "Disk full"}]"#;
    for text in wrapped(object).into_iter().chain(wrapped(array)) {
        let llm = Arc::new(MockLlmProvider::with_texts(&[text.as_str()]));
        let engine = engine(llm, Arc::new(FakeCluster::default()), "default");

        let hypotheses = engine
            .generate_hypotheses(COMPONENT, &crashloop_finding())
            .await;

        assert_eq!(hypotheses.len(), 2, "input: {:?}", text);
        assert_eq!(hypotheses[0].description, "Memory limit too low");
        assert_eq!(hypotheses[0].confidence, 0.8);
        assert_eq!(hypotheses[1].description, "Disk full");
    }
}

#[tokio::test]
async fn test_wrapped_plan() {
    let plan = r#"{
        "steps": [
            {"description": "Check the PVC capacity", "commands": ["kubectl get pvc -n shop"]}
        ],
        "evidence_needed": ["PVC status"],
        "conclusion_criteria": "Volume at capacity",
        "next_steps": [
            {"description": "Check pod logs for write errors", "type": "command", "priority": "high"},
            {"description": "Compare restarts with disk usage", "type": "analysis"}
        ]
    }"#;
    for text in wrapped(plan) {
        let llm = Arc::new(MockLlmProvider::with_texts(&[text.as_str()]));
        let engine = engine(llm, Arc::new(FakeCluster::default()), "shop");

        let result = engine
            .get_investigation_plan(COMPONENT, &crashloop_finding(), &hypothesis())
            .await;

        assert_ne!(result, fallback_plan(COMPONENT, "shop"), "input: {:?}", text);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].commands, vec!["kubectl get pvc -n shop"]);
        assert_eq!(result.evidence_needed, vec!["PVC status"]);
        assert_eq!(result.conclusion_criteria, "Volume at capacity");
        let actions: Vec<&StepAction> = result.next_steps.iter().map(|s| &s.action).collect();
        assert_eq!(actions, vec![&StepAction::FetchLogs, &StepAction::Analyze]);
    }
}

// ============================================================================
// Reports and the prompt log
// ============================================================================

#[tokio::test]
async fn test_report_failure_is_a_message() {
    let llm = Arc::new(MockLlmProvider::with_texts(&["   "]));
    let blank_engine = engine(llm, Arc::new(FakeCluster::default()), "shop");
    assert_eq!(
        blank_engine.generate_report(&[]).await,
        "Error generating report: empty response"
    );

    let llm = Arc::new(MockLlmProvider::with_texts(&[]));
    let engine = engine(llm, Arc::new(FakeCluster::default()), "shop");
    assert!(engine
        .generate_report(&[])
        .await
        .starts_with("Error generating report: "));
}

#[tokio::test]
async fn test_every_call_is_logged() {
    let temp_dir = TempDir::new().unwrap();
    let logger = PromptLogger::new(temp_dir.path().join("prompts.jsonl"));
    let llm = Arc::new(MockLlmProvider::with_texts(&["not json"]));
    let engine = engine(llm, Arc::new(FakeCluster::default()), "shop").with_prompt_log(logger.clone());

    engine
        .generate_hypotheses(COMPONENT, &crashloop_finding())
        .await;
    engine.analyze_evidence(COMPONENT, &crashloop_finding(), &hypothesis(), &BTreeMap::new()).await;

    let records = logger.read_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].purpose, "generate_hypotheses");
    assert_eq!(records[0].response.as_deref(), Some("not json"));
    assert!(records[1].metadata.get("error").is_some());
}

#[tokio::test]
async fn test_timeout_is_logged_as_system_event() {
    let temp_dir = TempDir::new().unwrap();
    let logger = PromptLogger::new(temp_dir.path().join("prompts.jsonl"));
    let llm = Arc::new(
        MockLlmProvider::with_texts(&["[]"]).with_delay(Duration::from_millis(500)),
    );
    let engine = engine_with_timeout(
        llm,
        Arc::new(FakeCluster::default()),
        Duration::from_millis(20),
    )
    .with_prompt_log(logger.clone());

    engine
        .generate_hypotheses(COMPONENT, &crashloop_finding())
        .await;

    let records = logger.read_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].kind, PromptLogKind::SystemEvent);
    assert_eq!(records[0].purpose, "llm_timeout");
    assert_eq!(records[0].metadata["purpose"], "generate_hypotheses");
    assert_eq!(records[0].metadata["timeout_ms"], 20);
    assert_eq!(records[1].kind, PromptLogKind::Interaction);
    assert!(records[1].metadata.get("error").is_some());
}
