//! Investigation Session Integration Tests
//!
//! Drives the state machine through the engine with a scripted model and an
//! in-memory cluster:
//! - the full path from a finding to a conclusion and a report
//! - rejection until the candidates run out
//! - stage guards and degraded model behavior

use std::sync::Arc;
use std::time::Duration;

use k8s_rca::models::{HistoryStage, SessionStage, StepAction};
use k8s_rca::services::investigation::InvestigationSession;
use k8s_rca::storage::EvidenceLogger;
use tempfile::TempDir;

use super::support::{
    crashloop_finding, engine, memory_store, microservices_cluster, MockLlmProvider,
};

const HYPOTHESES: &str = r#"{"hypotheses": [
    {"description": "Memory limit too low for postgres", "confidence": 0.8,
     "investigation_steps": ["Check logs for OOM messages"],
     "related_components": ["PersistentVolumeClaim/data"]},
    {"description": "Corrupted data directory", "confidence": 0.5},
    {"description": "Bad database configuration", "confidence": 0.4}
]}"#;

const PLAN: &str = r#"Here is the plan:
```json
{
  "steps": [{
    "description": "Check pod logs",
    "commands": ["kubectl logs database-xyz -n test-microservices"],
    "expected_if_true": "Out of memory errors",
    "expected_if_false": "No memory errors"
  }],
  "evidence_needed": ["Container logs"],
  "conclusion_criteria": "Memory errors right before each restart",
  "next_steps": [
    {"description": "Check pod logs for memory errors", "type": "command", "priority": "high"}
  ]
}
```"#;

const SUPPORTED: &str = r#"{
  "assessment": "supported",
  "confidence": 0.85,
  "next_steps": [],
  "conclusion": {
    "text": "postgres is killed after exceeding its memory limit",
    "confidence": 0.85,
    "recommendations": ["Raise the memory limit to 1Gi"]
  }
}"#;

fn new_session(namespace: &str) -> InvestigationSession {
    let store = memory_store();
    let id = store
        .create("Database keeps restarting", namespace, None)
        .unwrap();
    InvestigationSession::new(id, store)
}

#[tokio::test]
async fn test_end_to_end_crashloop_investigation() {
    let temp_dir = TempDir::new().unwrap();
    let evidence = EvidenceLogger::new(temp_dir.path().to_path_buf());
    let llm = Arc::new(MockLlmProvider::with_texts(&[
        HYPOTHESES,
        PLAN,
        SUPPORTED,
        "# Root Cause Analysis\n\nThe database ran out of memory.",
    ]));
    let engine = engine(llm.clone(), Arc::new(microservices_cluster()), "test-microservices")
        .with_evidence_log(evidence.clone());
    let session = new_session("test-microservices");

    session.start(vec![crashloop_finding()]).unwrap();
    let findings = session.numbered_findings().unwrap();
    assert_eq!(findings[0].component, "Pod/database-xyz");

    let outcome = session.select_finding(&engine, &findings[0]).await.unwrap();
    assert_eq!(outcome.stage, SessionStage::HypothesisGeneration);
    assert!(outcome.warnings.is_empty());
    let hypotheses = session.candidate_hypotheses().unwrap();
    assert_eq!(hypotheses.len(), 3);
    assert_eq!(hypotheses[0].description, "Memory limit too low for postgres");

    let outcome = session.select_hypothesis(&engine, 0).await.unwrap();
    assert_eq!(outcome.stage, SessionStage::Investigation);
    let view = session.investigation_view().unwrap();
    assert!(!view.plan.steps.is_empty());
    assert_eq!(view.next_steps[0].action, StepAction::FetchLogs);

    let (result, outcome) = session.execute_step(&engine, 0).await.unwrap();
    assert!(result.evidence["logs"]
        .as_str()
        .unwrap()
        .contains("out of memory"));
    assert_eq!(outcome.stage, SessionStage::Conclusion);

    let conclusion = session.conclusion_view().unwrap().unwrap();
    assert!(conclusion.conclusion.confidence >= 0.7);
    assert!(!conclusion.conclusion.text.is_empty());
    assert!(!conclusion.conclusion.confirmed);
    assert_eq!(conclusion.component, "Pod/database-xyz");

    let steps = evidence
        .evidence_for_hypothesis("Pod/database-xyz", "Memory limit too low for postgres")
        .unwrap();
    assert_eq!(steps.len(), 1);

    let report = session.generate_report(&engine).await.unwrap();
    assert!(report.starts_with("# Root Cause Analysis"));
    let state = session.snapshot().unwrap();
    assert_eq!(state.history.last().unwrap().stage(), HistoryStage::Report);

    // The plan prompt names the namespace the engine is bound to
    let requests = llm.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests[1].1.contains("**Namespace:** test-microservices"));
    assert!(requests[2].1.contains("### Logs"));
}

#[tokio::test]
async fn test_chatty_model_still_reaches_conclusion() {
    let hypotheses = format!("Here are my hypotheses:\n{}", HYPOTHESES);
    let analysis = format!(
        "Based on the evidence, here is my analysis:\n{}\nThe logs are conclusive.",
        SUPPORTED
    );
    let llm = Arc::new(MockLlmProvider::with_texts(&[
        hypotheses.as_str(),
        PLAN,
        analysis.as_str(),
    ]));
    let engine = engine(llm, Arc::new(microservices_cluster()), "test-microservices");
    let session = new_session("test-microservices");

    session.start(vec![crashloop_finding()]).unwrap();
    session
        .select_finding(&engine, &crashloop_finding())
        .await
        .unwrap();
    assert_eq!(session.candidate_hypotheses().unwrap().len(), 3);
    session.select_hypothesis(&engine, 0).await.unwrap();

    let (result, outcome) = session.execute_step(&engine, 0).await.unwrap();
    assert_eq!(result.analysis.confidence, 0.85);
    assert_eq!(outcome.stage, SessionStage::Conclusion);

    let conclusion = session.conclusion_view().unwrap().unwrap();
    assert_eq!(
        conclusion.conclusion.text,
        "postgres is killed after exceeding its memory limit"
    );
    assert_eq!(
        conclusion.conclusion.recommendations,
        vec!["Raise the memory limit to 1Gi"]
    );
}

#[tokio::test]
async fn test_rejections_only_append_history() {
    let llm = Arc::new(MockLlmProvider::with_texts(&[HYPOTHESES]));
    let engine = engine(llm, Arc::new(microservices_cluster()), "test-microservices");
    let session = new_session("test-microservices");

    session.start(vec![crashloop_finding()]).unwrap();
    session
        .select_finding(&engine, &crashloop_finding())
        .await
        .unwrap();

    let mut previous = session.snapshot().unwrap().history;
    for remaining in [2usize, 1, 0] {
        let outcome = session.reject_candidate(0).unwrap();
        let history = session.snapshot().unwrap().history;

        assert_eq!(history.len(), previous.len() + 1);
        assert_eq!(&history[..previous.len()], &previous[..]);
        assert_eq!(session.candidate_hypotheses().unwrap().len(), remaining);
        if remaining == 0 {
            assert_eq!(outcome.stage, SessionStage::ComponentSelection);
        } else {
            assert_eq!(outcome.stage, SessionStage::HypothesisGeneration);
        }
        previous = history;
    }

    let state = session.snapshot().unwrap();
    assert!(state.selected_component.is_none());
    assert_eq!(state.diagnostic_path.len(), 3);
}

#[tokio::test]
async fn test_rejecting_current_hypothesis_offers_the_rest() {
    let llm = Arc::new(MockLlmProvider::with_texts(&[HYPOTHESES, PLAN]));
    let engine = engine(llm, Arc::new(microservices_cluster()), "test-microservices");
    let session = new_session("test-microservices");

    session.start(vec![crashloop_finding()]).unwrap();
    session
        .select_finding(&engine, &crashloop_finding())
        .await
        .unwrap();
    session.select_hypothesis(&engine, 1).await.unwrap();

    let outcome = session.reject_hypothesis().unwrap();
    assert_eq!(outcome.stage, SessionStage::HypothesisGeneration);
    let left: Vec<String> = session
        .candidate_hypotheses()
        .unwrap()
        .into_iter()
        .map(|h| h.description)
        .collect();
    assert_eq!(
        left,
        vec!["Memory limit too low for postgres", "Bad database configuration"]
    );
    assert!(session.snapshot().unwrap().current_hypothesis.is_none());
}

#[tokio::test]
async fn test_candidate_rejected_during_planning_is_not_selected() {
    let store = memory_store();
    let id = store
        .create("Database keeps restarting", "test-microservices", None)
        .unwrap();
    let session = InvestigationSession::new(id.clone(), store.clone());
    let other = InvestigationSession::new(id, store);
    let llm = Arc::new(
        MockLlmProvider::with_texts(&[HYPOTHESES, PLAN]).with_delay(Duration::from_millis(200)),
    );
    let engine = engine(llm, Arc::new(microservices_cluster()), "test-microservices");

    session.start(vec![crashloop_finding()]).unwrap();
    session
        .select_finding(&engine, &crashloop_finding())
        .await
        .unwrap();

    let (selected, rejected) = tokio::join!(session.select_hypothesis(&engine, 0), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        other.reject_candidate(0)
    });

    assert!(rejected.is_ok());
    assert!(selected.is_err());
    let state = session.snapshot().unwrap();
    assert_eq!(state.stage, SessionStage::HypothesisGeneration);
    assert!(state.current_hypothesis.is_none());
    assert_eq!(state.history.last().unwrap().stage(), HistoryStage::HypothesisRejection);
    let remaining = session.candidate_hypotheses().unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining
        .iter()
        .all(|h| h.description != "Memory limit too low for postgres"));
}

#[tokio::test]
async fn test_wrong_stage_is_refused_without_writing() {
    let llm = Arc::new(MockLlmProvider::with_texts(&[]));
    let engine = engine(llm.clone(), Arc::new(microservices_cluster()), "default");
    let session = new_session("default");
    session.start(vec![crashloop_finding()]).unwrap();
    let before = session.snapshot().unwrap();

    assert!(session.select_hypothesis(&engine, 0).await.is_err());
    assert!(session.execute_step(&engine, 0).await.is_err());
    assert!(session.accept_conclusion(None).is_err());
    assert!(session.reject_hypothesis().is_err());

    assert_eq!(session.snapshot().unwrap(), before);
    assert!(llm.requests().is_empty());
}

#[tokio::test]
async fn test_model_failures_degrade_to_fallbacks() {
    // No scripted responses: every model call fails
    let llm = Arc::new(MockLlmProvider::with_texts(&[]));
    let engine = engine(llm, Arc::new(microservices_cluster()), "test-microservices");
    let session = new_session("test-microservices");

    session.start(vec![crashloop_finding()]).unwrap();
    session
        .select_finding(&engine, &crashloop_finding())
        .await
        .unwrap();
    let hypotheses = session.candidate_hypotheses().unwrap();
    assert!(!hypotheses.is_empty());

    session.select_hypothesis(&engine, 0).await.unwrap();
    let view = session.investigation_view().unwrap();
    assert_eq!(view.plan.steps.len(), 2);

    let (result, outcome) = session.execute_step(&engine, 0).await.unwrap();
    assert!(result.evidence.contains_key("logs"));
    assert!(result.conclusion().is_none());
    assert_eq!(outcome.stage, SessionStage::Investigation);

    let view = session.investigation_view().unwrap();
    assert_eq!(view.results.len(), 1);
    assert_eq!(
        view.next_steps[0].description,
        "Try a different investigation approach"
    );
}

#[tokio::test]
async fn test_accepting_plan_conclusion() {
    let temp_dir = TempDir::new().unwrap();
    let evidence = EvidenceLogger::new(temp_dir.path().to_path_buf());
    let plan_with_conclusion = r#"{
        "steps": [{"description": "Check pod logs", "commands": []}],
        "next_steps": [{"description": "Check pod logs", "type": "command"}],
        "conclusion": {"text": "Memory limit is 128Mi while postgres needs 512Mi", "confidence": 0.9}
    }"#;
    let llm = Arc::new(MockLlmProvider::with_texts(&[HYPOTHESES, plan_with_conclusion]));
    let engine = engine(llm, Arc::new(microservices_cluster()), "test-microservices");
    let session = new_session("test-microservices");

    session.start(vec![crashloop_finding()]).unwrap();
    session
        .select_finding(&engine, &crashloop_finding())
        .await
        .unwrap();
    session.select_hypothesis(&engine, 0).await.unwrap();
    assert!(session
        .investigation_view()
        .unwrap()
        .pending_conclusion
        .is_some());

    let outcome = session.accept_conclusion(Some(&evidence)).unwrap();
    assert_eq!(outcome.stage, SessionStage::Conclusion);
    assert!(outcome.warnings.is_empty());

    let view = session.conclusion_view().unwrap().unwrap();
    assert!(view.conclusion.confirmed);
    assert_eq!(view.conclusion.confidence, 0.9);

    let files: Vec<_> = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("_conclusion_"))
        .collect();
    assert_eq!(files.len(), 1);
}

#[tokio::test]
async fn test_restart_keeps_history() {
    let llm = Arc::new(MockLlmProvider::with_texts(&[HYPOTHESES]));
    let engine = engine(llm, Arc::new(microservices_cluster()), "default");
    let session = new_session("default");

    session.start(vec![crashloop_finding()]).unwrap();
    session
        .select_finding(&engine, &crashloop_finding())
        .await
        .unwrap();
    let outcome = session.restart().unwrap();

    assert_eq!(outcome.stage, SessionStage::ComponentSelection);
    let state = session.snapshot().unwrap();
    assert_eq!(state.history.len(), 2);
    assert!(state.diagnostic_path.is_empty());
}
