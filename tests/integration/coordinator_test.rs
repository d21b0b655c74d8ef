//! Coordinator Integration Tests
//!
//! Runs the analyzers against an in-memory namespace and stores the outcome
//! through the application state.

use std::sync::Arc;

use k8s_rca::models::{SessionStage, Severity};
use k8s_rca::services::agents::AgentKind;
use k8s_rca::services::coordinator::{AnalysisSelection, Coordinator};
use k8s_rca::{AppConfig, AppState};

use super::support::{memory_store, microservices_cluster, FakeCluster, MockLlmProvider};

#[tokio::test]
async fn test_comprehensive_run_finds_crashloop() {
    let coordinator = Coordinator::new(Arc::new(microservices_cluster()), 100);
    let analysis = coordinator
        .run("test-microservices", AnalysisSelection::All)
        .await;

    let agents: Vec<AgentKind> = analysis.reports.iter().map(|r| r.agent).collect();
    assert_eq!(agents, AgentKind::ALL.to_vec());

    let findings = analysis.prioritized_findings();
    assert!(findings
        .iter()
        .any(|f| f.component.starts_with("Pod/database-xyz")
            && f.issue == "Container in CrashLoopBackOff with 5 restarts"
            && f.severity == Severity::High));
    assert!(findings.windows(2).all(|w| w[0].severity <= w[1].severity));
    assert!(findings.iter().all(|f| f.agent.is_some()));

    assert!(analysis
        .groups
        .iter()
        .any(|g| g.component == "Pod/database-xyz"));
}

#[tokio::test]
async fn test_single_analyzer_run() {
    let coordinator = Coordinator::new(Arc::new(microservices_cluster()), 100);
    let analysis = coordinator
        .run("test-microservices", AnalysisSelection::Only(AgentKind::Resources))
        .await;

    assert_eq!(analysis.reports.len(), 1);
    assert_eq!(analysis.reports[0].agent, AgentKind::Resources);
    assert!(analysis
        .findings()
        .iter()
        .all(|f| f.agent.as_deref() == Some("resources")));
}

#[tokio::test]
async fn test_unreachable_cluster_degrades_to_errors() {
    let cluster = Arc::new(FakeCluster {
        unavailable: true,
        ..Default::default()
    });
    let analysis = Coordinator::new(cluster, 100)
        .run("shop", AnalysisSelection::All)
        .await;

    assert_eq!(analysis.reports.len(), AgentKind::ALL.len());
    assert!(analysis.reports.iter().all(|r| !r.errors.is_empty()));
}

#[tokio::test]
async fn test_analyze_stores_results_and_starts_session() {
    let store = memory_store();
    let state = AppState::from_parts(
        AppConfig::default(),
        store.clone(),
        Arc::new(microservices_cluster()),
        Arc::new(MockLlmProvider::with_texts(&[])),
    );
    let id = store
        .create("Database keeps restarting", "test-microservices", None)
        .unwrap();

    let analysis = state.analyze(&id, AnalysisSelection::All).await.unwrap();

    let investigation = store.require(&id).unwrap();
    assert_eq!(investigation.agent_findings.len(), AgentKind::ALL.len());
    assert!(investigation.agent_findings.contains_key("resources"));
    assert_eq!(investigation.evidence["correlation"].len(), 1);
    assert!(!investigation.accumulated_findings.is_empty());
    assert!(investigation.accumulated_findings.len() <= analysis.findings().len());
    assert_eq!(investigation.session.stage, SessionStage::ComponentSelection);
    assert_eq!(
        investigation.session.initial_findings(),
        analysis.prioritized_findings().as_slice()
    );

    // A second run keeps the first run's history
    state.analyze(&id, AnalysisSelection::All).await.unwrap();
    let investigation = store.require(&id).unwrap();
    assert_eq!(investigation.session.history.len(), 2);
    assert_eq!(investigation.evidence["correlation"].len(), 2);
}
