//! Store Integration Tests
//!
//! File-backed persistence: reopening the database, concurrent writers and
//! application state initialization from a config file.

use std::fs;
use std::thread;

use std::sync::Arc;

use k8s_rca::models::{ConversationRole, HistoryData, SessionStage};
use k8s_rca::storage::{open_pool, InvestigationStore, PromptLogKind, PromptLogger};
use k8s_rca::utils::paths::database_path;
use k8s_rca::{AppConfig, AppState};
use k8s_rca_llm::LlmError;
use tempfile::TempDir;

use super::support::{crashloop_finding, memory_store, FakeCluster, MockLlmProvider};

#[test]
fn test_investigation_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = database_path(temp_dir.path());

    let id = {
        let store = InvestigationStore::new(open_pool(&db_path).unwrap()).unwrap();
        let id = store
            .create("Checkout latency", "shop", Some("Since the 14:00 deploy".to_string()))
            .unwrap();
        store
            .add_conversation_entry(&id, ConversationRole::User, "what's wrong?")
            .unwrap();
        store
            .update_session(&id, |state| {
                state.record(HistoryData::Initial {
                    findings: vec![crashloop_finding()],
                });
                state.stage = SessionStage::ComponentSelection;
                Ok(())
            })
            .unwrap();
        id
    };

    let store = InvestigationStore::new(open_pool(&db_path).unwrap()).unwrap();
    let investigation = store.require(&id).unwrap();
    assert_eq!(investigation.namespace, "shop");
    assert_eq!(investigation.context.as_deref(), Some("Since the 14:00 deploy"));
    assert_eq!(investigation.conversation.len(), 1);
    assert_eq!(investigation.session.initial_findings(), &[crashloop_finding()]);
    assert_eq!(store.list().unwrap().len(), 1);
}

#[test]
fn test_concurrent_writers_lose_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let store = InvestigationStore::new(open_pool(&database_path(temp_dir.path())).unwrap()).unwrap();
    let id = store.create("Noisy", "default", None).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let store = store.clone();
            let id = id.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    store
                        .add_conversation_entry(
                            &id,
                            ConversationRole::User,
                            &format!("worker {} message {}", worker, i),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.require(&id).unwrap().conversation.len(), 40);
}

#[test]
fn test_state_initializes_from_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("data");
    let config_path = temp_dir.path().join("config.json");
    fs::write(
        &config_path,
        serde_json::json!({
            "llm": {"provider": "anthropic", "model": "claude-sonnet-4-20250514"},
            "storage": {"data_dir": data_dir, "prompt_log": false},
            "default_namespace": "shop"
        })
        .to_string(),
    )
    .unwrap();

    let state = AppState::initialize(Some(&config_path)).unwrap();

    assert_eq!(state.config().default_namespace, "shop");
    assert!(database_path(&data_dir).exists());
    assert!(data_dir.join("evidence").is_dir());
    assert!(state.evidence_log().is_some());

    let id = state.store().create("t", "shop", None).unwrap();
    assert!(state.session(&id).is_ok());
    assert!(state.session("missing").is_err());
    assert_eq!(state.engine("shop").namespace(), "shop");
}

#[tokio::test]
async fn test_health_check_reports_and_logs() {
    let temp_dir = TempDir::new().unwrap();
    let logger = PromptLogger::new(temp_dir.path().join("prompts.jsonl"));
    let cluster = Arc::new(FakeCluster::default());
    let state = AppState::from_parts(
        AppConfig::default(),
        memory_store(),
        cluster.clone(),
        Arc::new(MockLlmProvider::with_texts(&[])),
    )
    .with_prompt_log(logger.clone());

    let report = state.check().await;

    assert!(report.is_healthy());
    assert_eq!(report.provider, "mock");
    assert_eq!(*cluster.commands.lock().unwrap(), vec![vec!["version".to_string()]]);
    let records = logger.read_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, PromptLogKind::SystemEvent);
    assert_eq!(records[0].purpose, "health_check");
    assert!(records[0].metadata["llm_error"].is_null());
}

#[tokio::test]
async fn test_health_check_reports_failures() {
    let llm = MockLlmProvider::with_texts(&[]).with_health_error(LlmError::AuthenticationFailed {
        message: "anthropic: Invalid API key".to_string(),
    });
    let state = AppState::from_parts(
        AppConfig::default(),
        memory_store(),
        Arc::new(FakeCluster {
            unavailable: true,
            ..Default::default()
        }),
        Arc::new(llm),
    );

    let report = state.check().await;

    assert!(!report.is_healthy());
    assert!(report.llm_error.unwrap().contains("Invalid API key"));
    assert!(report.cluster_error.is_some());
}
