//! Assistant Integration Tests

use std::sync::Arc;

use k8s_rca::models::{ConversationRole, Priority, SuggestionAction};
use k8s_rca::services::assistant::{default_suggestions, Assistant};

use super::support::{crashloop_finding, engine, memory_store, FakeCluster, MockLlmProvider};

fn assistant(llm: Arc<MockLlmProvider>) -> (Assistant, k8s_rca::storage::InvestigationStore, String) {
    let store = memory_store();
    let id = store.create("Checkout errors", "shop", None).unwrap();
    store
        .add_accumulated_findings(&id, vec![crashloop_finding().summary()])
        .unwrap();
    let assistant = Assistant::new(store.clone(), engine(llm, Arc::new(FakeCluster::default()), "shop"));
    (assistant, store, id)
}

#[tokio::test]
async fn test_ask_records_both_sides() {
    let llm = Arc::new(MockLlmProvider::with_texts(&[
        "Pod/database-xyz has restarted 5 times; check its memory limit.",
    ]));
    let (assistant, store, id) = assistant(llm.clone());

    let reply = assistant.ask(&id, "what's wrong?").await.unwrap();
    assert!(reply.contains("database-xyz"));

    let conversation = store.require(&id).unwrap().conversation;
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation[0].role, ConversationRole::User);
    assert_eq!(conversation[1].role, ConversationRole::Assistant);
    assert_eq!(conversation[1].content, reply);

    let (system, user) = &llm.requests()[0];
    assert!(system.as_deref().unwrap().contains("namespace 'shop'"));
    assert!(user.contains("Container in CrashLoopBackOff with 5 restarts"));
    assert!(user.ends_with("what's wrong?"));
}

#[tokio::test]
async fn test_ask_failure_becomes_apology() {
    let (assistant, store, id) = assistant(Arc::new(MockLlmProvider::with_texts(&[])));

    let reply = assistant.ask(&id, "why?").await.unwrap();
    assert!(reply.starts_with("I'm sorry"));
    assert_eq!(store.require(&id).unwrap().conversation.len(), 2);
}

#[tokio::test]
async fn test_ask_unknown_investigation() {
    let (assistant, _, _) = assistant(Arc::new(MockLlmProvider::with_texts(&["hi"])));
    assert!(assistant.ask("missing", "hello").await.is_err());
}

#[tokio::test]
async fn test_suggestions_are_parsed_and_stored() {
    let llm = Arc::new(MockLlmProvider::with_texts(&[r#"{"suggestions": [
        {"text": "Read the database logs", "action": {"type": "check_logs", "pod": "database-xyz"},
         "priority": "high", "reasoning": "The container keeps crashing"},
        {"text": "Unsupported", "action": {"type": "delete_pod", "pod": "database-xyz"}},
        {"text": "Look at the PVC", "action": {"type": "check_resource",
         "resource_type": "PersistentVolumeClaim", "resource_name": "data"}}
    ]}"#]));
    let (assistant, store, id) = assistant(llm);

    let suggestions = assistant
        .suggest_next_actions(&id, &[crashloop_finding()])
        .await
        .unwrap();

    assert_eq!(suggestions.len(), 2);
    assert_eq!(
        suggestions[0].action,
        SuggestionAction::CheckLogs {
            pod: "database-xyz".to_string()
        }
    );
    assert_eq!(suggestions[0].priority, Priority::High);
    assert_eq!(
        suggestions[1].action,
        SuggestionAction::Investigate {
            component: "PersistentVolumeClaim/data".to_string()
        }
    );
    assert_eq!(store.require(&id).unwrap().next_actions, suggestions);
}

#[tokio::test]
async fn test_suggestions_fall_back_to_defaults() {
    let (assistant, store, id) = assistant(Arc::new(MockLlmProvider::with_texts(&[
        "You should look at the logs.",
    ])));

    let suggestions = assistant.suggest_next_actions(&id, &[]).await.unwrap();
    assert_eq!(suggestions, default_suggestions());
    assert_eq!(store.require(&id).unwrap().next_actions.len(), 3);
}

#[tokio::test]
async fn test_wrapped_suggestions_are_parsed() {
    let json = r#"{"suggestions": [
        {"text": "Run the events analyzer", "action": {"type": "run_agent", "agent": "events"}, "priority": "high"},
        {"text": "Read the database logs", "action": {"type": "check_logs", "pod": "database-xyz"}}
    ]}"#;
    let texts = [
        format!("Sure! Here are some ideas:\n{}", json),
        format!("```json\n{}\n```", json),
    ];
    for text in texts {
        let (assistant, _, id) = assistant(Arc::new(MockLlmProvider::with_texts(&[text.as_str()])));

        let suggestions = assistant.suggest_next_actions(&id, &[]).await.unwrap();

        assert_eq!(suggestions.len(), 2, "input: {:?}", text);
        assert_eq!(
            suggestions[0].action,
            SuggestionAction::RunAgent {
                agent: "events".to_string()
            }
        );
        assert_eq!(
            suggestions[1].action,
            SuggestionAction::CheckLogs {
                pod: "database-xyz".to_string()
            }
        );
    }
}
