//! Shared fixtures: a scripted model provider and an in-memory cluster

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use k8s_rca::models::{Finding, Severity};
use k8s_rca::services::cluster::{resource_name, ClusterClient, ClusterError, ClusterResult};
use k8s_rca::services::investigation::{EngineOptions, RcaEngine};
use k8s_rca::storage::{open_in_memory_pool, InvestigationStore};
use k8s_rca_llm::{
    LlmError, LlmProvider, LlmRequestOptions, LlmResponse, LlmResult, Message,
};

// ============================================================================
// Model provider
// ============================================================================

/// Replays queued responses in order and records every request
pub struct MockLlmProvider {
    responses: Mutex<Vec<LlmResult<LlmResponse>>>,
    requests: Mutex<Vec<(Option<String>, String)>>,
    delay: Option<Duration>,
    health: Option<LlmError>,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<LlmResult<LlmResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            delay: None,
            health: None,
        }
    }

    pub fn with_texts(texts: &[&str]) -> Self {
        Self::new(
            texts
                .iter()
                .map(|t| Ok(LlmResponse::from_text(*t, "mock-model")))
                .collect(),
        )
    }

    /// Sleep before answering, to exercise timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail health checks with `err`
    pub fn with_health_error(mut self, err: LlmError) -> Self {
        self.health = Some(err);
        self
    }

    /// `(system, user)` pairs in request order
    pub fn requests(&self) -> Vec<(Option<String>, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        _request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let user = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.requests.lock().unwrap().push((system, user));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::Other {
                message: "No more mock responses available".to_string(),
            });
        }
        responses.remove(0)
    }

    async fn health_check(&self) -> LlmResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.health {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Cluster
// ============================================================================

/// Serves fixed resources; `unavailable` makes every call fail
#[derive(Default)]
pub struct FakeCluster {
    pub pods: Vec<Value>,
    pub services: Vec<Value>,
    pub deployments: Vec<Value>,
    pub events: Vec<Value>,
    pub endpoints: Vec<Value>,
    pub pvcs: Vec<Value>,
    pub nodes: Vec<Value>,
    pub logs: HashMap<String, String>,
    pub unavailable: bool,
    pub commands: Mutex<Vec<Vec<String>>>,
}

impl FakeCluster {
    fn check(&self) -> ClusterResult<()> {
        if self.unavailable {
            Err(ClusterError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn list(&self, items: &[Value]) -> ClusterResult<Vec<Value>> {
        self.check()?;
        Ok(items.to_vec())
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_pods(&self, _namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list(&self.pods)
    }

    async fn get_pod(&self, _namespace: &str, name: &str) -> ClusterResult<Option<Value>> {
        self.check()?;
        Ok(self.pods.iter().find(|p| resource_name(p) == name).cloned())
    }

    async fn get_services(&self, _namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list(&self.services)
    }

    async fn get_deployments(&self, _namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list(&self.deployments)
    }

    async fn get_events(
        &self,
        _namespace: &str,
        field_selector: Option<&str>,
    ) -> ClusterResult<Vec<Value>> {
        self.check()?;
        let events = match field_selector.and_then(|s| s.strip_prefix("involvedObject.name=")) {
            Some(name) => self
                .events
                .iter()
                .filter(|e| e.pointer("/involvedObject/name").and_then(Value::as_str) == Some(name))
                .cloned()
                .collect(),
            None => self.events.clone(),
        };
        Ok(events)
    }

    async fn get_pod_logs(
        &self,
        _namespace: &str,
        pod: &str,
        _container: Option<&str>,
        _tail_lines: u32,
    ) -> ClusterResult<String> {
        self.check()?;
        self.logs
            .get(pod)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("pod {}", pod)))
    }

    async fn get_pod_metrics(&self, _namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list(&[])
    }

    async fn get_node_metrics(&self) -> ClusterResult<Vec<Value>> {
        self.list(&[])
    }

    async fn get_network_policies(&self, _namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list(&[])
    }

    async fn get_endpoints(&self, _namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list(&self.endpoints)
    }

    async fn get_hpas(&self, _namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list(&[])
    }

    async fn get_nodes(&self) -> ClusterResult<Vec<Value>> {
        self.list(&self.nodes)
    }

    async fn get_ingresses(&self, _namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list(&[])
    }

    async fn get_pvcs(&self, _namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list(&self.pvcs)
    }

    async fn describe(&self, kind: &str, name: &str, namespace: &str) -> ClusterResult<String> {
        self.check()?;
        Ok(format!("Name: {}\nNamespace: {}\nKind: {}\n", name, namespace, kind))
    }

    async fn run_read_only(&self, args: &[String]) -> ClusterResult<String> {
        self.check()?;
        self.commands.lock().unwrap().push(args.to_vec());
        Ok(format!("ran: {}", args.join(" ")))
    }
}

/// Namespace with a crash-looping database pod and a healthy web pod
pub fn microservices_cluster() -> FakeCluster {
    let mut logs = HashMap::new();
    logs.insert(
        "database-xyz".to_string(),
        "FATAL: out of memory\nERROR: could not allocate shared memory segment\n".to_string(),
    );

    FakeCluster {
        pods: vec![
            json!({
                "metadata": {"name": "database-xyz", "labels": {"app": "database"}},
                "status": {
                    "phase": "Running",
                    "conditions": [{"type": "Ready", "status": "False"}],
                    "containerStatuses": [{
                        "name": "postgres",
                        "ready": false,
                        "restartCount": 5,
                        "state": {"waiting": {"reason": "CrashLoopBackOff"}},
                        "lastState": {"terminated": {"exitCode": 1, "reason": "Error"}}
                    }]
                }
            }),
            json!({
                "metadata": {"name": "web-1", "labels": {"app": "web"}},
                "status": {
                    "phase": "Running",
                    "conditions": [{"type": "Ready", "status": "True"}],
                    "containerStatuses": [{"name": "nginx", "ready": true, "restartCount": 0}]
                }
            }),
        ],
        events: vec![json!({
            "type": "Warning",
            "reason": "BackOff",
            "message": "Back-off restarting failed container",
            "count": 12,
            "involvedObject": {"kind": "Pod", "name": "database-xyz"}
        })],
        logs,
        ..Default::default()
    }
}

pub fn crashloop_finding() -> Finding {
    Finding::new(
        "Pod/database-xyz",
        "Container in CrashLoopBackOff with 5 restarts",
        Severity::High,
        "Last exit code: 1",
        "Check the container logs",
    )
}

pub fn memory_store() -> InvestigationStore {
    InvestigationStore::new(open_in_memory_pool().unwrap()).unwrap()
}

pub fn engine(llm: Arc<MockLlmProvider>, cluster: Arc<FakeCluster>, namespace: &str) -> RcaEngine {
    RcaEngine::new(llm, cluster, namespace, EngineOptions::default())
}

pub fn engine_with_timeout(
    llm: Arc<MockLlmProvider>,
    cluster: Arc<FakeCluster>,
    timeout: Duration,
) -> RcaEngine {
    let options = EngineOptions {
        llm_timeout: timeout,
        ..EngineOptions::default()
    };
    RcaEngine::new(llm, cluster, "default", options)
}
