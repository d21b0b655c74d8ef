//! Application State
//!
//! Holds the services one CLI invocation needs and hands out the
//! per-investigation handles built on top of them.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use k8s_rca_llm::{create_provider, LlmError, LlmProvider};

use crate::models::settings::AppConfig;
use crate::models::Finding;
use crate::services::assistant::Assistant;
use crate::services::cluster::{ClusterClient, KubectlClient};
use crate::services::coordinator::{AnalysisSelection, CoordinatedAnalysis, Coordinator};
use crate::services::investigation::{EngineOptions, InvestigationSession, RcaEngine};
use crate::storage::{
    open_pool, ConfigService, EvidenceLogger, InvestigationStore, PromptLogger,
};
use crate::utils::error::AppResult;
use crate::utils::paths::{database_path, ensure_dir, evidence_dir, prompt_log_path};

/// Result of probing the model provider and the cluster
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub provider: String,
    pub model: String,
    pub llm_error: Option<String>,
    pub cluster_error: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.llm_error.is_none() && self.cluster_error.is_none()
    }
}

/// Services shared by every command
pub struct AppState {
    config: AppConfig,
    store: InvestigationStore,
    cluster: Arc<dyn ClusterClient>,
    llm: Arc<dyn LlmProvider>,
    prompt_log: Option<PromptLogger>,
    evidence_log: Option<EvidenceLogger>,
}

impl AppState {
    /// Load the config (default location unless `config_path` is given), open
    /// the data directory and build the services it describes
    pub fn initialize(config_path: Option<&Path>) -> AppResult<Self> {
        let config_service = match config_path {
            Some(path) => ConfigService::open(path)?,
            None => ConfigService::new()?,
        };
        let data_dir = config_service.data_dir()?;
        ensure_dir(&data_dir)?;

        let config = config_service.get_config().clone();
        let store = InvestigationStore::new(open_pool(&database_path(&data_dir))?)?;
        let cluster: Arc<dyn ClusterClient> = Arc::new(KubectlClient::new(&config.cluster));
        let llm = create_provider(config.llm.provider_config())?;

        let prompt_log = config
            .storage
            .prompt_log
            .then(|| PromptLogger::new(prompt_log_path(&data_dir)));
        let evidence_log = if config.storage.evidence_log {
            let dir = evidence_dir(&data_dir);
            ensure_dir(&dir)?;
            Some(EvidenceLogger::new(dir))
        } else {
            None
        };

        debug!(
            config = %config_service.path().display(),
            data_dir = %data_dir.display(),
            provider = llm.name(),
            "Application state initialized"
        );

        Ok(Self {
            config,
            store,
            cluster,
            llm,
            prompt_log,
            evidence_log,
        })
    }

    /// Assemble state from ready-made services
    pub fn from_parts(
        config: AppConfig,
        store: InvestigationStore,
        cluster: Arc<dyn ClusterClient>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            config,
            store,
            cluster,
            llm,
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

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &InvestigationStore {
        &self.store
    }

    pub fn evidence_log(&self) -> Option<&EvidenceLogger> {
        self.evidence_log.as_ref()
    }

    /// Engine bound to one namespace
    pub fn engine(&self, namespace: &str) -> RcaEngine {
        let mut engine = RcaEngine::new(
            self.llm.clone(),
            self.cluster.clone(),
            namespace,
            EngineOptions::from_config(&self.config),
        );
        if let Some(logger) = &self.prompt_log {
            engine = engine.with_prompt_log(logger.clone());
        }
        if let Some(logger) = &self.evidence_log {
            engine = engine.with_evidence_log(logger.clone());
        }
        engine
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(self.cluster.clone(), self.config.cluster.log_tail_lines)
    }

    pub fn session(&self, investigation_id: &str) -> AppResult<InvestigationSession> {
        InvestigationSession::open(investigation_id, self.store.clone())
    }

    pub fn assistant(&self, namespace: &str) -> Assistant {
        Assistant::new(self.store.clone(), self.engine(namespace))
    }

    /// Probe the model provider and the cluster. Failures are reported, not
    /// returned, and the outcome goes to the prompt log as a system event.
    pub async fn check(&self) -> HealthReport {
        let timeout = EngineOptions::from_config(&self.config).llm_timeout;
        let llm_error = match tokio::time::timeout(timeout, self.llm.health_check()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(
                LlmError::Timeout {
                    seconds: timeout.as_secs(),
                }
                .to_string(),
            ),
        };
        let cluster_error = self
            .cluster
            .run_read_only(&["version".to_string()])
            .await
            .err()
            .map(|e| e.to_string());

        let report = HealthReport {
            provider: self.llm.name().to_string(),
            model: self.llm.model().to_string(),
            llm_error,
            cluster_error,
        };
        if let Some(logger) = &self.prompt_log {
            let metadata = json!({
                "provider": report.provider,
                "model": report.model,
                "llm_error": report.llm_error,
                "cluster_error": report.cluster_error,
            });
            if let Err(e) = logger.log_system_event("health_check", metadata) {
                warn!(error = %e, "Failed to write prompt log");
            }
        }
        info!(healthy = report.is_healthy(), provider = %report.provider, "Health check finished");
        report
    }

    /// Run the analyzers for an investigation, store what they found and start
    /// its session on the prioritized findings
    pub async fn analyze(
        &self,
        investigation_id: &str,
        selection: AnalysisSelection,
    ) -> AppResult<CoordinatedAnalysis> {
        let investigation = self.store.require(investigation_id)?;
        let analysis = self
            .coordinator()
            .run(&investigation.namespace, selection)
            .await;

        for report in &analysis.reports {
            self.store.add_agent_findings(
                investigation_id,
                report.agent.as_str(),
                serde_json::to_value(report)?,
            )?;
        }
        self.store.add_evidence(
            investigation_id,
            "correlation",
            json!({
                "groups": analysis.groups,
                "root_causes": analysis.root_causes,
            }),
        )?;

        let findings = analysis.prioritized_findings();
        self.store.add_accumulated_findings(
            investigation_id,
            findings.iter().map(Finding::summary).collect(),
        )?;
        self.session(investigation_id)?.start(findings)?;

        info!(
            investigation_id,
            namespace = %investigation.namespace,
            reports = analysis.reports.len(),
            "Analysis stored"
        );
        Ok(analysis)
    }
}
