//! Analysis Coordinator
//!
//! Runs the analyzers against one namespace and correlates what they found.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{sort_by_severity, Finding, Severity};
use crate::services::agents::{analyzer_for, AgentKind, AgentReport};
use crate::services::cluster::ClusterClient;

/// Which analyzers a run includes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisSelection {
    All,
    Only(AgentKind),
}

impl AnalysisSelection {
    pub fn kinds(&self) -> Vec<AgentKind> {
        match self {
            AnalysisSelection::All => AgentKind::ALL.to_vec(),
            AnalysisSelection::Only(kind) => vec![*kind],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationType {
    /// One finding, nothing to correlate with
    Single,
    /// Several findings about the same component
    Component,
}

/// Findings about one component, possibly from several analyzers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedGroup {
    pub component: String,
    pub severity: Severity,
    pub correlation_type: CorrelationType,
    pub findings: Vec<Finding>,
}

impl CorrelatedGroup {
    pub fn agents(&self) -> Vec<&str> {
        let mut agents: Vec<&str> = Vec::new();
        for agent in self.findings.iter().filter_map(|f| f.agent.as_deref()) {
            if !agents.contains(&agent) {
                agents.push(agent);
            }
        }
        agents
    }
}

/// Result of one coordinated run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatedAnalysis {
    pub namespace: String,
    pub reports: Vec<AgentReport>,
    pub groups: Vec<CorrelatedGroup>,
    pub root_causes: Vec<CorrelatedGroup>,
}

impl CoordinatedAnalysis {
    pub fn findings(&self) -> Vec<Finding> {
        self.reports
            .iter()
            .flat_map(|r| r.findings.iter().cloned())
            .collect()
    }

    pub fn prioritized_findings(&self) -> Vec<Finding> {
        prioritized_findings(self.findings())
    }
}

pub struct Coordinator {
    cluster: Arc<dyn ClusterClient>,
    log_tail_lines: u32,
}

impl Coordinator {
    pub fn new(cluster: Arc<dyn ClusterClient>, log_tail_lines: u32) -> Self {
        Self {
            cluster,
            log_tail_lines,
        }
    }

    /// Run the selected analyzers concurrently. Reports come back in analyzer
    /// order whatever order they finish in.
    pub async fn run(&self, namespace: &str, selection: AnalysisSelection) -> CoordinatedAnalysis {
        let analyzers: Vec<_> = selection
            .kinds()
            .into_iter()
            .map(|kind| analyzer_for(kind, self.log_tail_lines))
            .collect();

        let cluster = self.cluster.as_ref();
        let reports: Vec<AgentReport> = join_all(
            analyzers
                .iter()
                .map(|analyzer| analyzer.analyze(cluster, namespace)),
        )
        .await;

        let findings: Vec<Finding> = reports
            .iter()
            .flat_map(|r| r.findings.iter().cloned())
            .collect();
        let groups = correlate_findings(&findings);
        let root_causes = identify_root_causes(&groups);

        info!(
            namespace,
            analyzers = reports.len(),
            findings = findings.len(),
            groups = groups.len(),
            root_causes = root_causes.len(),
            "Coordinated analysis finished"
        );

        CoordinatedAnalysis {
            namespace: namespace.to_string(),
            reports,
            groups,
            root_causes,
        }
    }
}

/// Key findings are correlated on: `Kind/name`, so container-level findings
/// join their pod. Free-form components are used as they are.
fn correlation_key(finding: &Finding) -> String {
    match finding.kind_and_name() {
        Some((kind, name)) => format!("{}/{}", kind, name),
        None => finding.component.clone(),
    }
}

/// Group findings by component, most severe group first. Groups of equal
/// severity keep the order their components were first seen in.
pub fn correlate_findings(findings: &[Finding]) -> Vec<CorrelatedGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<CorrelatedGroup> = Vec::new();

    for finding in findings {
        let key = correlation_key(finding);
        match index.get(&key) {
            Some(&i) => {
                let group = &mut groups[i];
                group.severity = group.severity.min(finding.severity);
                group.findings.push(finding.clone());
                group.correlation_type = CorrelationType::Component;
            }
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(CorrelatedGroup {
                    component: key,
                    severity: finding.severity,
                    correlation_type: CorrelationType::Single,
                    findings: vec![finding.clone()],
                });
            }
        }
    }

    for group in &mut groups {
        sort_by_severity(&mut group.findings);
    }
    groups.sort_by_key(|g| g.severity);
    groups
}

/// Urgent groups backed by more than one finding
pub fn identify_root_causes(groups: &[CorrelatedGroup]) -> Vec<CorrelatedGroup> {
    groups
        .iter()
        .filter(|g| g.severity.is_urgent() && g.findings.len() > 1)
        .cloned()
        .collect()
}

/// All findings, critical first; equal severities keep their input order
pub fn prioritized_findings(mut findings: Vec<Finding>) -> Vec<Finding> {
    sort_by_severity(&mut findings);
    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(component: &str, severity: Severity, agent: &str) -> Finding {
        Finding::new(component, "issue", severity, "", "").with_agent(agent)
    }

    #[test]
    fn test_correlation_merges_container_findings_into_pod() {
        let findings = vec![
            finding("Pod/db-0/postgres", Severity::Medium, "logs"),
            finding("Service/web", Severity::Low, "topology"),
            finding("Pod/db-0", Severity::High, "resources"),
        ];
        let groups = correlate_findings(&findings);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].component, "Pod/db-0");
        assert_eq!(groups[0].severity, Severity::High);
        assert_eq!(groups[0].correlation_type, CorrelationType::Component);
        assert_eq!(groups[0].findings[0].severity, Severity::High);
        assert_eq!(groups[0].agents(), vec!["resources", "logs"]);
        assert_eq!(groups[1].correlation_type, CorrelationType::Single);
    }

    #[test]
    fn test_groups_sorted_by_severity() {
        let findings = vec![
            finding("A/1", Severity::Info, "x"),
            finding("B/1", Severity::Critical, "x"),
            finding("C/1", Severity::Low, "x"),
            finding("D/1", Severity::High, "x"),
        ];
        let severities: Vec<Severity> = correlate_findings(&findings)
            .iter()
            .map(|g| g.severity)
            .collect();
        assert_eq!(
            severities,
            vec![Severity::Critical, Severity::High, Severity::Low, Severity::Info]
        );
    }

    #[test]
    fn test_root_causes_need_urgency_and_corroboration() {
        let findings = vec![
            finding("Pod/a", Severity::High, "resources"),
            finding("Pod/a", Severity::Medium, "events"),
            finding("Pod/b", Severity::Critical, "resources"),
            finding("Pod/c", Severity::Medium, "resources"),
            finding("Pod/c", Severity::Low, "logs"),
        ];
        let roots = identify_root_causes(&correlate_findings(&findings));
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].component, "Pod/a");
    }

    #[test]
    fn test_free_form_components_are_kept() {
        let findings = vec![finding("Service Architecture", Severity::Medium, "topology")];
        assert_eq!(correlate_findings(&findings)[0].component, "Service Architecture");
    }
}
