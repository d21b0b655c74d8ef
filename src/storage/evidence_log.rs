//! Evidence Audit Trail
//!
//! Writes hypotheses, executed steps and conclusions as individual pretty JSON
//! files so an investigation can be audited after the fact. Callers treat every
//! write as best effort.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use k8s_rca_core::sanitize_component;

use crate::models::{Conclusion, Finding, Hypothesis, NextStep, StepResult};
use crate::utils::error::AppResult;

/// Longest step description fragment used in a file name
const STEP_SUFFIX_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Hypotheses,
    InvestigationStep,
    Conclusion,
}

/// One file of the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub kind: EvidenceKind,
    pub timestamp: String,
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finding: Option<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<Hypothesis>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hypotheses: Vec<Hypothesis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<NextStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<Conclusion>,
}

impl EvidenceRecord {
    fn new(kind: EvidenceKind, component: &str) -> Self {
        Self {
            kind,
            timestamp: Utc::now().to_rfc3339(),
            component: component.to_string(),
            finding: None,
            hypothesis: None,
            hypotheses: Vec::new(),
            step: None,
            result: None,
            conclusion: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvidenceLogger {
    dir: PathBuf,
}

impl EvidenceLogger {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_hypothesis(
        &self,
        component: &str,
        finding: &Finding,
        hypotheses: &[Hypothesis],
    ) -> AppResult<PathBuf> {
        let mut record = EvidenceRecord::new(EvidenceKind::Hypotheses, component);
        record.finding = Some(finding.clone());
        record.hypotheses = hypotheses.to_vec();
        self.write(component, "hypotheses", &record)
    }

    pub fn log_investigation_step(
        &self,
        component: &str,
        hypothesis: &Hypothesis,
        step: &NextStep,
        result: &StepResult,
    ) -> AppResult<PathBuf> {
        let mut record = EvidenceRecord::new(EvidenceKind::InvestigationStep, component);
        record.hypothesis = Some(hypothesis.clone());
        record.step = Some(step.clone());
        record.result = Some(result.clone());

        let fragment: String = step.description.chars().take(STEP_SUFFIX_CHARS).collect();
        let suffix = format!("step_{}", sanitize_component(&fragment));
        self.write(component, &suffix, &record)
    }

    pub fn log_conclusion(
        &self,
        component: &str,
        hypothesis: &Hypothesis,
        conclusion: &Conclusion,
    ) -> AppResult<PathBuf> {
        let mut record = EvidenceRecord::new(EvidenceKind::Conclusion, component);
        record.hypothesis = Some(hypothesis.clone());
        record.conclusion = Some(conclusion.clone());
        self.write(component, "conclusion", &record)
    }

    /// Step records logged for `component` while testing the given hypothesis,
    /// oldest first.
    pub fn evidence_for_hypothesis(
        &self,
        component: &str,
        hypothesis_description: &str,
    ) -> AppResult<Vec<EvidenceRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("_{}_step_", sanitize_component(component));
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.contains(&prefix) && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut records = Vec::new();
        for path in paths {
            let content = fs::read_to_string(&path)?;
            // Foreign or half-written files are skipped
            let Ok(record) = serde_json::from_str::<EvidenceRecord>(&content) else {
                continue;
            };
            let matches = record
                .hypothesis
                .as_ref()
                .map(|h| h.description == hypothesis_description)
                .unwrap_or(false);
            if record.kind == EvidenceKind::InvestigationStep
                && record.component == component
                && matches
            {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn write(&self, component: &str, suffix: &str, record: &EvidenceRecord) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let file_name = format!(
            "{}_{}_{}_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S"),
            sanitize_component(component),
            suffix,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let path = self.dir.join(file_name);
        fs::write(&path, serde_json::to_string_pretty(record)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Assessment, EvidenceAnalysis, Priority, Severity, StepAction};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn finding() -> Finding {
        Finding::new(
            "Pod/database-xyz",
            "Container in CrashLoopBackOff with 5 restarts",
            Severity::High,
            "",
            "",
        )
    }

    fn step_result(step: &NextStep) -> StepResult {
        StepResult {
            step: step.clone(),
            executed_at: Utc::now(),
            evidence: BTreeMap::new(),
            analysis: EvidenceAnalysis {
                assessment: Assessment::Supported,
                confidence: 0.8,
                next_steps: Vec::new(),
                conclusion: None,
            },
        }
    }

    #[test]
    fn test_file_names_are_sanitized() {
        let dir = tempdir().unwrap();
        let logger = EvidenceLogger::new(dir.path().join("evidence"));
        let path = logger
            .log_hypothesis("Pod/database-xyz", &finding(), &[Hypothesis::new("OOM", 0.7)])
            .unwrap();

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.contains("_Pod_database_xyz_hypotheses_"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_same_second_writes_do_not_collide() {
        let dir = tempdir().unwrap();
        let logger = EvidenceLogger::new(dir.path().to_path_buf());
        let hypothesis = Hypothesis::new("OOM", 0.7);
        let conclusion = Conclusion::new("Memory limit too low", 0.9);
        let a = logger.log_conclusion("Pod/a", &hypothesis, &conclusion).unwrap();
        let b = logger.log_conclusion("Pod/a", &hypothesis, &conclusion).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_evidence_for_hypothesis_filters_by_description() {
        let dir = tempdir().unwrap();
        let logger = EvidenceLogger::new(dir.path().to_path_buf());
        let oom = Hypothesis::new("Memory limit too low", 0.7);
        let dns = Hypothesis::new("DNS resolution failing", 0.4);
        let step = NextStep::new("Check logs for the pod", StepAction::FetchLogs, Priority::High);

        logger
            .log_investigation_step("Pod/db", &oom, &step, &step_result(&step))
            .unwrap();
        logger
            .log_investigation_step("Pod/db", &dns, &step, &step_result(&step))
            .unwrap();
        logger
            .log_conclusion("Pod/db", &oom, &Conclusion::new("x", 0.9))
            .unwrap();

        let records = logger
            .evidence_for_hypothesis("Pod/db", "Memory limit too low")
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, EvidenceKind::InvestigationStep);
        assert_eq!(records[0].step.as_ref().unwrap().action, StepAction::FetchLogs);
    }

    #[test]
    fn test_missing_dir_has_no_evidence() {
        let dir = tempdir().unwrap();
        let logger = EvidenceLogger::new(dir.path().join("never-created"));
        assert!(logger.evidence_for_hypothesis("Pod/x", "y").unwrap().is_empty());
    }
}
