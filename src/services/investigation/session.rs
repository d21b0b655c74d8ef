//! Investigation Session
//!
//! The interactive state machine:
//! `component_selection -> hypothesis_generation -> investigation -> conclusion`.
//!
//! The store is the only source of truth. Every operation reloads the session
//! state, validates the stage and applies its transition inside one store
//! transaction, so a reader never sees half a transition. History only grows:
//! each transition records its entry before the stage changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::engine::RcaEngine;
use crate::models::{
    Conclusion, DiagnosticKind, DiagnosticStep, Finding, HistoryData, HistoryEntry, HistoryStage,
    Hypothesis, InvestigationPlan, NextStep, SessionStage, SessionState, StepResult,
    sort_by_severity,
};
use crate::storage::{EvidenceLogger, InvestigationStore};
use crate::utils::error::{AppError, AppResult};

/// Where a transition left the session, plus any non-blocking problems
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub stage: SessionStage,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl TransitionOutcome {
    fn at(stage: SessionStage) -> Self {
        Self {
            stage,
            warnings: Vec::new(),
        }
    }
}

/// Findings sharing a component prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentGroup {
    pub name: String,
    pub findings: Vec<Finding>,
}

/// Everything the investigation stage renders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationView {
    pub component: String,
    pub finding: Finding,
    pub hypothesis: Hypothesis,
    pub plan: InvestigationPlan,
    pub results: Vec<StepResult>,
    /// Steps that can be executed next
    pub next_steps: Vec<NextStep>,
    pub pending_conclusion: Option<Conclusion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConclusionView {
    pub component: String,
    pub finding: Finding,
    pub hypothesis: Hypothesis,
    pub conclusion: Conclusion,
}

/// Handle on one investigation's state machine
#[derive(Clone)]
pub struct InvestigationSession {
    id: String,
    store: InvestigationStore,
}

impl InvestigationSession {
    pub fn new(id: impl Into<String>, store: InvestigationStore) -> Self {
        Self {
            id: id.into(),
            store,
        }
    }

    /// Handle on an existing investigation
    pub fn open(id: &str, store: InvestigationStore) -> AppResult<Self> {
        store.require(id)?;
        Ok(Self::new(id, store))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> AppResult<SessionState> {
        Ok(self.store.require(&self.id)?.session)
    }

    /// Record the initial findings and go to component selection. History is kept.
    pub fn start(&self, findings: Vec<Finding>) -> AppResult<TransitionOutcome> {
        let count = findings.len();
        let outcome = self.store.update_session(&self.id, |state| {
            state.record(HistoryData::Initial { findings });
            state.stage = SessionStage::ComponentSelection;
            state.selected_component = None;
            state.current_hypothesis = None;
            Ok(TransitionOutcome::at(state.stage))
        })?;
        info!(investigation_id = %self.id, findings = count, "Investigation session started");
        Ok(outcome)
    }

    /// Latest initial findings grouped by component prefix, each group most
    /// severe first
    pub fn component_groups(&self) -> AppResult<Vec<ComponentGroup>> {
        Ok(group_findings(self.snapshot()?.initial_findings()))
    }

    /// Findings in the order `component_groups` lists them
    pub fn numbered_findings(&self) -> AppResult<Vec<Finding>> {
        Ok(self
            .component_groups()?
            .into_iter()
            .flat_map(|g| g.findings)
            .collect())
    }

    pub async fn select_finding(
        &self,
        engine: &RcaEngine,
        finding: &Finding,
    ) -> AppResult<TransitionOutcome> {
        require_stage(&self.snapshot()?, &[SessionStage::ComponentSelection], "select a finding")?;

        let component = finding.component.clone();
        let hypotheses = engine.generate_hypotheses(&component, finding).await;

        let mut outcome = self.store.update_session(&self.id, |state| {
            require_stage(state, &[SessionStage::ComponentSelection], "select a finding")?;
            state.record(HistoryData::ComponentSelection {
                component: component.clone(),
                finding: finding.clone(),
                hypotheses: hypotheses.clone(),
            });
            state.selected_component = Some(component.clone());
            state.current_hypothesis = None;
            state.stage = SessionStage::HypothesisGeneration;
            Ok(TransitionOutcome::at(state.stage))
        })?;

        if let Some(logger) = engine.evidence_log() {
            if let Err(e) = logger.log_hypothesis(&component, finding, &hypotheses) {
                warn!(investigation_id = %self.id, error = %e, "Failed to log hypotheses");
                outcome.warnings.push(format!("Could not log hypotheses: {}", e));
            }
        }

        info!(
            investigation_id = %self.id,
            component = %component,
            hypotheses = hypotheses.len(),
            "Finding selected"
        );
        Ok(outcome)
    }

    /// Open candidates: the latest selection or rejection record wins
    pub fn candidate_hypotheses(&self) -> AppResult<Vec<Hypothesis>> {
        Ok(candidates(&self.snapshot()?))
    }

    pub async fn select_hypothesis(
        &self,
        engine: &RcaEngine,
        index: usize,
    ) -> AppResult<TransitionOutcome> {
        let state = self.snapshot()?;
        require_stage(&state, &[SessionStage::HypothesisGeneration], "select a hypothesis")?;
        let (component, finding) = branch_origin(&state)?;
        let hypothesis = candidates(&state)
            .into_iter()
            .nth(index)
            .ok_or_else(|| AppError::validation(format!("No hypothesis #{}", index + 1)))?;
        let branch_len = state.history.len();

        let plan = engine
            .get_investigation_plan(&component, &finding, &hypothesis)
            .await;

        let outcome = self.store.update_session(&self.id, |state| {
            require_stage(state, &[SessionStage::HypothesisGeneration], "select a hypothesis")?;
            if state.history.len() != branch_len {
                return Err(AppError::validation(
                    "Hypotheses changed while the plan was being prepared",
                ));
            }
            state.record(HistoryData::HypothesisSelection {
                component: component.clone(),
                finding: finding.clone(),
                hypothesis: hypothesis.clone(),
                plan,
            });
            state.diagnostic_path.push(DiagnosticStep::new(
                DiagnosticKind::Hypothesis,
                hypothesis.description.clone(),
            ));
            state.current_hypothesis = Some(hypothesis.clone());
            state.stage = SessionStage::Investigation;
            Ok(TransitionOutcome::at(state.stage))
        })?;

        info!(
            investigation_id = %self.id,
            component = %component,
            hypothesis = %hypothesis.description,
            "Hypothesis selected"
        );
        Ok(outcome)
    }

    pub fn investigation_view(&self) -> AppResult<InvestigationView> {
        investigation_view_of(&self.snapshot()?)
    }

    /// Execute runnable step `index`. A result carrying a conclusion moves the
    /// session straight to the conclusion stage.
    pub async fn execute_step(
        &self,
        engine: &RcaEngine,
        index: usize,
    ) -> AppResult<(StepResult, TransitionOutcome)> {
        let state = self.snapshot()?;
        require_stage(&state, &[SessionStage::Investigation], "execute a step")?;
        let view = investigation_view_of(&state)?;
        let step = view
            .next_steps
            .get(index)
            .cloned()
            .ok_or_else(|| AppError::validation(format!("No step #{}", index + 1)))?;
        let branch_len = state.history.len();

        let result = engine
            .execute_step(&view.component, &view.finding, &view.hypothesis, &step)
            .await;

        let outcome = self.store.update_session(&self.id, |state| {
            require_stage(state, &[SessionStage::Investigation], "execute a step")?;
            if state.history.len() != branch_len {
                return Err(AppError::validation(
                    "Investigation changed while the step was running",
                ));
            }
            state.record(HistoryData::InvestigationStep {
                component: view.component.clone(),
                finding: view.finding.clone(),
                hypothesis: view.hypothesis.clone(),
                step: step.clone(),
                result: result.clone(),
            });
            state.diagnostic_path.push(DiagnosticStep::new(
                DiagnosticKind::InvestigationStep,
                step.description.clone(),
            ));

            if let Some(conclusion) = result.conclusion() {
                state.record(HistoryData::Conclusion {
                    component: view.component.clone(),
                    finding: view.finding.clone(),
                    hypothesis: view.hypothesis.clone(),
                    conclusion: conclusion.clone(),
                });
                state.diagnostic_path.push(DiagnosticStep::new(
                    DiagnosticKind::Conclusion,
                    conclusion.text.clone(),
                ));
                state.stage = SessionStage::Conclusion;
            }
            Ok(TransitionOutcome::at(state.stage))
        })?;

        info!(
            investigation_id = %self.id,
            step = %step.description,
            stage = outcome.stage.as_str(),
            "Investigation step recorded"
        );
        Ok((result, outcome))
    }

    /// Confirm the pending conclusion. Evidence logging problems come back as
    /// warnings.
    pub fn accept_conclusion(
        &self,
        evidence_log: Option<&EvidenceLogger>,
    ) -> AppResult<TransitionOutcome> {
        let (mut outcome, accepted) = self.store.update_session(&self.id, |state| {
            require_stage(state, &[SessionStage::Investigation], "accept a conclusion")?;
            let view = investigation_view_of(state)?;
            let mut conclusion = view
                .pending_conclusion
                .clone()
                .ok_or_else(|| AppError::validation("There is no conclusion to accept yet"))?;
            conclusion.confirmed = true;

            state.record(HistoryData::Conclusion {
                component: view.component.clone(),
                finding: view.finding.clone(),
                hypothesis: view.hypothesis.clone(),
                conclusion: conclusion.clone(),
            });
            state.diagnostic_path.push(DiagnosticStep::new(
                DiagnosticKind::Conclusion,
                conclusion.text.clone(),
            ));
            state.stage = SessionStage::Conclusion;
            Ok((TransitionOutcome::at(state.stage), (view, conclusion)))
        })?;

        let (view, conclusion) = accepted;
        if let Some(logger) = evidence_log {
            if let Err(e) = logger.log_conclusion(&view.component, &view.hypothesis, &conclusion) {
                warn!(investigation_id = %self.id, error = %e, "Failed to log conclusion");
                outcome
                    .warnings
                    .push(format!("Conclusion accepted, but evidence logging failed: {}", e));
            }
        }

        info!(investigation_id = %self.id, component = %view.component, "Conclusion accepted");
        Ok(outcome)
    }

    /// Reject the hypothesis under investigation
    pub fn reject_hypothesis(&self) -> AppResult<TransitionOutcome> {
        self.reject_with(|state| {
            state
                .current_hypothesis
                .clone()
                .ok_or_else(|| AppError::validation("No hypothesis is selected"))
        })
    }

    /// Reject open candidate `index` without investigating it
    pub fn reject_candidate(&self, index: usize) -> AppResult<TransitionOutcome> {
        self.reject_with(|state| {
            candidates(state)
                .into_iter()
                .nth(index)
                .ok_or_else(|| AppError::validation(format!("No hypothesis #{}", index + 1)))
        })
    }

    fn reject_with<F>(&self, pick: F) -> AppResult<TransitionOutcome>
    where
        F: FnOnce(&SessionState) -> AppResult<Hypothesis>,
    {
        let outcome = self.store.update_session(&self.id, |state| {
            require_stage(
                state,
                &[SessionStage::Investigation, SessionStage::HypothesisGeneration],
                "reject a hypothesis",
            )?;
            let rejected = pick(state)?;
            let (component, finding) = branch_origin(state)?;
            let remaining = remaining_after(state, &rejected)?;

            let description = rejected.description.clone();
            let exhausted = remaining.is_empty();
            state.record(HistoryData::HypothesisRejection {
                component,
                finding,
                rejected,
                remaining,
            });
            state
                .diagnostic_path
                .push(DiagnosticStep::new(DiagnosticKind::Rejection, description));

            state.current_hypothesis = None;
            if exhausted {
                state.selected_component = None;
                state.stage = SessionStage::ComponentSelection;
            } else {
                state.stage = SessionStage::HypothesisGeneration;
            }
            Ok(TransitionOutcome::at(state.stage))
        })?;

        info!(
            investigation_id = %self.id,
            stage = outcome.stage.as_str(),
            "Hypothesis rejected"
        );
        Ok(outcome)
    }

    /// Most recent conclusion, confirmed or not
    pub fn conclusion_view(&self) -> AppResult<Option<ConclusionView>> {
        let state = self.snapshot()?;
        Ok(match state.latest_of(&[HistoryStage::Conclusion]) {
            Some((
                _,
                HistoryEntry {
                    data:
                        HistoryData::Conclusion {
                            component,
                            finding,
                            hypothesis,
                            conclusion,
                        },
                    ..
                },
            )) => Some(ConclusionView {
                component: component.clone(),
                finding: finding.clone(),
                hypothesis: hypothesis.clone(),
                conclusion: conclusion.clone(),
            }),
            _ => None,
        })
    }

    /// Back to component selection. History is kept.
    pub fn restart(&self) -> AppResult<TransitionOutcome> {
        let outcome = self.store.update_session(&self.id, |state| {
            state.stage = SessionStage::ComponentSelection;
            state.selected_component = None;
            state.current_hypothesis = None;
            state.diagnostic_path.clear();
            Ok(TransitionOutcome::at(state.stage))
        })?;
        info!(investigation_id = %self.id, "Investigation restarted");
        Ok(outcome)
    }

    /// Generate the report, record it and keep it as the investigation summary
    pub async fn generate_report(&self, engine: &RcaEngine) -> AppResult<String> {
        let state = self.snapshot()?;
        if state.history.is_empty() {
            return Err(AppError::validation(
                "Nothing to report: the investigation has no history yet",
            ));
        }

        let report = engine.generate_report(&state.history).await;

        self.store.transact(&self.id, |inv| {
            inv.session.record(HistoryData::Report {
                report: report.clone(),
            });
            inv.summary = report.clone();
            Ok(())
        })?;
        info!(investigation_id = %self.id, chars = report.len(), "Report generated");
        Ok(report)
    }
}

fn require_stage(state: &SessionState, allowed: &[SessionStage], action: &str) -> AppResult<()> {
    if allowed.contains(&state.stage) {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "Cannot {} during {}",
            action,
            state.stage.as_str()
        )))
    }
}

/// Group by component prefix before `/`, groups in name order
pub fn group_findings(findings: &[Finding]) -> Vec<ComponentGroup> {
    let mut groups: BTreeMap<String, Vec<Finding>> = BTreeMap::new();
    for finding in findings {
        groups
            .entry(finding.component_group().to_string())
            .or_default()
            .push(finding.clone());
    }
    groups
        .into_iter()
        .map(|(name, mut findings)| {
            sort_by_severity(&mut findings);
            ComponentGroup { name, findings }
        })
        .collect()
}

/// Candidate list of the latest selection or rejection record
fn candidates(state: &SessionState) -> Vec<Hypothesis> {
    match state.latest_of(&[
        HistoryStage::ComponentSelection,
        HistoryStage::HypothesisRejection,
    ]) {
        Some((_, entry)) => match &entry.data {
            HistoryData::ComponentSelection { hypotheses, .. } => hypotheses.clone(),
            HistoryData::HypothesisRejection { remaining, .. } => remaining.clone(),
            _ => Vec::new(),
        },
        None => Vec::new(),
    }
}

/// Index where the current branch starts: the last component selection
fn branch_start(state: &SessionState) -> AppResult<usize> {
    state
        .latest_of(&[HistoryStage::ComponentSelection])
        .map(|(idx, _)| idx)
        .ok_or_else(|| AppError::validation("No component has been selected"))
}

/// The branch's original selection record, found scanning forward
fn branch_selection(state: &SessionState) -> AppResult<(&String, &Finding, &Vec<Hypothesis>)> {
    let start = branch_start(state)?;
    match state.first_from(start, |e| e.stage() == HistoryStage::ComponentSelection) {
        Some((
            _,
            HistoryEntry {
                data:
                    HistoryData::ComponentSelection {
                        component,
                        finding,
                        hypotheses,
                    },
                ..
            },
        )) => Ok((component, finding, hypotheses)),
        _ => Err(AppError::validation("No component has been selected")),
    }
}

fn branch_origin(state: &SessionState) -> AppResult<(String, Finding)> {
    let (component, finding, _) = branch_selection(state)?;
    Ok((component.clone(), finding.clone()))
}

/// Original candidates minus everything rejected in this branch, including `rejected`
fn remaining_after(state: &SessionState, rejected: &Hypothesis) -> AppResult<Vec<Hypothesis>> {
    let start = branch_start(state)?;
    let (_, _, original) = branch_selection(state)?;

    let mut gone: Vec<&Hypothesis> = state.history[start..]
        .iter()
        .filter_map(|e| match &e.data {
            HistoryData::HypothesisRejection { rejected, .. } => Some(rejected),
            _ => None,
        })
        .collect();
    gone.push(rejected);

    Ok(original
        .iter()
        .filter(|h| !gone.iter().any(|r| r.same_as(h)))
        .cloned()
        .collect())
}

fn investigation_view_of(state: &SessionState) -> AppResult<InvestigationView> {
    let (start, entry) = state
        .latest_of(&[HistoryStage::HypothesisSelection])
        .ok_or_else(|| AppError::validation("No hypothesis has been selected"))?;
    let HistoryData::HypothesisSelection {
        component,
        finding,
        hypothesis,
        plan,
    } = &entry.data
    else {
        return Err(AppError::internal("History entry does not match its stage"));
    };

    let results: Vec<StepResult> = state.history[start + 1..]
        .iter()
        .filter_map(|e| match &e.data {
            HistoryData::InvestigationStep { result, .. } => Some(result.clone()),
            _ => None,
        })
        .collect();

    let next_steps = match results.last() {
        Some(last) if !last.analysis.next_steps.is_empty() => last.analysis.next_steps.clone(),
        _ => plan.next_steps.clone(),
    };
    let pending_conclusion = results
        .last()
        .and_then(|r| r.conclusion().cloned())
        .or_else(|| plan.conclusion.clone());

    Ok(InvestigationView {
        component: component.clone(),
        finding: finding.clone(),
        hypothesis: hypothesis.clone(),
        plan: plan.clone(),
        results,
        next_steps,
        pending_conclusion,
    })
}
