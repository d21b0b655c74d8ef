//! Investigation Prompts
//!
//! System prompts and user messages for the four model calls of an
//! investigation: hypotheses, plan, evidence analysis and report.

use crate::models::{parse_component, Finding, Hypothesis};

/// `(kind, name)` for prompts; free-form components become `Resource/<component>`
fn prompt_kind_and_name(component: &str) -> (&str, &str) {
    parse_component(component).unwrap_or(("Resource", component))
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.trim().is_empty() {
        placeholder
    } else {
        value
    }
}

/// System prompt for hypothesis generation.
pub fn build_hypotheses_system_prompt() -> String {
    r#"You are a Kubernetes Root Cause Analysis Expert.
Your task is to generate potential root cause hypotheses for a specific Kubernetes component issue.
For each hypothesis:
1. Provide a clear description of the potential root cause
2. Assign a confidence score (0.0-1.0) based on how likely this hypothesis is given the evidence
3. Suggest investigation steps to confirm or rule out this hypothesis
4. List any related components that might be affected

Think broadly about different categories of potential causes:
- Application issues (code bugs, misconfigurations)
- Resource constraints (CPU, memory, disk)
- Networking issues (connectivity, DNS, service discovery)
- Configuration issues (environment variables, secrets, ConfigMaps)
- Infrastructure issues (node problems, scheduling)
- Security issues (permissions, RBAC, admission policies)

Respond with ONLY a JSON object of this shape:
{
  "hypotheses": [
    {
      "description": "Clear description of the potential root cause",
      "confidence": 0.8,
      "investigation_steps": ["Step 1 to investigate", "Step 2 to investigate"],
      "related_components": ["Service/database", "PersistentVolumeClaim/data"]
    }
  ]
}"#
    .to_string()
}

pub fn build_hypotheses_user_message(component: &str, finding: &Finding) -> String {
    let (kind, name) = prompt_kind_and_name(component);
    format!(
        "## Kubernetes Issue Details\n\n\
         **Component Type:** {}\n\
         **Component Name:** {}\n\
         **Issue:** {}\n\
         **Severity:** {}\n\
         **Evidence:** {}\n\n\
         Based on this information, generate 3-5 potential root cause hypotheses that might explain the observed issue.\n\
         For each hypothesis, provide a confidence score, investigation steps, and related components.",
        kind,
        name,
        or_placeholder(&finding.issue, "Unknown issue"),
        finding.severity,
        or_placeholder(&finding.evidence, "No additional evidence"),
    )
}

/// System prompt for building an investigation plan.
pub fn build_plan_system_prompt() -> String {
    r#"You are a Kubernetes Root Cause Analysis Expert.
Your task is to create a detailed investigation plan to confirm or rule out a specific hypothesis
about a Kubernetes component issue.

Include the following in your investigation plan:
1. A list of specific steps to gather more information, in order of priority
2. For each step, the specific read-only kubectl commands to use
3. Expected results if the hypothesis is correct, and if it is not
4. Next steps, each typed as "command", "analysis" or "correlation"

Only ever propose read-only commands (get, describe, logs, top, events). Never propose
anything that changes the cluster.

Respond with ONLY a JSON object."#
        .to_string()
}

pub fn build_plan_user_message(
    component: &str,
    finding: &Finding,
    hypothesis: &Hypothesis,
    namespace: &str,
) -> String {
    let (kind, name) = prompt_kind_and_name(component);
    format!(
        r#"## Investigation Context

**Component:** {kind}/{name}
**Namespace:** {namespace}
**Issue:** {issue}
**Evidence:** {evidence}
**Hypothesis:** {hypothesis}

Create a detailed investigation plan to confirm or rule out this hypothesis.

Output your response as a JSON object with the following structure:
{{
  "steps": [
    {{
      "description": "Check pod logs",
      "commands": ["kubectl logs {name} -n {namespace}"],
      "expected_if_true": "What we would see if the hypothesis is correct",
      "expected_if_false": "What we would see if the hypothesis is incorrect"
    }}
  ],
  "evidence_needed": ["Evidence types needed to confirm or reject"],
  "conclusion_criteria": "Criteria to reach a conclusion",
  "next_steps": [
    {{
      "description": "What to do next",
      "type": "command",
      "priority": "high",
      "commands": ["kubectl describe {kind_lower} {name} -n {namespace}"]
    }}
  ]
}}"#,
        kind = kind,
        kind_lower = kind.to_lowercase(),
        name = name,
        namespace = namespace,
        issue = or_placeholder(&finding.issue, "Unknown issue"),
        evidence = or_placeholder(&finding.evidence, "No additional evidence"),
        hypothesis = or_placeholder(&hypothesis.description, "Unknown hypothesis"),
    )
}

/// System prompt for judging collected evidence against a hypothesis.
pub fn build_evidence_system_prompt() -> String {
    r#"You are a Kubernetes Root Cause Analysis Expert.
Your task is to analyze evidence collected during an investigation to determine if it supports
or refutes a specific hypothesis about a Kubernetes issue.

Based on the evidence:
1. Assess whether the hypothesis is supported or refuted
2. Assign a confidence level to your assessment (0.0-1.0)
3. Suggest next steps for further investigation if needed
4. If confident enough, provide a conclusion and recommendations

Think critically about the evidence and consider alternative explanations.
Only include a conclusion when the evidence is strong enough to name a root cause.

Respond with ONLY a JSON object."#
        .to_string()
}

pub fn build_evidence_user_message(
    component: &str,
    finding: &Finding,
    hypothesis: &Hypothesis,
    evidence_text: &str,
) -> String {
    let (kind, name) = prompt_kind_and_name(component);
    format!(
        r#"## Investigation Analysis

**Component:** {}/{}
**Issue:** {}
**Hypothesis:** {}

### Evidence Collected
{}

Based on this evidence, analyze whether the hypothesis is supported or refuted.

Output your response as a JSON object with the following structure:
{{
  "assessment": "supported",
  "confidence": 0.7,
  "next_steps": [
    {{
      "description": "Specific next step to take",
      "type": "command",
      "priority": "high"
    }}
  ],
  "conclusion": {{
    "text": "Detailed conclusion about the root cause",
    "confidence": 0.9,
    "recommendations": ["Recommendation 1", "Recommendation 2"]
  }}
}}

"assessment" is one of supported, refuted, inconclusive. Omit "conclusion" when no root cause can be named yet."#,
        kind,
        name,
        or_placeholder(&finding.issue, "Unknown issue"),
        or_placeholder(&hypothesis.description, "Unknown hypothesis"),
        or_placeholder(evidence_text, "No evidence has been collected yet."),
    )
}

/// System prompt for the final report.
pub fn build_report_system_prompt() -> String {
    r#"You are a Kubernetes Root Cause Analysis Expert.
Your task is to generate a comprehensive root cause analysis report based on the investigation history.

The report should include:
1. Executive Summary
2. Problem statement and initial symptoms
3. Investigation Process
4. Key findings and Evidence
5. Root Cause identification with confidence level
6. Recommendations for resolution
7. Prevention strategies for the future

Use Markdown formatting for the report. Make it clear, concise, and actionable."#
        .to_string()
}

pub fn build_report_user_message(history_text: &str) -> String {
    format!(
        "## Root Cause Analysis Report Request\n\n\
         I need a comprehensive root cause analysis report based on the following investigation history:\n\
         {}\n\n\
         Please generate a well-structured report covering the investigation process, findings, root cause, and recommendations.",
        history_text
    )
}
