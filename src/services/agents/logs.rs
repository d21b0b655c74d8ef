//! Log analyzer
//!
//! Pulls the tail of each container's log and matches it against a fixed set
//! of error-pattern families.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use tracing::warn;

use k8s_rca_core::truncate_within;

use super::{array_at, str_at, AgentKind, AgentReport, Analyzer};
use crate::models::Severity;
use crate::services::cluster::{resource_name, ClusterClient};

/// Sample lines quoted as evidence per pattern family
const SAMPLE_LINES: usize = 3;
const SAMPLE_LINE_CHARS: usize = 200;

/// `(family, pattern, severity, recommendation)`
const LOG_PATTERNS: &[(&str, &str, Severity, &str)] = &[
    (
        "oom_kill",
        r"(Out of memory|OOMKilled|Killed|signal: killed)",
        Severity::High,
        "Increase memory limits for the container or optimize the application's memory usage",
    ),
    (
        "connection_refused",
        r"(Connection refused|connect: connection refused)",
        Severity::Medium,
        "Check network policies, service endpoints, and ensure the target service is running",
    ),
    (
        "permission_denied",
        r"(Permission denied|Forbidden|Access denied)",
        Severity::Low,
        "Verify RBAC permissions, service account settings, and security contexts",
    ),
    (
        "timeout",
        r"(timeout|timed out|ETIMEDOUT)",
        Severity::Medium,
        "Check for network issues, increase timeout values, or optimize the slow operation",
    ),
    (
        "crash_loop",
        r"(CrashLoopBackOff|Back-off restarting)",
        Severity::High,
        "Investigate container logs for crash causes and fix the underlying application issue",
    ),
    (
        "api_error",
        r"(API server error|StatusCode=5\d\d)",
        Severity::Info,
        "Check for Kubernetes API server issues or problems with the client configuration",
    ),
    (
        "volume_mount",
        r"(Unable to mount volumes|MountVolume\.SetUp failed)",
        Severity::Medium,
        "Verify PVC status, storage class availability, and volume permissions",
    ),
    (
        "image_pull",
        r"(ErrImagePull|ImagePullBackOff)",
        Severity::High,
        "Ensure the image exists, credentials are correct, and network connectivity to the registry",
    ),
    (
        "dns_resolution",
        r"(DNS resolution failed|could not resolve)",
        Severity::Medium,
        "Check CoreDNS/kube-dns functionality and network policies that might block DNS",
    ),
    (
        "authentication",
        r"(Unauthorized|Authentication failed)",
        Severity::Low,
        "Verify credentials, tokens, and authentication configuration",
    ),
    (
        "config_error",
        r"(Invalid configuration|ConfigMap not found|Secret not found)",
        Severity::Low,
        "Check that all required ConfigMaps and Secrets exist and are correctly referenced",
    ),
    (
        "internal_server_error",
        r"(internal server error|InternalServerError|500 Internal Server Error)",
        Severity::Medium,
        "Investigate server-side issues in the dependent service",
    ),
    (
        "exception",
        r"(Exception|Error|Traceback|FATAL|CRITICAL|Panic|panic:)",
        Severity::Info,
        "Debug the application code to fix the exception",
    ),
];

struct LogPattern {
    family: &'static str,
    regex: Regex,
    severity: Severity,
    recommendation: &'static str,
}

/// Lines of one log that matched one pattern family
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch<'a> {
    pub family: &'static str,
    pub severity: Severity,
    pub recommendation: &'static str,
    pub lines: Vec<&'a str>,
}

pub struct LogsAnalyzer {
    tail_lines: u32,
    patterns: Vec<LogPattern>,
}

impl LogsAnalyzer {
    pub fn new(tail_lines: u32) -> Self {
        let patterns = LOG_PATTERNS
            .iter()
            .filter_map(|&(family, pattern, severity, recommendation)| {
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(regex) => Some(LogPattern {
                        family,
                        regex,
                        severity,
                        recommendation,
                    }),
                    Err(e) => {
                        warn!(family, error = %e, "Skipping invalid log pattern");
                        None
                    }
                }
            })
            .collect();

        Self {
            tail_lines,
            patterns,
        }
    }

    /// Match every line of `logs` against the pattern families, in family order.
    /// Families without a match are left out.
    pub fn scan<'a>(&self, logs: &'a str) -> Vec<PatternMatch<'a>> {
        self.patterns
            .iter()
            .filter_map(|p| {
                let lines: Vec<&str> = logs.lines().filter(|l| p.regex.is_match(l)).collect();
                (!lines.is_empty()).then(|| PatternMatch {
                    family: p.family,
                    severity: p.severity,
                    recommendation: p.recommendation,
                    lines,
                })
            })
            .collect()
    }

    fn report_matches(
        &self,
        report: &mut AgentReport,
        pod: &str,
        container: &str,
        matches: Vec<PatternMatch<'_>>,
    ) {
        for m in matches {
            let mut evidence: Vec<String> = m
                .lines
                .iter()
                .take(SAMPLE_LINES)
                .map(|l| truncate_within(l.trim(), SAMPLE_LINE_CHARS))
                .collect();
            if m.lines.len() > SAMPLE_LINES {
                evidence.push(format!(
                    "... and {} more similar errors",
                    m.lines.len() - SAMPLE_LINES
                ));
            }

            report.add_finding(
                format!("Pod/{}/{}", pod, container),
                format!(
                    "Detected {} instances of {} in logs",
                    m.lines.len(),
                    title_case(m.family)
                ),
                m.severity,
                evidence.join("\n"),
                m.recommendation,
            );
        }
    }
}

/// `oom_kill` -> `Oom Kill`
fn title_case(family: &str) -> String {
    family
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Containers of a pod that have produced, or are producing, logs
fn containers_with_logs(pod: &Value) -> Vec<&str> {
    array_at(pod, "/status/containerStatuses")
        .iter()
        .filter(|s| {
            s.pointer("/state/running").is_some()
                || s.pointer("/state/terminated").is_some()
                || s.pointer("/lastState/terminated").is_some()
        })
        .map(|s| str_at(s, "/name"))
        .filter(|name| !name.is_empty())
        .collect()
}

#[async_trait]
impl Analyzer for LogsAnalyzer {
    fn kind(&self) -> AgentKind {
        AgentKind::Logs
    }

    async fn analyze(&self, cluster: &dyn ClusterClient, namespace: &str) -> AgentReport {
        let mut report = AgentReport::new(self.kind());
        let pods = report.collect("pods", cluster.get_pods(namespace).await);

        let mut scanned = 0;
        for pod in &pods {
            let pod_name = resource_name(pod);
            for container in containers_with_logs(pod) {
                let logs = match cluster
                    .get_pod_logs(namespace, pod_name, Some(container), self.tail_lines)
                    .await
                {
                    Ok(logs) => logs,
                    Err(e) => {
                        report.record_error(&format!("logs of {}/{}", pod_name, container), &e);
                        continue;
                    }
                };
                scanned += 1;
                let matches = self.scan(&logs);
                self.report_matches(&mut report, pod_name, container, matches);
            }
        }

        report.reason(
            format!(
                "Scanned the last {} lines of {} container logs",
                self.tail_lines, scanned
            ),
            if report.findings.is_empty() {
                "No known error patterns found in logs".to_string()
            } else {
                format!("{} error pattern families matched", report.findings.len())
            },
        );

        report
    }
}
