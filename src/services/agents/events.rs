//! Event analyzer
//!
//! Reads the namespace event stream and looks for clusters of warnings,
//! scheduling and volume failures, noisy repeats, and node or control plane
//! trouble.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::Value;

use super::{i64_at, str_at, AgentKind, AgentReport, Analyzer};
use crate::models::Severity;
use crate::services::cluster::ClusterClient;

/// Event reasons that escalate a warning group to high severity
pub const CRITICAL_EVENT_REASONS: &[&str] = &[
    "Failed",
    "FailedCreate",
    "FailedScheduling",
    "FailedMount",
    "NodeNotReady",
    "KubeletNotReady",
    "FailedAttachVolume",
    "FailedDetachVolume",
    "FreeDiskSpaceFailed",
    "OutOfDisk",
    "MemoryPressure",
    "DiskPressure",
    "NetworkUnavailable",
    "Unhealthy",
    "FailedSync",
    "Evicted",
    "BackOff",
    "Error",
];

const CONTROL_PLANE_COMPONENTS: &[&str] = &[
    "kube-apiserver",
    "kube-controller-manager",
    "kube-scheduler",
    "etcd",
];

const VOLUME_REASONS: &[&str] = &["FailedMount", "FailedAttachVolume", "FailedDetachVolume"];

/// Warning events on one object before they count as a cluster
const WARNING_GROUP_MIN: usize = 3;
const FREQUENT_COUNT_MIN: i64 = 5;
const FREQUENT_COUNT_HIGH: i64 = 20;
const FREQUENT_TOP_N: usize = 5;

pub struct EventsAnalyzer;

#[async_trait]
impl Analyzer for EventsAnalyzer {
    fn kind(&self) -> AgentKind {
        AgentKind::Events
    }

    async fn analyze(&self, cluster: &dyn ClusterClient, namespace: &str) -> AgentReport {
        let mut report = AgentReport::new(self.kind());
        let events = report.collect("events", cluster.get_events(namespace, None).await);

        if events.is_empty() {
            report.reason(
                format!("No events found in namespace {}", namespace),
                "Unable to perform event analysis",
            );
            return report;
        }

        let warnings = events.iter().filter(|e| is_warning(e)).count();
        report.reason(
            format!("Found {} events, {} of them warnings", events.len(), warnings),
            "Analyzing events for patterns",
        );

        analyze_warning_groups(&mut report, &events);
        analyze_scheduling(&mut report, &events);
        analyze_volumes(&mut report, &events);
        analyze_frequent(&mut report, &events);
        analyze_control_plane(&mut report, &events);
        analyze_node_events(&mut report, &events);

        report
    }
}

fn is_warning(event: &Value) -> bool {
    str_at(event, "/type") == "Warning"
}

/// `Kind/name` of the object an event is about
fn involved_object(event: &Value) -> String {
    format!(
        "{}/{}",
        str_at(event, "/involvedObject/kind"),
        str_at(event, "/involvedObject/name")
    )
}

/// Repeat count of an event; events without one happened once
fn event_count(event: &Value) -> i64 {
    i64_at(event, "/count").max(1)
}

fn analyze_warning_groups(report: &mut AgentReport, events: &[Value]) {
    let mut groups: BTreeMap<String, Vec<&Value>> = BTreeMap::new();
    for event in events.iter().filter(|e| is_warning(e)) {
        groups.entry(involved_object(event)).or_default().push(event);
    }

    for (object, group) in groups {
        if group.len() < WARNING_GROUP_MIN {
            continue;
        }

        let reasons: BTreeSet<&str> = group.iter().map(|e| str_at(e, "/reason")).collect();
        let critical = reasons.iter().any(|r| CRITICAL_EVENT_REASONS.contains(r));
        let evidence: Vec<String> = group
            .iter()
            .take(3)
            .map(|e| format!("{}: {}", str_at(e, "/reason"), str_at(e, "/message")))
            .collect();

        report.add_finding(
            object.clone(),
            format!("Multiple warning events detected for {}", object),
            if critical {
                Severity::High
            } else {
                Severity::Medium
            },
            format!(
                "{} warnings ({}). {}",
                group.len(),
                reasons.into_iter().collect::<Vec<_>>().join(", "),
                evidence.join("; ")
            ),
            "Investigate the warning events for this resource",
        );
    }
}

fn scheduling_cause(message: &str) -> (&'static str, &'static str) {
    let lowered = message.to_lowercase();
    if lowered.contains("insufficient cpu") {
        (
            "insufficient CPU resources",
            "Scale up the cluster, reduce CPU requests, or free capacity on existing nodes",
        )
    } else if lowered.contains("insufficient memory") {
        (
            "insufficient memory resources",
            "Scale up the cluster, reduce memory requests, or free capacity on existing nodes",
        )
    } else if lowered.contains("taint") {
        (
            "node taints",
            "Add matching tolerations to the pod or remove the taints from the nodes",
        )
    } else if lowered.contains("node(s) didn't match") || lowered.contains("node selector") {
        (
            "node selector mismatch",
            "Update the node selector or node affinity, or label the nodes accordingly",
        )
    } else if lowered.contains("persistentvolumeclaim") || lowered.contains("unbound") {
        (
            "pending persistent volume claims",
            "Check the PVC status and the storage provisioner",
        )
    } else {
        (
            "scheduling constraints",
            "Review the scheduling message and the pod's resource requests and constraints",
        )
    }
}

fn analyze_scheduling(report: &mut AgentReport, events: &[Value]) {
    let mut seen = BTreeSet::new();
    for event in events.iter().filter(|e| str_at(e, "/reason") == "FailedScheduling") {
        let message = str_at(event, "/message");
        let (cause, recommendation) = scheduling_cause(message);
        let object = involved_object(event);
        if !seen.insert((object.clone(), cause)) {
            continue;
        }
        report.add_finding(
            object,
            format!("Pod scheduling failed due to {}", cause),
            Severity::High,
            message,
            recommendation,
        );
    }
}

fn volume_cause(message: &str) -> (&'static str, &'static str) {
    let lowered = message.to_lowercase();
    if lowered.contains("timeout") || lowered.contains("timed out") {
        (
            "timeout",
            "Check the storage backend health and network connectivity to it",
        )
    } else if lowered.contains("not found") && lowered.contains("persistentvolumeclaim") {
        (
            "PVC not found",
            "Create the missing PersistentVolumeClaim or fix the claim name in the pod spec",
        )
    } else if lowered.contains("permission") || lowered.contains("denied") {
        (
            "permission issues",
            "Verify the security context, fsGroup and storage access permissions",
        )
    } else if lowered.contains("path") || lowered.contains("no such file") {
        (
            "path issues",
            "Verify the volume path exists on the host or storage backend",
        )
    } else {
        (
            "volume errors",
            "Check the PV, PVC and storage class configuration",
        )
    }
}

fn analyze_volumes(report: &mut AgentReport, events: &[Value]) {
    let mut seen = BTreeSet::new();
    for event in events
        .iter()
        .filter(|e| VOLUME_REASONS.contains(&str_at(e, "/reason")))
    {
        let message = str_at(event, "/message");
        let (cause, recommendation) = volume_cause(message);
        let object = involved_object(event);
        if !seen.insert((object.clone(), cause)) {
            continue;
        }
        report.add_finding(
            object,
            format!("Volume operation failed due to {}", cause),
            Severity::High,
            format!("{}: {}", str_at(event, "/reason"), message),
            recommendation,
        );
    }
}

fn analyze_frequent(report: &mut AgentReport, events: &[Value]) {
    let mut frequent: Vec<&Value> = events
        .iter()
        .filter(|e| is_warning(e) && event_count(e) > FREQUENT_COUNT_MIN)
        .collect();
    frequent.sort_by_key(|e| std::cmp::Reverse(event_count(e)));

    for event in frequent.into_iter().take(FREQUENT_TOP_N) {
        let count = event_count(event);
        report.add_finding(
            involved_object(event),
            format!(
                "Frequent {} events detected ({} occurrences)",
                str_at(event, "/reason"),
                count
            ),
            if count > FREQUENT_COUNT_HIGH {
                Severity::High
            } else {
                Severity::Medium
            },
            str_at(event, "/message"),
            "Investigate the recurring condition behind this event",
        );
    }
}

fn analyze_control_plane(report: &mut AgentReport, events: &[Value]) {
    let mut per_component: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
    for event in events.iter().filter(|e| is_warning(e)) {
        let source = str_at(event, "/source/component");
        if CONTROL_PLANE_COMPONENTS.contains(&source) {
            per_component.entry(source).or_default().push(event);
        }
    }

    for (component, group) in per_component {
        let sample: Vec<String> = group
            .iter()
            .take(3)
            .map(|e| format!("{}: {}", str_at(e, "/reason"), str_at(e, "/message")))
            .collect();
        report.add_finding(
            format!("Control Plane/{}", component),
            format!("Control plane component {} reporting warnings", component),
            Severity::Critical,
            sample.join("; "),
            "Check the health of the control plane components and their logs",
        );
    }
}

/// Node condition named by a node event, with the matching recommendation
fn node_condition(event: &Value) -> Option<(&'static str, &'static str)> {
    let text = format!("{} {}", str_at(event, "/reason"), str_at(event, "/message"));
    if text.contains("NotReady") {
        Some((
            "NotReady",
            "Check kubelet status, node connectivity and system resources on the node",
        ))
    } else if text.contains("MemoryPressure") || text.contains("InsufficientMemory") {
        Some((
            "MemoryPressure",
            "Free memory on the node, evict low-priority pods or add capacity",
        ))
    } else if ["DiskPressure", "OutOfDisk", "FreeDiskSpaceFailed"]
        .iter()
        .any(|marker| text.contains(marker))
    {
        Some((
            "DiskPressure",
            "Clean up unused images and volumes or increase node disk capacity",
        ))
    } else if text.contains("NetworkUnavailable") {
        Some((
            "NetworkUnavailable",
            "Check the CNI plugin and network configuration of the node",
        ))
    } else {
        None
    }
}

fn analyze_node_events(report: &mut AgentReport, events: &[Value]) {
    let mut seen = BTreeSet::new();
    for event in events
        .iter()
        .filter(|e| str_at(e, "/involvedObject/kind") == "Node")
    {
        let Some((condition, recommendation)) = node_condition(event) else {
            continue;
        };
        let node = str_at(event, "/involvedObject/name");
        if !seen.insert((node, condition)) {
            continue;
        }
        report.add_finding(
            format!("Node/{}", node),
            format!("Node experiencing {}", condition),
            Severity::Critical,
            format!("{}: {}", str_at(event, "/reason"), str_at(event, "/message")),
            recommendation,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: &str, name: &str, reason: &str, message: &str, count: i64) -> Value {
        json!({
            "type": "Warning",
            "reason": reason,
            "message": message,
            "count": count,
            "involvedObject": {"kind": kind, "name": name},
            "source": {"component": "kubelet"}
        })
    }

    #[test]
    fn test_warning_group_needs_three_events() {
        let mut report = AgentReport::new(AgentKind::Events);
        let events = vec![
            event("Pod", "api-1", "BackOff", "Back-off restarting", 1),
            event("Pod", "api-1", "Unhealthy", "Readiness probe failed", 1),
        ];
        analyze_warning_groups(&mut report, &events);
        assert!(report.findings.is_empty());

        let mut events = events;
        events.push(event("Pod", "api-1", "BackOff", "Back-off restarting", 1));
        analyze_warning_groups(&mut report, &events);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].component, "Pod/api-1");
        assert_eq!(report.findings[0].severity, Severity::High);
    }

    #[test]
    fn test_scheduling_causes() {
        let mut report = AgentReport::new(AgentKind::Events);
        let events = vec![
            event("Pod", "w-1", "FailedScheduling", "0/3 nodes: 3 Insufficient cpu.", 1),
            event("Pod", "w-1", "FailedScheduling", "0/3 nodes: 3 Insufficient cpu.", 1),
            event("Pod", "w-2", "FailedScheduling", "3 node(s) had untolerated taint", 1),
        ];
        analyze_scheduling(&mut report, &events);
        assert_eq!(report.findings.len(), 2);
        assert_eq!(
            report.findings[0].issue,
            "Pod scheduling failed due to insufficient CPU resources"
        );
        assert_eq!(report.findings[1].issue, "Pod scheduling failed due to node taints");
    }

    #[test]
    fn test_volume_failure() {
        let mut report = AgentReport::new(AgentKind::Events);
        analyze_volumes(
            &mut report,
            &[event("Pod", "db-0", "FailedMount", "MountVolume.SetUp failed: timed out", 1)],
        );
        assert_eq!(report.findings[0].issue, "Volume operation failed due to timeout");
    }

    #[test]
    fn test_frequent_events_ranked_by_count() {
        let mut report = AgentReport::new(AgentKind::Events);
        let events = vec![
            event("Pod", "a", "BackOff", "x", 8),
            event("Pod", "b", "BackOff", "y", 42),
            event("Pod", "c", "BackOff", "z", 3),
        ];
        analyze_frequent(&mut report, &events);
        assert_eq!(report.findings.len(), 2);
        assert_eq!(report.findings[0].component, "Pod/b");
        assert_eq!(report.findings[0].severity, Severity::High);
        assert_eq!(report.findings[1].severity, Severity::Medium);
    }

    #[test]
    fn test_node_and_control_plane_events() {
        let mut report = AgentReport::new(AgentKind::Events);
        let mut scheduler = event("Pod", "x", "FailedBinding", "etcd timeout", 1);
        scheduler["source"]["component"] = json!("kube-scheduler");
        let events = vec![
            event("Node", "node-1", "NodeNotReady", "Node node-1 status is now: NodeNotReady", 1),
            event("Node", "node-1", "NodeNotReady", "again", 1),
            scheduler,
        ];
        analyze_node_events(&mut report, &events);
        analyze_control_plane(&mut report, &events);
        assert_eq!(report.findings.len(), 2);
        assert_eq!(report.findings[0].issue, "Node experiencing NotReady");
        assert_eq!(report.findings[1].component, "Control Plane/kube-scheduler");
        assert!(report.findings.iter().all(|f| f.severity == Severity::Critical));
    }
}
