//! Resource status analyzer
//!
//! Pod phases and container states, deployment replica health, services
//! backed by unhealthy pods and pending volume claims.

use async_trait::async_trait;
use serde_json::Value;

use super::{
    array_at, condition_status, container_statuses, i64_at, selector_matches, str_at, AgentKind,
    AgentReport, Analyzer,
};
use crate::models::Severity;
use crate::services::cluster::{resource_labels, resource_name, string_map, ClusterClient};

/// Restart count above which a container is reported even when it is running
const RESTART_WARN: i64 = 5;
const RESTART_HIGH: i64 = 10;

/// Problematic pods beyond which the namespace summary escalates to high
const NAMESPACE_SUMMARY_HIGH: usize = 5;

pub struct ResourcesAnalyzer;

#[async_trait]
impl Analyzer for ResourcesAnalyzer {
    fn kind(&self) -> AgentKind {
        AgentKind::Resources
    }

    async fn analyze(&self, cluster: &dyn ClusterClient, namespace: &str) -> AgentReport {
        let mut report = AgentReport::new(self.kind());

        let pods = report.collect("pods", cluster.get_pods(namespace).await);
        let deployments = report.collect("deployments", cluster.get_deployments(namespace).await);
        let services = report.collect("services", cluster.get_services(namespace).await);
        let pvcs = report.collect("persistent volume claims", cluster.get_pvcs(namespace).await);

        report.reason(
            format!(
                "Found {} pods, {} deployments, {} services and {} volume claims in namespace {}",
                pods.len(),
                deployments.len(),
                services.len(),
                pvcs.len(),
                namespace
            ),
            "Beginning resource status analysis",
        );

        let problematic = analyze_pods(&mut report, &pods);
        if problematic > 0 {
            report.add_finding(
                format!("Namespace/{}", namespace),
                format!("Found {} pods with issues", problematic),
                if problematic > NAMESPACE_SUMMARY_HIGH {
                    Severity::High
                } else {
                    Severity::Medium
                },
                format!("{} of {} pods are not healthy", problematic, pods.len()),
                "Investigate pod issues based on their specific error states",
            );
        }

        analyze_deployments(&mut report, &deployments);
        analyze_services(&mut report, &services, &pods);
        analyze_pvcs(&mut report, &pvcs);

        report
    }
}

/// Whether a running pod has every container ready
fn is_pod_healthy(pod: &Value) -> bool {
    str_at(pod, "/status/phase") == "Running"
        && condition_status(pod, "Ready") != Some("False")
        && array_at(pod, "/status/containerStatuses")
            .iter()
            .all(|s| s.pointer("/ready").and_then(Value::as_bool).unwrap_or(true))
}

/// Reports per-pod issues and returns how many pods had any.
fn analyze_pods(report: &mut AgentReport, pods: &[Value]) -> usize {
    let mut problematic = 0;

    for pod in pods {
        let before = report.findings.len();
        let name = resource_name(pod);
        let phase = str_at(pod, "/status/phase");

        if str_at(pod, "/status/reason") == "Evicted" {
            report.add_finding(
                format!("Pod/{}", name),
                "Pod was evicted",
                Severity::Medium,
                format!("Message: {}", str_at(pod, "/status/message")),
                "Check node resource pressure and pod resource requests",
            );
        }

        if phase == "Pending" {
            analyze_pending_pod(report, pod, name);
        }

        let init_names: Vec<&str> = array_at(pod, "/status/initContainerStatuses")
            .iter()
            .map(|s| str_at(s, "/name"))
            .collect();

        for status in container_statuses(pod) {
            let container = str_at(status, "/name");
            let is_init = init_names.contains(&container);
            analyze_container(report, pod, name, container, is_init, status);
        }

        if phase == "Running"
            && condition_status(pod, "Ready") == Some("False")
            && report.findings.len() == before
        {
            report.add_finding(
                format!("Pod/{}", name),
                "Pod is running but not ready",
                Severity::Medium,
                readiness_evidence(pod),
                "Check readiness probes and container logs",
            );
        }

        if phase == "Failed" && report.findings.len() == before {
            report.add_finding(
                format!("Pod/{}", name),
                "Pod is in Failed phase",
                Severity::High,
                format!(
                    "Reason: {}, Message: {}",
                    str_at(pod, "/status/reason"),
                    str_at(pod, "/status/message")
                ),
                "Check container logs and fix application errors",
            );
        }

        if report.findings.len() > before {
            problematic += 1;
        }
    }

    report.reason(
        format!("Checked {} pods, {} with issues", pods.len(), problematic),
        if problematic > 0 {
            "Unhealthy pods found; see individual findings"
        } else {
            "All pods appear healthy"
        },
    );
    problematic
}

fn analyze_pending_pod(report: &mut AgentReport, pod: &Value, name: &str) {
    let unschedulable = array_at(pod, "/status/conditions").iter().find(|c| {
        str_at(c, "/type") == "PodScheduled"
            && str_at(c, "/status") == "False"
            && str_at(c, "/reason") == "Unschedulable"
    });

    match unschedulable {
        Some(condition) => report.add_finding(
            format!("Pod/{}", name),
            "Pod cannot be scheduled",
            Severity::High,
            format!("Message: {}", str_at(condition, "/message")),
            "Check node resources, taints, tolerations, and node selectors",
        ),
        None if array_at(pod, "/status/containerStatuses").is_empty() => report.add_finding(
            format!("Pod/{}", name),
            "Pod is stuck in Pending phase",
            Severity::Medium,
            "Pod has been accepted but no containers have been created",
            "Check scheduling events and volume claims for this pod",
        ),
        None => {}
    }
}

fn analyze_container(
    report: &mut AgentReport,
    pod: &Value,
    pod_name: &str,
    container: &str,
    is_init: bool,
    status: &Value,
) {
    let component = format!("Pod/{}/{}", pod_name, container);
    let restarts = i64_at(status, "/restartCount");
    let waiting_reason = str_at(status, "/state/waiting/reason");
    let waiting_message = str_at(status, "/state/waiting/message");
    let last_exit = status.pointer("/lastState/terminated/exitCode");
    let last_reason = str_at(status, "/lastState/terminated/reason");

    match waiting_reason {
        "CrashLoopBackOff" => {
            let issue = if is_init {
                format!("Init container in CrashLoopBackOff with {} restarts", restarts)
            } else {
                format!("Container in CrashLoopBackOff with {} restarts", restarts)
            };
            report.add_finding(
                component,
                issue,
                Severity::High,
                format!(
                    "Last exit code: {}, reason: {}",
                    last_exit.map(Value::to_string).unwrap_or_else(|| "unknown".to_string()),
                    if last_reason.is_empty() { "unknown" } else { last_reason }
                ),
                "Check container logs for application errors and fix the root cause",
            );
            return;
        }
        "ImagePullBackOff" | "ErrImagePull" => {
            report.add_finding(
                component,
                format!("Cannot pull image: {}", image_of(pod, status, container)),
                Severity::High,
                format!("Message: {}", waiting_message),
                "Verify image name, tag, and registry credentials",
            );
            return;
        }
        "CreateContainerConfigError" | "CreateContainerError" => {
            report.add_finding(
                component,
                "Container cannot be created due to a configuration error",
                Severity::High,
                format!("Reason: {}, Message: {}", waiting_reason, waiting_message),
                "Check that referenced ConfigMaps, Secrets and volumes exist",
            );
            return;
        }
        "ContainerCreating" => {
            let claims: Vec<&str> = array_at(pod, "/spec/volumes")
                .iter()
                .map(|v| str_at(v, "/persistentVolumeClaim/claimName"))
                .filter(|c| !c.is_empty())
                .collect();
            let (evidence, recommendation) = if claims.is_empty() {
                (
                    "Pod has been in ContainerCreating state for an extended period".to_string(),
                    "Check for resource constraints or image pull issues",
                )
            } else {
                (
                    format!("Pod uses PVCs: {} which may be pending", claims.join(", ")),
                    "Check PVC status and storage provisioner",
                )
            };
            report.add_finding(
                format!("Pod/{}", pod_name),
                "Pod stuck in ContainerCreating state",
                Severity::Medium,
                evidence,
                recommendation,
            );
            return;
        }
        _ => {}
    }

    let oom = last_reason == "OOMKilled" || str_at(status, "/state/terminated/reason") == "OOMKilled";
    if oom {
        report.add_finding(
            component,
            "Container was OOMKilled",
            Severity::Critical,
            format!("Container {} exceeded its memory limit ({} restarts)", container, restarts),
            "Increase memory limits for the container or optimize the application's memory usage",
        );
        return;
    }

    if let Some(terminated) = status.pointer("/state/terminated") {
        let exit_code = i64_at(terminated, "/exitCode");
        if exit_code != 0 {
            report.add_finding(
                component,
                format!("Container terminated with exit code {}", exit_code),
                Severity::High,
                format!(
                    "Reason: {}, Message: {}",
                    str_at(terminated, "/reason"),
                    str_at(terminated, "/message")
                ),
                "Check container logs and fix application errors",
            );
            return;
        }
    }

    if restarts > RESTART_WARN {
        report.add_finding(
            component,
            format!("Container has restarted {} times", restarts),
            if restarts > RESTART_HIGH {
                Severity::High
            } else {
                Severity::Medium
            },
            format!(
                "Container {} in pod {} has a restart count of {}",
                container, pod_name, restarts
            ),
            "Investigate logs for crash causes and ensure the container is properly configured",
        );
    }
}

fn image_of<'a>(pod: &'a Value, status: &'a Value, container: &str) -> &'a str {
    let from_status = str_at(status, "/image");
    if !from_status.is_empty() {
        return from_status;
    }
    array_at(pod, "/spec/containers")
        .iter()
        .find(|c| str_at(c, "/name") == container)
        .map(|c| str_at(c, "/image"))
        .unwrap_or_default()
}

fn readiness_evidence(pod: &Value) -> String {
    array_at(pod, "/status/conditions")
        .iter()
        .find(|c| str_at(c, "/type") == "Ready")
        .map(|c| {
            format!(
                "Reason: {}, Message: {}",
                str_at(c, "/reason"),
                str_at(c, "/message")
            )
        })
        .unwrap_or_else(|| "Ready condition is False".to_string())
}

fn analyze_deployments(report: &mut AgentReport, deployments: &[Value]) {
    for deployment in deployments {
        let name = resource_name(deployment);
        let desired = deployment
            .pointer("/spec/replicas")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let ready = i64_at(deployment, "/status/readyReplicas");
        let available = i64_at(deployment, "/status/availableReplicas");
        let unavailable = i64_at(deployment, "/status/unavailableReplicas");

        if ready < desired {
            report.add_finding(
                format!("Deployment/{}", name),
                format!("Deployment has {}/{} ready replicas", ready, desired),
                if ready == 0 {
                    Severity::High
                } else {
                    Severity::Medium
                },
                format!(
                    "Status: {} ready, {} available, {} unavailable of {} desired",
                    ready, available, unavailable, desired
                ),
                "Investigate pod creation issues or container problems",
            );
        }

        let selector = string_map(deployment.pointer("/spec/selector/matchLabels"));
        let template = string_map(deployment.pointer("/spec/template/metadata/labels"));
        if !selector.is_empty() && !selector.iter().all(|pair| template.contains(pair)) {
            report.add_finding(
                format!("Deployment/{}", name),
                "Deployment selector doesn't match template labels",
                Severity::High,
                format!(
                    "Selector {} doesn't match pod template labels {}",
                    format_pairs(&selector),
                    format_pairs(&template)
                ),
                "Correct the selector to match pod template labels",
            );
        }
    }
}

fn analyze_services(report: &mut AgentReport, services: &[Value], pods: &[Value]) {
    for service in services {
        let name = resource_name(service);
        let selector = string_map(service.pointer("/spec/selector"));
        if selector.is_empty() {
            continue;
        }

        let unhealthy: Vec<&str> = pods
            .iter()
            .filter(|pod| selector_matches(&selector, &resource_labels(pod)))
            .filter(|pod| !is_pod_healthy(pod))
            .map(resource_name)
            .collect();

        if !unhealthy.is_empty() {
            report.add_finding(
                format!("Service/{}", name),
                "Service targets unhealthy pods",
                Severity::High,
                format!(
                    "Pods {} matched by this service are unhealthy",
                    unhealthy.join(", ")
                ),
                "Investigate pod issues to restore service functionality",
            );
        }
    }
}

fn analyze_pvcs(report: &mut AgentReport, pvcs: &[Value]) {
    for pvc in pvcs {
        let phase = str_at(pvc, "/status/phase");
        if phase == "Pending" || phase == "Lost" {
            report.add_finding(
                format!("PersistentVolumeClaim/{}", resource_name(pvc)),
                format!("PersistentVolumeClaim is {}", phase),
                Severity::High,
                format!(
                    "Storage class: {}",
                    match str_at(pvc, "/spec/storageClassName") {
                        "" => "default",
                        class => class,
                    }
                ),
                "Check the storage class, provisioner and available persistent volumes",
            );
        }
    }
}

fn format_pairs(pairs: &[(&str, &str)]) -> String {
    let joined: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{{{}}}", joined.join(", "))
}
