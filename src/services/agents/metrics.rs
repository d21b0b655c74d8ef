//! Metrics analyzer
//!
//! Compares `metrics.k8s.io` usage with pod limits and node allocatable
//! capacity, and checks autoscalers and container resource settings.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use super::{array_at, condition_status, i64_at, str_at, AgentKind, AgentReport, Analyzer};
use crate::models::Severity;
use crate::services::cluster::{resource_name, ClusterClient};

const USAGE_WARN_PCT: f64 = 80.0;
const USAGE_HIGH_PCT: f64 = 90.0;

const NODE_PRESSURE_CONDITIONS: &[&str] = &["MemoryPressure", "DiskPressure", "PIDPressure"];

pub struct MetricsAnalyzer;

#[async_trait]
impl Analyzer for MetricsAnalyzer {
    fn kind(&self) -> AgentKind {
        AgentKind::Metrics
    }

    async fn analyze(&self, cluster: &dyn ClusterClient, namespace: &str) -> AgentReport {
        let mut report = AgentReport::new(self.kind());

        let pods = report.collect("pods", cluster.get_pods(namespace).await);
        let pod_metrics = report.collect("pod metrics", cluster.get_pod_metrics(namespace).await);
        let nodes = report.collect("nodes", cluster.get_nodes().await);
        let node_metrics = report.collect("node metrics", cluster.get_node_metrics().await);
        let deployments = report.collect("deployments", cluster.get_deployments(namespace).await);
        let hpas = report.collect("horizontal pod autoscalers", cluster.get_hpas(namespace).await);

        if pod_metrics.is_empty() && node_metrics.is_empty() {
            report.reason(
                "No usage metrics returned by metrics.k8s.io",
                "Metrics server may not be installed; usage checks skipped",
            );
        } else {
            report.reason(
                format!(
                    "Received usage for {} pods and {} nodes",
                    pod_metrics.len(),
                    node_metrics.len()
                ),
                "Comparing usage with limits and allocatable capacity",
            );
        }

        analyze_pod_usage(&mut report, &pods, &pod_metrics);
        analyze_node_usage(&mut report, &nodes, &node_metrics);
        analyze_resource_config(&mut report, &deployments);
        analyze_hpas(&mut report, &hpas);

        report
    }
}

/// CPU quantity in millicores (`250m`, `2`, `1500000n`)
pub fn parse_cpu_millis(quantity: &str) -> Option<f64> {
    let q = quantity.trim();
    if let Some(n) = q.strip_suffix('n') {
        n.parse::<f64>().ok().map(|v| v / 1_000_000.0)
    } else if let Some(u) = q.strip_suffix('u') {
        u.parse::<f64>().ok().map(|v| v / 1_000.0)
    } else if let Some(m) = q.strip_suffix('m') {
        m.parse::<f64>().ok()
    } else {
        q.parse::<f64>().ok().map(|v| v * 1_000.0)
    }
}

/// Memory quantity in bytes (`128Mi`, `1G`, `512Ki`, `1048576`)
pub fn parse_memory_bytes(quantity: &str) -> Option<f64> {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
    ];

    let q = quantity.trim();
    for (suffix, factor) in SUFFIXES {
        if let Some(number) = q.strip_suffix(suffix) {
            return number.parse::<f64>().ok().map(|v| v * factor);
        }
    }
    q.parse::<f64>().ok()
}

#[derive(Debug, Default, Clone, Copy)]
struct Usage {
    cpu_millis: f64,
    memory_bytes: f64,
}

fn percent(used: f64, capacity: f64) -> Option<f64> {
    (capacity > 0.0).then(|| used / capacity * 100.0)
}

fn usage_severity(pct: f64) -> Option<Severity> {
    if pct > USAGE_HIGH_PCT {
        Some(Severity::High)
    } else if pct > USAGE_WARN_PCT {
        Some(Severity::Medium)
    } else {
        None
    }
}

/// Summed container limits of a pod; zero where any container has no limit
fn pod_limits(pod: &Value) -> Usage {
    let containers = array_at(pod, "/spec/containers");
    let sum = |pointer: &str, parse: fn(&str) -> Option<f64>| -> f64 {
        let limits: Vec<Option<f64>> = containers
            .iter()
            .map(|c| c.pointer(pointer).and_then(Value::as_str).and_then(parse))
            .collect();
        if limits.is_empty() || limits.iter().any(Option::is_none) {
            0.0
        } else {
            limits.into_iter().flatten().sum()
        }
    };

    Usage {
        cpu_millis: sum("/resources/limits/cpu", parse_cpu_millis),
        memory_bytes: sum("/resources/limits/memory", parse_memory_bytes),
    }
}

fn summed_usage(containers: &[Value]) -> Usage {
    containers.iter().fold(Usage::default(), |acc, c| Usage {
        cpu_millis: acc.cpu_millis
            + parse_cpu_millis(str_at(c, "/usage/cpu")).unwrap_or_default(),
        memory_bytes: acc.memory_bytes
            + parse_memory_bytes(str_at(c, "/usage/memory")).unwrap_or_default(),
    })
}

fn analyze_pod_usage(report: &mut AgentReport, pods: &[Value], pod_metrics: &[Value]) {
    let limits: BTreeMap<&str, Usage> = pods
        .iter()
        .map(|p| (resource_name(p), pod_limits(p)))
        .collect();

    for metrics in pod_metrics {
        let name = resource_name(metrics);
        let Some(limit) = limits.get(name) else {
            continue;
        };
        let used = summed_usage(array_at(metrics, "/containers"));

        let checks = [
            (
                "CPU",
                percent(used.cpu_millis, limit.cpu_millis),
                format!("{:.0}m of {:.0}m", used.cpu_millis, limit.cpu_millis),
            ),
            (
                "memory",
                percent(used.memory_bytes, limit.memory_bytes),
                format!(
                    "{:.0}Mi of {:.0}Mi",
                    used.memory_bytes / 1_048_576.0,
                    limit.memory_bytes / 1_048_576.0
                ),
            ),
        ];

        for (resource, pct, detail) in checks {
            let Some(pct) = pct else { continue };
            let Some(severity) = usage_severity(pct) else {
                continue;
            };
            report.add_finding(
                format!("Pod/{}", name),
                format!("High {} usage at {:.1}% of limit", resource, pct),
                severity,
                format!("Current usage {}", detail),
                if resource == "CPU" {
                    "Raise the CPU limit or scale out the workload"
                } else {
                    "Raise the memory limit or investigate memory growth in the application"
                },
            );
        }
    }
}

fn analyze_node_usage(report: &mut AgentReport, nodes: &[Value], node_metrics: &[Value]) {
    let allocatable: BTreeMap<&str, Usage> = nodes
        .iter()
        .map(|n| {
            (
                resource_name(n),
                Usage {
                    cpu_millis: parse_cpu_millis(str_at(n, "/status/allocatable/cpu"))
                        .unwrap_or_default(),
                    memory_bytes: parse_memory_bytes(str_at(n, "/status/allocatable/memory"))
                        .unwrap_or_default(),
                },
            )
        })
        .collect();

    for metrics in node_metrics {
        let name = resource_name(metrics);
        let Some(capacity) = allocatable.get(name) else {
            continue;
        };
        let used = Usage {
            cpu_millis: parse_cpu_millis(str_at(metrics, "/usage/cpu")).unwrap_or_default(),
            memory_bytes: parse_memory_bytes(str_at(metrics, "/usage/memory")).unwrap_or_default(),
        };

        for (resource, pct) in [
            ("CPU", percent(used.cpu_millis, capacity.cpu_millis)),
            ("memory", percent(used.memory_bytes, capacity.memory_bytes)),
        ] {
            let Some(pct) = pct else { continue };
            let Some(severity) = usage_severity(pct) else {
                continue;
            };
            report.add_finding(
                format!("Node/{}", name),
                format!("Node {} pressure at {:.1}% of allocatable", resource, pct),
                severity,
                format!("Node {} is running close to its {} capacity", name, resource),
                "Add nodes or rebalance workloads across the cluster",
            );
        }
    }

    for node in nodes {
        for condition in NODE_PRESSURE_CONDITIONS {
            if condition_status(node, condition) == Some("True") {
                report.add_finding(
                    format!("Node/{}", resource_name(node)),
                    format!("Node reports {}", condition),
                    Severity::High,
                    format!("Node condition {} is True", condition),
                    "Free resources on the node or move workloads elsewhere",
                );
            }
        }
    }
}

fn analyze_resource_config(report: &mut AgentReport, deployments: &[Value]) {
    for deployment in deployments {
        let containers = array_at(deployment, "/spec/template/spec/containers");
        let missing: Vec<&str> = containers
            .iter()
            .filter(|c| {
                c.pointer("/resources/requests").is_none() || c.pointer("/resources/limits").is_none()
            })
            .map(|c| str_at(c, "/name"))
            .collect();

        if !missing.is_empty() {
            report.add_finding(
                format!("Deployment/{}", resource_name(deployment)),
                format!(
                    "Missing resource requests or limits in {} containers",
                    missing.len()
                ),
                Severity::Medium,
                format!("Containers without requests or limits: {}", missing.join(", ")),
                "Set CPU and memory requests and limits for every container",
            );
        }
    }
}

fn analyze_hpas(report: &mut AgentReport, hpas: &[Value]) {
    for hpa in hpas {
        let component = format!("HorizontalPodAutoscaler/{}", resource_name(hpa));
        let max = i64_at(hpa, "/spec/maxReplicas");
        let min = hpa
            .pointer("/spec/minReplicas")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let current = i64_at(hpa, "/status/currentReplicas");
        let desired = i64_at(hpa, "/status/desiredReplicas");

        if max > 0 && current == max {
            report.add_finding(
                component.clone(),
                format!("HPA is at maximum capacity ({}/{} replicas)", current, max),
                Severity::High,
                format!("Target {}", str_at(hpa, "/spec/scaleTargetRef/name")),
                "Raise maxReplicas or reduce per-replica load",
            );
        }

        if max - min < 2 && min > 1 {
            report.add_finding(
                component.clone(),
                format!("HPA has a narrow scaling range ({}-{} replicas)", min, max),
                Severity::Low,
                format!("minReplicas {}, maxReplicas {}", min, max),
                "Widen the range between minReplicas and maxReplicas",
            );
        }

        if desired > current {
            report.add_finding(
                component,
                "HPA desired replicas not matching current replicas",
                Severity::Medium,
                format!("Desired {}, current {}", desired, current),
                "Check for scheduling or quota problems preventing scale-out",
            );
        }
    }
}
