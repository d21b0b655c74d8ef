//! Topology analyzer
//!
//! Service wiring: selectors that reach no pods, services without ready
//! endpoints, missing or permissive network policies, and ingress routing.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;

use super::{array_at, selector_matches, str_at, AgentKind, AgentReport, Analyzer};
use crate::models::Severity;
use crate::services::cluster::{resource_labels, resource_name, string_map, ClusterClient};

/// ClusterIP services with these names usually want external exposure
const USER_FACING_NAMES: &[&str] = &["api", "web", "ui", "frontend"];

pub struct TopologyAnalyzer;

#[async_trait]
impl Analyzer for TopologyAnalyzer {
    fn kind(&self) -> AgentKind {
        AgentKind::Topology
    }

    async fn analyze(&self, cluster: &dyn ClusterClient, namespace: &str) -> AgentReport {
        let mut report = AgentReport::new(self.kind());

        let services = report.collect("services", cluster.get_services(namespace).await);
        let pods = report.collect("pods", cluster.get_pods(namespace).await);
        let endpoints = report.collect("endpoints", cluster.get_endpoints(namespace).await);
        let policies =
            report.collect("network policies", cluster.get_network_policies(namespace).await);
        let ingresses = report.collect("ingresses", cluster.get_ingresses(namespace).await);

        report.reason(
            format!(
                "Found {} services, {} network policies and {} ingresses",
                services.len(),
                policies.len(),
                ingresses.len()
            ),
            "Mapping service connectivity",
        );

        analyze_selectors(&mut report, &services, &pods);
        analyze_endpoints(&mut report, &services, &endpoints);
        analyze_network_policies(&mut report, &services, &policies);
        analyze_ingresses(&mut report, &services, &ingresses);

        report
    }
}

fn analyze_selectors(report: &mut AgentReport, services: &[Value], pods: &[Value]) {
    for service in services {
        let name = resource_name(service);
        if str_at(service, "/spec/type") == "ExternalName" {
            continue;
        }

        let selector = string_map(service.pointer("/spec/selector"));
        if selector.is_empty() {
            report.add_finding(
                format!("Service/{}", name),
                "Service has no selector",
                Severity::Medium,
                "Service spec has no selector; endpoints must be managed manually",
                "Add a selector or make sure an Endpoints object is maintained for this service",
            );
            continue;
        }

        let matched = pods
            .iter()
            .any(|pod| selector_matches(&selector, &resource_labels(pod)));
        if !matched {
            report.add_finding(
                format!("Service/{}", name),
                "Service selector matches no pods",
                Severity::High,
                format!("Selector {:?} matches none of {} pods", selector, pods.len()),
                "Fix the service selector or the pod labels so traffic can reach the workload",
            );
        }
    }
}

fn ready_addresses(endpoints: &Value) -> usize {
    array_at(endpoints, "/subsets")
        .iter()
        .map(|subset| array_at(subset, "/addresses").len())
        .sum()
}

fn analyze_endpoints(report: &mut AgentReport, services: &[Value], endpoints: &[Value]) {
    for service in services {
        let name = resource_name(service);
        if string_map(service.pointer("/spec/selector")).is_empty() {
            continue;
        }
        let Some(entry) = endpoints.iter().find(|e| resource_name(e) == name) else {
            continue;
        };
        if ready_addresses(entry) == 0 {
            let not_ready: usize = array_at(entry, "/subsets")
                .iter()
                .map(|s| array_at(s, "/notReadyAddresses").len())
                .sum();
            report.add_finding(
                format!("Service/{}", name),
                "Service has no ready endpoints",
                Severity::High,
                format!("0 ready addresses, {} not ready", not_ready),
                "Check readiness of the pods behind this service",
            );
        }
    }
}

/// A policy that admits everything: an ingress rule without `from` sources
fn is_permissive(policy: &Value) -> bool {
    array_at(policy, "/spec/ingress")
        .iter()
        .any(|rule| array_at(rule, "/from").is_empty())
}

fn analyze_network_policies(report: &mut AgentReport, services: &[Value], policies: &[Value]) {
    if policies.is_empty() {
        if services.len() > 1 {
            report.add_finding(
                "NetworkPolicy/none",
                "No network policies defined in a multi-service namespace",
                Severity::Medium,
                format!("{} services and no network policies", services.len()),
                "Define network policies to restrict traffic between services",
            );
        }
        return;
    }

    for policy in policies.iter().filter(|p| is_permissive(p)) {
        report.add_finding(
            format!("NetworkPolicy/{}", resource_name(policy)),
            "Network policy allows traffic from all sources",
            Severity::Medium,
            "An ingress rule has no `from` restriction",
            "Restrict ingress rules to the sources that need access",
        );
    }
}

/// Backend service names referenced by an ingress, in either API version's shape
fn ingress_backends(ingress: &Value) -> BTreeSet<&str> {
    let mut backends: Vec<&Value> = ["/spec/defaultBackend", "/spec/backend"]
        .iter()
        .filter_map(|pointer| ingress.pointer(pointer))
        .collect();
    for rule in array_at(ingress, "/spec/rules") {
        backends.extend(
            array_at(rule, "/http/paths")
                .iter()
                .filter_map(|path| path.pointer("/backend")),
        );
    }

    backends
        .into_iter()
        .flat_map(|backend| [str_at(backend, "/service/name"), str_at(backend, "/serviceName")])
        .filter(|name| !name.is_empty())
        .collect()
}

fn analyze_ingresses(report: &mut AgentReport, services: &[Value], ingresses: &[Value]) {
    let service_names: BTreeSet<&str> = services.iter().map(resource_name).collect();

    if ingresses.is_empty() {
        for service in services {
            let name = resource_name(service);
            let cluster_ip = matches!(str_at(service, "/spec/type"), "" | "ClusterIP");
            if cluster_ip && USER_FACING_NAMES.iter().any(|n| name.contains(n)) {
                report.add_finding(
                    format!("Service/{}", name),
                    "User-facing service is not exposed outside the cluster",
                    Severity::Low,
                    "ClusterIP service and no ingress in the namespace",
                    "Add an ingress or a LoadBalancer service if external access is expected",
                );
            }
        }
        return;
    }

    for ingress in ingresses {
        let name = resource_name(ingress);

        if array_at(ingress, "/spec/tls").is_empty() {
            report.add_finding(
                format!("Ingress/{}", name),
                "Ingress has no TLS configured",
                Severity::High,
                "spec.tls is empty; traffic is served over plain HTTP",
                "Configure TLS for the ingress",
            );
        }

        for backend in ingress_backends(ingress) {
            if !service_names.contains(backend) {
                report.add_finding(
                    format!("Ingress/{}", name),
                    format!("Ingress backend service {} does not exist", backend),
                    Severity::High,
                    format!("Services in namespace: {:?}", service_names),
                    "Create the service or point the ingress at an existing one",
                );
            }
        }
    }
}
