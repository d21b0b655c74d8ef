//! kubectl Client
//!
//! Shells out to kubectl with `-o json` and a per-call timeout. Every
//! invocation, including the ones built internally, passes the read-only check
//! first.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{ClusterClient, ClusterError, ClusterResult};
use crate::models::ClusterSettings;

/// Verbs that only read cluster state
pub const READ_ONLY_VERBS: &[&str] = &[
    "get",
    "describe",
    "logs",
    "top",
    "explain",
    "api-resources",
    "api-versions",
    "version",
    "cluster-info",
    "events",
    "auth",
];

/// Flags that turn an otherwise read-only call into a stream that never ends
const STREAMING_FLAGS: &[&str] = &["-w", "--watch", "--watch-only", "-f", "--follow"];

/// Tokens at which a pasted shell pipeline stops being a kubectl invocation
const SHELL_OPERATORS: &[&str] = &["|", "||", "&&", ";", ">", ">>", "<", "&"];

/// Refuse anything that is not a read-only kubectl invocation.
///
/// The verb is the first argument that is not a flag. A leading flag is not
/// skipped, so `-n default delete pod x` is refused along with `delete`.
pub fn ensure_read_only(args: &[String]) -> ClusterResult<()> {
    let joined = args.join(" ");
    let verb = args
        .iter()
        .map(String::as_str)
        .find(|a| !a.starts_with('-'))
        .ok_or_else(|| ClusterError::Forbidden(format!("no verb in `{}`", joined)))?;

    if args.first().map(String::as_str) != Some(verb) {
        return Err(ClusterError::Forbidden(format!(
            "flags before the verb are not allowed: `{}`",
            joined
        )));
    }

    if !READ_ONLY_VERBS.contains(&verb) {
        return Err(ClusterError::Forbidden(format!("verb `{}` in `{}`", verb, joined)));
    }

    if verb == "auth" && args.get(1).map(String::as_str) != Some("can-i") {
        return Err(ClusterError::Forbidden(format!("`{}`", joined)));
    }

    if let Some(flag) = args
        .iter()
        .find(|a| STREAMING_FLAGS.contains(&a.as_str()) || a.starts_with("--watch="))
    {
        return Err(ClusterError::Forbidden(format!(
            "streaming flag `{}` in `{}`",
            flag, joined
        )));
    }

    Ok(())
}

/// Split a command line the way a shell would for simple cases: whitespace
/// separated, single and double quotes group, and the first shell operator
/// ends the command.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut has_token = false;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                has_token = true;
            }
            None if c.is_whitespace() => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            None => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }

    if let Some(idx) = tokens.iter().position(|t| SHELL_OPERATORS.contains(&t.as_str())) {
        tokens.truncate(idx);
    }
    tokens
}

/// Cluster client backed by the kubectl binary
#[derive(Debug, Clone)]
pub struct KubectlClient {
    binary: String,
    context: Option<String>,
    timeout: Duration,
}

impl KubectlClient {
    pub fn new(settings: &ClusterSettings) -> Self {
        Self {
            binary: settings.kubectl.clone(),
            context: settings.context.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    async fn run(&self, args: Vec<String>) -> ClusterResult<String> {
        ensure_read_only(&args)?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }

        let command_line = format!("kubectl {}", args.join(" "));
        debug!(command = %command_line, "Running kubectl");

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ClusterError::Unavailable(format!(
                    "failed to run {}: {}",
                    self.binary, e
                )))
            }
            Err(_) => {
                return Err(ClusterError::Timeout {
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(command_line, stderr))
    }

    async fn get_json(&self, args: Vec<String>) -> ClusterResult<Value> {
        let stdout = self.run(args).await?;
        serde_json::from_str(&stdout).map_err(|e| ClusterError::Parse(e.to_string()))
    }

    /// `kubectl get <resource>` items; NotFound is an empty list
    async fn list(
        &self,
        resource: &str,
        namespace: Option<&str>,
        extra: &[String],
    ) -> ClusterResult<Vec<Value>> {
        let mut args = vec!["get".to_string(), resource.to_string()];
        if let Some(ns) = namespace {
            args.extend(["-n".to_string(), ns.to_string()]);
        }
        args.extend(extra.iter().cloned());
        args.extend(["-o".to_string(), "json".to_string()]);

        match self.get_json(args).await {
            Ok(value) => Ok(items(value)),
            Err(ClusterError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn raw_items(&self, path: String) -> ClusterResult<Vec<Value>> {
        match self
            .get_json(vec!["get".to_string(), "--raw".to_string(), path])
            .await
        {
            Ok(value) => Ok(items(value)),
            Err(ClusterError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

fn items(value: Value) -> Vec<Value> {
    match value {
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            Some(_) => Vec::new(),
            // Single object, as returned by `get <kind> <name>`
            None => vec![Value::Object(map)],
        },
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

fn classify_failure(command: String, stderr: String) -> ClusterError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("(notfound)")
        || lowered.contains("not found")
        || lowered.contains("could not find the requested resource")
    {
        ClusterError::NotFound(stderr)
    } else if lowered.contains("unable to connect to the server")
        || lowered.contains("connection refused")
        || lowered.contains("no configuration has been provided")
    {
        ClusterError::Unavailable(stderr)
    } else {
        ClusterError::CommandFailed { command, stderr }
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn get_pods(&self, namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list("pods", Some(namespace), &[]).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> ClusterResult<Option<Value>> {
        match self
            .get_json(args(&["get", "pod", name, "-n", namespace, "-o", "json"]))
            .await
        {
            Ok(pod) => Ok(Some(pod)),
            Err(ClusterError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_services(&self, namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list("services", Some(namespace), &[]).await
    }

    async fn get_deployments(&self, namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list("deployments", Some(namespace), &[]).await
    }

    async fn get_events(
        &self,
        namespace: &str,
        field_selector: Option<&str>,
    ) -> ClusterResult<Vec<Value>> {
        let extra = match field_selector {
            Some(selector) => vec!["--field-selector".to_string(), selector.to_string()],
            None => Vec::new(),
        };
        self.list("events", Some(namespace), &extra).await
    }

    async fn get_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: u32,
    ) -> ClusterResult<String> {
        let mut cmd = args(&["logs", pod, "-n", namespace]);
        cmd.push(format!("--tail={}", tail_lines));
        if let Some(container) = container {
            cmd.extend(["-c".to_string(), container.to_string()]);
        }
        match self.run(cmd).await {
            Ok(logs) => Ok(logs),
            Err(ClusterError::NotFound(_)) => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    async fn get_pod_metrics(&self, namespace: &str) -> ClusterResult<Vec<Value>> {
        self.raw_items(format!(
            "/apis/metrics.k8s.io/v1beta1/namespaces/{}/pods",
            namespace
        ))
        .await
    }

    async fn get_node_metrics(&self) -> ClusterResult<Vec<Value>> {
        self.raw_items("/apis/metrics.k8s.io/v1beta1/nodes".to_string())
            .await
    }

    async fn get_network_policies(&self, namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list("networkpolicies", Some(namespace), &[]).await
    }

    async fn get_endpoints(&self, namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list("endpoints", Some(namespace), &[]).await
    }

    async fn get_hpas(&self, namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list("horizontalpodautoscalers", Some(namespace), &[])
            .await
    }

    async fn get_nodes(&self) -> ClusterResult<Vec<Value>> {
        self.list("nodes", None, &[]).await
    }

    async fn get_ingresses(&self, namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list("ingresses", Some(namespace), &[]).await
    }

    async fn get_pvcs(&self, namespace: &str) -> ClusterResult<Vec<Value>> {
        self.list("persistentvolumeclaims", Some(namespace), &[])
            .await
    }

    async fn describe(&self, kind: &str, name: &str, namespace: &str) -> ClusterResult<String> {
        self.run(args(&["describe", &kind.to_lowercase(), name, "-n", namespace]))
            .await
    }

    async fn run_read_only(&self, args: &[String]) -> ClusterResult<String> {
        self.run(args.to_vec()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(line: &str) -> Vec<String> {
        split_command_line(line)
    }

    #[test]
    fn test_read_only_verbs_allowed() {
        for line in [
            "get pods -n shop -o wide",
            "describe pod api-1 -n shop",
            "logs api-1 -n shop --tail=50",
            "top pods -n shop",
            "auth can-i list pods",
            "get --raw /apis/metrics.k8s.io/v1beta1/nodes",
        ] {
            assert!(ensure_read_only(&argv(line)).is_ok(), "{}", line);
        }
    }

    #[test]
    fn test_mutating_verbs_refused() {
        for line in [
            "delete pod api-1",
            "apply -f deploy.yaml",
            "scale deployment api --replicas=0",
            "exec -it api-1 -- sh",
            "auth reconcile -f rbac.yaml",
            "-n shop delete pod api-1",
            "rollout restart deployment/api",
            "",
        ] {
            assert!(
                matches!(ensure_read_only(&argv(line)), Err(ClusterError::Forbidden(_))),
                "{}",
                line
            );
        }
    }

    #[test]
    fn test_streaming_flags_refused() {
        assert!(ensure_read_only(&argv("logs api-1 -f")).is_err());
        assert!(ensure_read_only(&argv("get pods --watch")).is_err());
        assert!(ensure_read_only(&argv("get pods --watch=true")).is_err());
    }

    #[test]
    fn test_split_command_line_quotes_and_pipes() {
        assert_eq!(
            argv(r#"get events --field-selector "type!=Normal" | grep Failed"#),
            vec!["get", "events", "--field-selector", "type!=Normal"]
        );
        assert_eq!(argv("get pods ''"), vec!["get", "pods", ""]);
        assert_eq!(argv("  logs   api-1  "), vec!["logs", "api-1"]);
    }

    #[test]
    fn test_items_unwraps_lists_and_single_objects() {
        let list = serde_json::json!({"kind": "PodList", "items": [{"a": 1}, {"b": 2}]});
        assert_eq!(items(list).len(), 2);
        let single = serde_json::json!({"kind": "Pod", "metadata": {"name": "x"}});
        assert_eq!(items(single).len(), 1);
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure(
                "kubectl get pod x".to_string(),
                "Error from server (NotFound): pods \"x\" not found".to_string()
            ),
            ClusterError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure(
                "kubectl get pods".to_string(),
                "Unable to connect to the server: dial tcp".to_string()
            ),
            ClusterError::Unavailable(_)
        ));
        assert!(matches!(
            classify_failure("kubectl get pods".to_string(), "Forbidden: RBAC".to_string()),
            ClusterError::CommandFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let client = KubectlClient::new(&ClusterSettings {
            kubectl: "kubectl-binary-that-does-not-exist".to_string(),
            ..Default::default()
        });
        let result = client.get_pods("default").await;
        assert!(matches!(result, Err(ClusterError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_mutation_refused_before_spawning() {
        let client = KubectlClient::new(&ClusterSettings {
            kubectl: "kubectl-binary-that-does-not-exist".to_string(),
            ..Default::default()
        });
        let result = client
            .run_read_only(&argv("delete namespace production"))
            .await;
        assert!(matches!(result, Err(ClusterError::Forbidden(_))));
    }
}
