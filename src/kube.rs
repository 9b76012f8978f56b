//! Kubernetes API access through `kubectl` on the leader

use anyhow::{Context as _, Result, anyhow};
use semver::Version;
use serde::Deserialize;
use sshkit::shell;
use std::collections::BTreeMap;
use stepflow::{LogCallback, RetryConfig, with_retry};

use crate::cluster::parse_version;
use crate::runner::Runner;
use crate::template::Vars;

/// kubectl authenticated with the cluster admin credentials
pub const KUBECTL: &str = "sudo kubectl --kubeconfig=/etc/kubernetes/admin.conf";

/// Namespace machine-controller and its resources live in
pub const MACHINE_NAMESPACE: &str = "kube-system";

#[derive(Clone)]
pub struct KubeClient {
    runner: Runner,
}

impl KubeClient {
    pub fn new(runner: Runner) -> Self {
        Self { runner }
    }

    /// Build a client and wait until the API server answers
    pub fn connect(runner: Runner, retry: &RetryConfig) -> Result<Self> {
        let client = Self::new(runner);
        let callback = LogCallback {
            operation: "waiting for the Kubernetes API",
        };
        with_retry(retry, Some(&callback), || {
            client.kubectl("get --raw=/healthz").map(|_| ())
        })
        .context("Kubernetes API is not reachable")?;
        Ok(client)
    }

    fn kubectl(&self, args: &str) -> Result<String> {
        let (stdout, _) = self
            .runner
            .run(&format!("{KUBECTL} {args}"), &Vars::new())?;
        Ok(stdout)
    }

    /// Apply a manifest file or URL
    pub fn apply(&self, manifest: &str) -> Result<()> {
        self.kubectl(&format!("apply -f {}", shell::quote(manifest)))?;
        Ok(())
    }

    pub fn nodes(&self) -> Result<Vec<Node>> {
        let json = self.kubectl("get nodes -o json")?;
        let list: NodeList = serde_json::from_str(&json).context("failed to parse node list")?;
        Ok(list.items)
    }

    /// Version reported by the API server
    pub fn server_version(&self) -> Result<Version> {
        let json = self.kubectl("version -o json")?;
        let info: VersionInfo =
            serde_json::from_str(&json).context("failed to parse kubectl version output")?;
        let server = info
            .server_version
            .ok_or_else(|| anyhow!("kubectl did not report a server version"))?;
        parse_version(&server.git_version)
    }

    pub fn label_node(&self, node: &str, key: &str, value: &str) -> Result<()> {
        self.kubectl(&format!("label node {node} {key}={value} --overwrite"))?;
        Ok(())
    }

    pub fn unlabel_node(&self, node: &str, key: &str) -> Result<()> {
        self.kubectl(&format!("label node {node} {key}-"))?;
        Ok(())
    }

    /// Names of every object of `kind` in `namespace`
    pub fn list_names(&self, kind: &str, namespace: &str) -> Result<Vec<String>> {
        let out = self.kubectl(&format!("-n {namespace} get {kind} -o name"))?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn delete_all(&self, kind: &str, namespace: &str) -> Result<()> {
        self.kubectl(&format!("-n {namespace} delete {kind} --all"))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct NodeList {
    #[serde(default)]
    pub items: Vec<Node>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
    #[serde(default)]
    pub addresses: Vec<NodeAddress>,
    #[serde(default)]
    pub node_info: NodeSystemInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSystemInfo {
    #[serde(default)]
    pub kubelet_version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    server_version: Option<GitVersion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GitVersion {
    git_version: String,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True")
    }

    pub fn has_label(&self, key: &str) -> bool {
        self.metadata.labels.contains_key(key)
    }

    pub fn has_address(&self, address: &str) -> bool {
        self.status.addresses.iter().any(|a| a.address == address)
    }

    pub fn kubelet_version(&self) -> Result<Version> {
        parse_version(&self.status.node_info.kubelet_version).with_context(|| {
            format!(
                "node {} reports invalid kubelet version {:?}",
                self.name(),
                self.status.node_info.kubelet_version
            )
        })
    }
}
