//! Cluster model: hosts, versions, and optional add-ons
//!
//! Loaded from the manifest, then defaulted and validated exactly once with
//! [`Cluster::default_and_validate`]. During a run only the discovered host
//! facts (hostname, operating system) change; nothing is written back to the
//! manifest.

use anyhow::{Context, Result, bail};
use semver::Version;
use serde::{Deserialize, Serialize};
use sshkit::{Credentials, Target};
use std::collections::{BTreeMap, HashSet};

use crate::os::OperatingSystem;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SSH_USERNAME: &str = "root";
pub const DEFAULT_POD_SUBNET: &str = "10.244.0.0/16";
pub const DEFAULT_SERVICE_SUBNET: &str = "10.96.0.0/12";
pub const DEFAULT_CNI_MANIFEST: &str =
    "https://docs.projectcalico.org/v3.5/getting-started/kubernetes/installation/hosted/canal/canal.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,

    /// Control-plane hosts; the first one is the leader
    #[serde(default)]
    pub hosts: Vec<Host>,

    /// Worker hosts joined with `kubeadm join` rather than provisioned
    #[serde(default)]
    pub static_workers: Vec<Host>,

    pub versions: Versions,

    /// Load balancer in front of the API servers; defaults to the leader
    #[serde(default)]
    pub api_endpoint: Option<String>,

    #[serde(default)]
    pub network: Network,

    #[serde(default)]
    pub machine_controller: MachineController,

    /// MachineDeployments created through machine-controller
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,

    #[serde(default)]
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Host {
    /// Position in declaration order
    #[serde(skip)]
    pub id: usize,

    pub public_address: String,
    #[serde(default)]
    pub private_address: String,

    #[serde(default)]
    pub ssh_port: Option<u16>,
    #[serde(default)]
    pub ssh_username: Option<String>,

    /// Inline private key material
    #[serde(default)]
    pub ssh_private_key: Option<String>,
    #[serde(default)]
    pub ssh_private_key_file: Option<String>,
    /// Agent socket path, or `env:VAR`
    #[serde(default)]
    pub ssh_agent_socket: Option<String>,

    #[serde(skip)]
    pub hostname: String,
    #[serde(skip)]
    pub operating_system: Option<OperatingSystem>,
    #[serde(skip)]
    pub is_leader: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Versions {
    pub kubernetes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    #[serde(default = "default_pod_subnet")]
    pub pod_subnet: String,
    #[serde(default = "default_service_subnet")]
    pub service_subnet: String,
    #[serde(default = "default_cni_manifest")]
    pub cni_manifest: String,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            pod_subnet: default_pod_subnet(),
            service_subnet: default_service_subnet(),
            cni_manifest: default_cni_manifest(),
        }
    }
}

fn default_pod_subnet() -> String {
    DEFAULT_POD_SUBNET.to_string()
}

fn default_service_subnet() -> String {
    DEFAULT_SERVICE_SUBNET.to_string()
}

fn default_cni_manifest() -> String {
    DEFAULT_CNI_MANIFEST.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineController {
    #[serde(default)]
    pub deploy: bool,
    /// Cloud provider name, e.g. "aws" or "digitalocean"
    #[serde(default)]
    pub provider: String,
    /// Environment passed to the controller (provider credentials)
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    #[serde(default)]
    pub replicas: i64,
    /// Provider-specific machine spec, passed through untouched
    #[serde(default)]
    pub cloud_provider_spec: serde_json::Value,
    #[serde(default)]
    pub operating_system: String,
}

/// Ark backup agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default)]
    pub deploy: bool,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub s3_access_key: String,
    #[serde(default)]
    pub s3_secret_access_key: String,
}

impl Cluster {
    /// Fill in defaults and reject invalid manifests
    ///
    /// Assigns host ids in declaration order (static workers continue after
    /// the control plane) and marks the first host as leader.
    pub fn default_and_validate(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("cluster name must not be empty");
        }
        if self.hosts.is_empty() {
            bail!("at least one control-plane host is required");
        }

        let control_plane = self.hosts.len();
        for (i, host) in self.hosts.iter_mut().enumerate() {
            host.default(i);
            host.is_leader = i == 0;
        }
        for (i, host) in self.static_workers.iter_mut().enumerate() {
            host.default(control_plane + i);
            host.is_leader = false;
        }

        let mut seen = HashSet::new();
        for host in self.hosts.iter().chain(&self.static_workers) {
            if host.public_address.trim().is_empty() {
                bail!("host {} has no public address", host.id);
            }
            if !seen.insert(host.public_address.as_str()) {
                bail!("duplicate host address {}", host.public_address);
            }
        }

        self.kubernetes_version()?;

        for worker in &self.workers {
            if worker.replicas < 0 {
                bail!(
                    "worker set {:?} has negative replicas ({})",
                    worker.name,
                    worker.replicas
                );
            }
        }
        if !self.workers.is_empty() && !self.machine_controller.deploy {
            bail!("worker sets require machine-controller to be deployed");
        }
        if self.machine_controller.deploy && self.machine_controller.provider.is_empty() {
            bail!("machine-controller requires a provider");
        }

        Ok(())
    }

    /// Requested Kubernetes version; a leading `v` is accepted
    pub fn kubernetes_version(&self) -> Result<Version> {
        parse_version(&self.versions.kubernetes)
            .with_context(|| format!("invalid Kubernetes version {:?}", self.versions.kubernetes))
    }

    pub fn leader(&self) -> Result<&Host> {
        self.hosts
            .iter()
            .find(|h| h.is_leader)
            .context("cluster has no leader host")
    }

    pub fn followers(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter().filter(|h| !h.is_leader)
    }

    /// Address clients use to reach the API server
    pub fn api_endpoint(&self) -> Result<String> {
        match &self.api_endpoint {
            Some(endpoint) => Ok(endpoint.clone()),
            None => Ok(self.leader()?.public_address.clone()),
        }
    }

    /// Find any host (control plane or static worker) by id
    pub fn host_mut(&mut self, id: usize) -> Option<&mut Host> {
        self.hosts
            .iter_mut()
            .chain(self.static_workers.iter_mut())
            .find(|h| h.id == id)
    }
}

impl Host {
    fn default(&mut self, id: usize) {
        self.id = id;
        if self.private_address.is_empty() {
            self.private_address = self.public_address.clone();
        }
        if self.ssh_port.is_none() {
            self.ssh_port = Some(DEFAULT_SSH_PORT);
        }
        if self.ssh_username.is_none() {
            self.ssh_username = Some(DEFAULT_SSH_USERNAME.to_string());
        }
    }

    /// Connection parameters for this host
    pub fn target(&self) -> Target {
        Target {
            address: self.public_address.clone(),
            port: self.ssh_port.unwrap_or(DEFAULT_SSH_PORT),
            username: self
                .ssh_username
                .clone()
                .unwrap_or_else(|| DEFAULT_SSH_USERNAME.to_string()),
            credentials: Credentials {
                private_key: self.ssh_private_key.clone(),
                private_key_file: self.ssh_private_key_file.clone(),
                agent_socket: self.ssh_agent_socket.clone(),
            },
        }
    }

    /// Node name as registered with Kubernetes
    pub fn node_name(&self) -> &str {
        if self.hostname.is_empty() {
            &self.public_address
        } else {
            &self.hostname
        }
    }
}

/// Parse a Kubernetes-style version ("v1.14.1" or "1.14.1")
pub fn parse_version(s: &str) -> Result<Version> {
    let trimmed = s.trim();
    Ok(Version::parse(trimmed.strip_prefix('v').unwrap_or(trimmed))?)
}
