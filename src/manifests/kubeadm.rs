//! kubeadm configuration and version-specific command flavors
//!
//! The install and upgrade pipelines are written once; everything that
//! changed between kubeadm releases sits behind [`KubeadmFlavor`].

use anyhow::{Result, bail};
use semver::Version;

use crate::cluster::{Cluster, Host};

pub const API_SERVER_PORT: u16 = 6443;

/// Behavior that differs between kubeadm releases
pub trait KubeadmFlavor: Send + Sync {
    /// Release line this flavor targets, e.g. "v1.13"
    fn name(&self) -> &'static str;

    /// `apiVersion` of the kubeadm configuration objects
    fn api_version(&self) -> &'static str;

    /// Flag that turns `kubeadm join` into a control-plane join
    fn control_plane_join_flag(&self) -> &'static str;

    /// Command upgrading a follower after the leader ran `upgrade apply`
    fn upgrade_follower_command(&self) -> &'static str;

    /// Per-host kubeadm configuration
    fn config(&self, cluster: &Cluster, host: &Host) -> Result<String> {
        render_config(self.api_version(), cluster, host)
    }
}

/// kubeadm v1.13
pub struct Kubeadm113;

/// kubeadm v1.14 and later
pub struct Kubeadm114;

impl KubeadmFlavor for Kubeadm113 {
    fn name(&self) -> &'static str {
        "v1.13"
    }

    fn api_version(&self) -> &'static str {
        "kubeadm.k8s.io/v1beta1"
    }

    fn control_plane_join_flag(&self) -> &'static str {
        "--experimental-control-plane"
    }

    fn upgrade_follower_command(&self) -> &'static str {
        "kubeadm upgrade node experimental-control-plane"
    }
}

impl KubeadmFlavor for Kubeadm114 {
    fn name(&self) -> &'static str {
        "v1.14"
    }

    fn api_version(&self) -> &'static str {
        "kubeadm.k8s.io/v1beta1"
    }

    fn control_plane_join_flag(&self) -> &'static str {
        "--control-plane"
    }

    fn upgrade_follower_command(&self) -> &'static str {
        "kubeadm upgrade node"
    }
}

/// Pick the flavor for a Kubernetes version
pub fn flavor_for(version: &Version) -> Result<&'static dyn KubeadmFlavor> {
    match (version.major, version.minor) {
        (1, 13) => Ok(&Kubeadm113),
        (1, minor) if minor >= 14 => Ok(&Kubeadm114),
        _ => bail!("Kubernetes {version} is not supported; v1.13 or newer is required"),
    }
}

fn render_config(api_version: &str, cluster: &Cluster, host: &Host) -> Result<String> {
    let version = cluster.kubernetes_version()?;
    let endpoint = cluster.api_endpoint()?;

    let mut sans = vec![endpoint.clone()];
    for address in [&host.public_address, &host.private_address] {
        if !sans.contains(address) {
            sans.push(address.clone());
        }
    }
    let cert_sans: String = sans.iter().map(|s| format!("  - {s}\n")).collect();

    Ok(format!(
        "apiVersion: {api_version}
kind: InitConfiguration
localAPIEndpoint:
  advertiseAddress: {private}
  bindPort: {port}
nodeRegistration:
  name: {node_name}
  kubeletExtraArgs:
    node-ip: {private}
---
apiVersion: {api_version}
kind: ClusterConfiguration
clusterName: {cluster_name}
kubernetesVersion: v{version}
controlPlaneEndpoint: {endpoint}:{port}
apiServer:
  certSANs:
{cert_sans}networking:
  podSubnet: {pod_subnet}
  serviceSubnet: {service_subnet}
",
        private = host.private_address,
        port = API_SERVER_PORT,
        node_name = host.node_name(),
        cluster_name = cluster.name,
        pod_subnet = cluster.network.pod_subnet,
        service_subnet = cluster.network.service_subnet,
    ))
}
