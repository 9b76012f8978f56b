//! Checks run before an upgrade touches any host

use semver::Version;
use thiserror::Error;

use crate::cluster::Host;
use crate::kube::Node;

/// Label marking a node whose upgrade has started but not finished
pub const LOCK_LABEL: &str = "kubeone.io/upgrade-in-progress";

/// Largest minor-version jump allowed for the control plane
pub const CONTROL_PLANE_SKEW: u64 = 1;

/// Largest minor-version jump allowed for kubelets
pub const KUBELET_SKEW: u64 = 2;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreflightError {
    #[error("no node registered with address {address}")]
    NodeNotFound { address: String },

    #[error("node {node} is not ready")]
    NodeNotReady { node: String },

    #[error("node {node} is locked by an upgrade that did not finish")]
    UpgradeInProgress { node: String },

    #[error("requested version {requested} is not newer than {component} version {observed}")]
    NotNewer {
        component: &'static str,
        observed: Version,
        requested: Version,
    },

    #[error(
        "upgrading {component} from {observed} to {requested} skips more than {bound} minor version(s)"
    )]
    SkewTooLarge {
        component: &'static str,
        observed: Version,
        requested: Version,
        bound: u64,
    },
}

/// Node backing a control-plane host, matched by private or public address
pub fn find_node<'a>(nodes: &'a [Node], host: &Host) -> Result<&'a Node, PreflightError> {
    nodes
        .iter()
        .find(|n| n.has_address(&host.private_address) || n.has_address(&host.public_address))
        .ok_or_else(|| PreflightError::NodeNotFound {
            address: host.private_address.clone(),
        })
}

/// Every control-plane host must have a ready, unlocked node
pub fn check_nodes(nodes: &[Node], hosts: &[Host]) -> Result<(), PreflightError> {
    for host in hosts {
        let node = find_node(nodes, host)?;
        if !node.is_ready() {
            return Err(PreflightError::NodeNotReady {
                node: node.name().to_string(),
            });
        }
        if node.has_label(LOCK_LABEL) {
            return Err(PreflightError::UpgradeInProgress {
                node: node.name().to_string(),
            });
        }
    }
    Ok(())
}

/// Validate the requested version against what the cluster runs now
///
/// Every violation is fatal unless `force` is set, in which case the
/// violations come back as warnings for the caller to report.
pub fn check_version_skew(
    requested: &Version,
    control_plane: &Version,
    kubelets: &[Version],
    force: bool,
) -> Result<Vec<PreflightError>, PreflightError> {
    let mut violations = Vec::new();
    let observed = std::iter::once(("control plane", control_plane, CONTROL_PLANE_SKEW))
        .chain(kubelets.iter().map(|k| ("kubelet", k, KUBELET_SKEW)));

    for (component, version, bound) in observed {
        if requested <= version {
            violations.push(PreflightError::NotNewer {
                component,
                observed: version.clone(),
                requested: requested.clone(),
            });
        } else if minor_delta(version, requested) > bound {
            violations.push(PreflightError::SkewTooLarge {
                component,
                observed: version.clone(),
                requested: requested.clone(),
                bound,
            });
        }
    }

    match violations.first() {
        Some(first) if !force => Err(first.clone()),
        _ => Ok(violations),
    }
}

/// Minor versions between two releases; a major bump counts as unbounded
fn minor_delta(from: &Version, to: &Version) -> u64 {
    if from.major == to.major {
        to.minor.saturating_sub(from.minor)
    } else {
        u64::MAX
    }
}
