use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::cluster::Cluster;

/// Load, default and validate a cluster manifest
pub fn load(path: &Path) -> Result<Cluster> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid cluster manifest {}", path.display()))
}

/// Parse a TOML manifest
///
/// `~` in key file paths and agent socket paths is expanded to the local
/// home directory.
pub fn parse(content: &str) -> Result<Cluster> {
    let mut cluster: Cluster = toml::from_str(content)?;

    for host in cluster
        .hosts
        .iter_mut()
        .chain(cluster.static_workers.iter_mut())
    {
        expand(&mut host.ssh_private_key_file);
        expand(&mut host.ssh_agent_socket);
    }

    cluster.default_and_validate()?;
    Ok(cluster)
}

fn expand(path: &mut Option<String>) {
    if let Some(value) = path.as_mut() {
        *value = shellexpand::tilde(value.as_str()).into_owned();
    }
}
