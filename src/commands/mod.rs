//! Command handlers behind the CLI

pub mod install;
pub mod reset;
pub mod upgrade;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sshkit::{Connector, OpenSshConnector};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::Context as AppContext;
use crate::cluster::Cluster;
use crate::config;
use crate::context::Options;
use crate::ui;

/// Load the manifest and print what the command is about to act on
fn load_cluster(manifest: &Path) -> Result<Cluster> {
    let cluster = config::load(manifest)?;

    ui::kv("Cluster", &cluster.name);
    ui::kv("Kubernetes", &cluster.versions.kubernetes);
    let hosts: Vec<&str> = cluster
        .hosts
        .iter()
        .map(|h| h.public_address.as_str())
        .collect();
    ui::kv("Control plane", &hosts.join(", "));
    if !cluster.static_workers.is_empty() {
        let workers: Vec<&str> = cluster
            .static_workers
            .iter()
            .map(|h| h.public_address.as_str())
            .collect();
        ui::kv("Static workers", &workers.join(", "));
    }
    Ok(cluster)
}

/// Options shared by every workflow; remote output streams from `-vv` on
fn base_options(app: &AppContext) -> Options {
    Options {
        verbose: app.verbose >= 2 && !app.quiet,
        ..Default::default()
    }
}

/// Seconds allowed for each SSH dial
const CONNECT_TIMEOUT_SECS: u64 = 15;

fn connector() -> Arc<dyn Connector> {
    Arc::new(OpenSshConnector::new().with_connect_timeout(CONNECT_TIMEOUT_SECS))
}

/// Backup target from `--backup`; an empty value picks a timestamped name
fn backup_path(arg: Option<&str>, cluster_name: &str, now: DateTime<Utc>) -> Option<PathBuf> {
    match arg {
        None => None,
        Some("") => Some(PathBuf::from(default_backup_name(cluster_name, now))),
        Some(path) => Some(PathBuf::from(shellexpand::tilde(path).as_ref())),
    }
}

/// `<cluster>-<UTC timestamp>.tar.gz`
pub fn default_backup_name(cluster_name: &str, now: DateTime<Utc>) -> String {
    format!("{cluster_name}-{}.tar.gz", now.format("%Y%m%d%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 3, 14, 12, 30, 5).unwrap()
    }

    #[test]
    fn test_default_backup_name() {
        assert_eq!(
            default_backup_name("demo", noon()),
            "demo-20190314123005.tar.gz"
        );
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(backup_path(None, "demo", noon()), None);
        assert_eq!(
            backup_path(Some(""), "demo", noon()),
            Some(PathBuf::from("demo-20190314123005.tar.gz"))
        );
        assert_eq!(
            backup_path(Some("/tmp/pki.tar.gz"), "demo", noon()),
            Some(PathBuf::from("/tmp/pki.tar.gz"))
        );
    }

    #[test]
    fn test_remote_output_needs_two_verbose_flags() {
        let app = |verbose, quiet| AppContext { verbose, quiet };
        assert!(!base_options(&app(1, false)).verbose);
        assert!(base_options(&app(2, false)).verbose);
        assert!(!base_options(&app(3, true)).verbose);
    }
}
