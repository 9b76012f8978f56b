//! Install, reset and upgrade workflows
//!
//! Each workflow is a [`Pipeline`](stepflow::Pipeline) over a [`Context`].
//! The facade functions build the context, run the pipeline with the
//! caller's progress callback, and close every session afterwards.

pub mod install;
pub mod preflight;
pub mod reset;
pub mod upgrade;

use anyhow::{Context as _, Result, bail};
use sshkit::Connector;
use std::sync::Arc;
use stepflow::ProgressCallback;

use crate::cluster::{Cluster, Host};
use crate::context::{Context, Options};
use crate::dispatch::{Selector, run_tasks};
use crate::kube::KubeClient;
use crate::os::OperatingSystem;
use crate::runner::Runner;
use crate::template::Vars;

/// CNI plugins release installed on distributions without packages
pub const CNI_VERSION: &str = "v0.7.5";

const HOSTNAME_SCRIPT: &str = "hostname -f";
const OS_ID_SCRIPT: &str = ". /etc/os-release && echo \"${ID}\"";

pub fn install<P: ProgressCallback>(
    cluster: &Cluster,
    options: &Options,
    connector: Arc<dyn Connector>,
    progress: &mut P,
) -> Result<()> {
    let ctx = Context::new(cluster.clone(), options.clone(), connector);
    let result = install::pipeline(cluster)?.execute_with_progress(&ctx, progress);
    ctx.close();
    result
}

pub fn reset<P: ProgressCallback>(
    cluster: &Cluster,
    options: &Options,
    connector: Arc<dyn Connector>,
    progress: &mut P,
) -> Result<()> {
    let ctx = Context::new(cluster.clone(), options.clone(), connector);
    let result = reset::pipeline(options).execute_with_progress(&ctx, progress);
    ctx.close();
    result
}

pub fn upgrade<P: ProgressCallback>(
    cluster: &Cluster,
    options: &Options,
    connector: Arc<dyn Connector>,
    progress: &mut P,
) -> Result<()> {
    let ctx = Context::new(cluster.clone(), options.clone(), connector);
    let result = upgrade::pipeline(cluster)?.execute_with_progress(&ctx, progress);
    ctx.close();
    result
}

/// Variables every script may use
pub(crate) fn base_vars(ctx: &Context) -> Result<Vars> {
    let version = ctx.cluster().kubernetes_version()?;
    Ok(Vars::new()
        .set("WORK_DIR", ctx.work_dir.as_str())
        .set("KUBERNETES_VERSION", version.to_string())
        .set("CNI_VERSION", CNI_VERSION))
}

/// Discover hostname and distribution, and record them on the run's cluster
pub(crate) fn detect_host_facts(
    ctx: &Context,
    host: &Host,
    runner: &Runner,
) -> Result<OperatingSystem> {
    let (hostname, _) = runner
        .run(HOSTNAME_SCRIPT, &Vars::new())
        .context("failed to determine hostname")?;
    if hostname.is_empty() {
        bail!("host reported an empty hostname");
    }

    let (os_id, _) = runner
        .run(OS_ID_SCRIPT, &Vars::new())
        .context("failed to determine operating system")?;
    let os: OperatingSystem = os_id.parse().map_err(anyhow::Error::msg)?;

    ctx.logger.debug(format!("hostname {hostname}, {os}"));
    ctx.update_host(host.id, |h| {
        h.hostname = hostname;
        h.operating_system = Some(os);
    });
    Ok(os)
}

/// Operating system recorded for a host, detecting it if needed
pub(crate) fn host_os(ctx: &Context, host: &Host, runner: &Runner) -> Result<OperatingSystem> {
    match host.operating_system {
        Some(os) => Ok(os),
        None => detect_host_facts(ctx, host, runner),
    }
}

/// Script variables for one host
pub(crate) fn host_vars(vars: &Vars, host: &Host) -> Vars {
    vars.clone()
        .set("NODE_ID", host.id.to_string())
        .set("NODE_NAME", host.node_name())
        .set("PRIVATE_ADDRESS", host.private_address.as_str())
}

/// Connect to the API through the leader and keep the client on the context
pub(crate) fn build_kube_client(ctx: &Context) -> Result<()> {
    run_tasks(ctx, Selector::Leader, |ctx, _, runner| {
        let client = KubeClient::connect(runner.clone(), &ctx.retry)?;
        ctx.set_kube_client(client);
        Ok(())
    })
}

/// Push the whole staged file set into the host's work directory
pub(crate) fn upload_configuration(ctx: &Context, runner: &Runner) -> Result<()> {
    let configuration = ctx.configuration();
    if configuration.is_empty() {
        return Ok(());
    }
    ctx.logger.debug(format!(
        "uploading {} staged files: {}",
        configuration.len(),
        configuration.paths().collect::<Vec<_>>().join(", ")
    ));
    configuration
        .upload_to(runner.session(), &ctx.work_dir)
        .context("failed to upload staged files")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sshkit::testing::FakeConnector;

    /// A fake fleet answering fact discovery like Ubuntu hosts
    pub(crate) fn fleet(addresses: &[&str]) -> Arc<FakeConnector> {
        let connector = Arc::new(FakeConnector::new());
        connector.respond("os-release", "ubuntu");
        for (i, address) in addresses.iter().enumerate() {
            connector.respond_on(address, HOSTNAME_SCRIPT, &format!("node-{i}"));
        }
        connector
    }

    #[test]
    fn test_detect_host_facts_records_on_cluster() {
        let connector = fleet(&["h0", "h1"]);
        let ctx = Context::new(
            crate::cluster::tests::cluster(&["h0", "h1"], "1.14.1"),
            Options::default(),
            connector,
        );
        let host = ctx.cluster().hosts[1].clone();
        let runner = Runner::new(ctx.connect(&host).unwrap(), false);

        let os = detect_host_facts(&ctx, &host, &runner).unwrap();

        assert_eq!(os, OperatingSystem::Ubuntu);
        let cluster = ctx.cluster();
        let updated = &cluster.hosts[1];
        assert_eq!(updated.hostname, "node-1");
        assert_eq!(updated.operating_system, Some(OperatingSystem::Ubuntu));
    }

    #[test]
    fn test_unsupported_os_is_an_error() {
        let connector = fleet(&["h0"]);
        connector.respond("os-release", "arch");
        let ctx = Context::new(
            crate::cluster::tests::cluster(&["h0"], "1.14.1"),
            Options::default(),
            connector,
        );
        let host = ctx.cluster().hosts[0].clone();
        let runner = Runner::new(ctx.connect(&host).unwrap(), false);

        let err = detect_host_facts(&ctx, &host, &runner).unwrap_err();
        assert!(err.to_string().contains("unsupported operating system"));
    }
}
