//! Upgrade: move the control plane to the requested version, one host at a time

use anyhow::{Context as _, Result};
use stepflow::Pipeline;

use super::preflight::{LOCK_LABEL, check_nodes, check_version_skew, find_node};
use super::{base_vars, build_kube_client, detect_host_facts, host_vars, upload_configuration};
use crate::cluster::{Cluster, Host};
use crate::context::Context;
use crate::dispatch::{Selector, run_tasks};
use crate::kube::Node;
use crate::manifests::kubeadm::{KubeadmFlavor, flavor_for};
use crate::runner::Runner;
use crate::template::Vars;

const UPGRADE_LEADER_SCRIPT: &str = r#"
sudo kubeadm upgrade apply -y --config=./{{ .WORK_DIR }}/cfg/master_{{ .NODE_ID }}.yaml
"#;

const UPGRADE_FOLLOWER_SCRIPT: &str = "sudo {{ .UPGRADE_COMMAND }}";

pub fn pipeline(cluster: &Cluster) -> Result<Pipeline<Context>> {
    let flavor = flavor_for(&cluster.kubernetes_version()?)?;
    log::debug!("using kubeadm {} flavor", flavor.name());

    Ok(Pipeline::new("upgrade")
        .step("build Kubernetes API client", build_kube_client)
        .step("run preflight checks", run_preflight)
        .step("upgrade control plane", move |ctx| {
            upgrade_control_plane(ctx, flavor)
        }))
}

fn run_preflight(ctx: &Context) -> Result<()> {
    let cluster = ctx.cluster();
    let kube = ctx.kube_client()?;

    let nodes = kube.nodes()?;
    check_nodes(&nodes, &cluster.hosts)?;

    let kubelets = nodes
        .iter()
        .map(Node::kubelet_version)
        .collect::<Result<Vec<_>>>()?;
    let control_plane = kube.server_version()?;
    let requested = cluster.kubernetes_version()?;
    ctx.logger
        .info(format!("upgrading from {control_plane} to {requested}"));

    let warnings = check_version_skew(
        &requested,
        &control_plane,
        &kubelets,
        ctx.options.force_upgrade,
    )?;
    for warning in warnings {
        ctx.logger.warn(format!("{warning} (ignored because of --force)"));
    }
    Ok(())
}

fn upgrade_control_plane(ctx: &Context, flavor: &dyn KubeadmFlavor) -> Result<()> {
    let vars = base_vars(ctx)?.set("UPGRADE_COMMAND", flavor.upgrade_follower_command());

    run_tasks(ctx, Selector::All, |ctx, host, runner| {
        upgrade_host(ctx, host, runner, flavor, &vars)
    })
}

fn upgrade_host(
    ctx: &Context,
    host: &Host,
    runner: &Runner,
    flavor: &dyn KubeadmFlavor,
    vars: &Vars,
) -> Result<()> {
    let os = detect_host_facts(ctx, host, runner)?;
    let cluster = ctx.cluster();
    let host = cluster
        .hosts
        .iter()
        .find(|h| h.id == host.id)
        .context("host disappeared from the cluster")?;
    let vars = host_vars(vars, host);

    let kube = ctx.kube_client()?;
    let node = find_node(&kube.nodes()?, host)?.name().to_string();

    ctx.logger.info(format!("locking node {node}"));
    kube.label_node(&node, LOCK_LABEL, "true")?;

    ctx.logger.info("upgrading kubeadm");
    runner.run(os.scripts().upgrade_kubeadm, &vars)?;

    {
        let mut configuration = ctx.configuration();
        configuration.add(
            format!("cfg/master_{}.yaml", host.id),
            &flavor.config(&cluster, host)?,
        );
    }
    upload_configuration(ctx, runner)?;

    if host.is_leader {
        ctx.logger.info("running kubeadm upgrade apply");
        runner.run(UPGRADE_LEADER_SCRIPT, &vars)?;
    } else {
        ctx.logger.info("running kubeadm upgrade node");
        runner.run(UPGRADE_FOLLOWER_SCRIPT, &vars)?;
    }

    ctx.logger.info("upgrading kubelet");
    runner.run(os.scripts().upgrade_kubelet, &vars)?;

    kube.unlabel_node(&node, LOCK_LABEL)?;
    ctx.logger.info(format!("node {node} upgraded"));
    Ok(())
}
