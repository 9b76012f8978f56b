//! Reset: tear the cluster down to bare hosts

use anyhow::{Result, anyhow};
use stepflow::{LogCallback, Pipeline, with_retry};

use super::{base_vars, build_kube_client, host_os};
use crate::cluster::Host;
use crate::context::{Context, Options};
use crate::dispatch::{Selector, run_tasks};
use crate::kube::MACHINE_NAMESPACE;
use crate::runner::Runner;
use crate::template::Vars;

const RESET_SCRIPT: &str = r#"
sudo kubeadm reset --force
sudo rm -rf /etc/kubernetes /var/lib/etcd "${HOME}/.kube" "./{{ .WORK_DIR }}"
"#;

pub fn pipeline(options: &Options) -> Pipeline<Context> {
    let mut pipeline = Pipeline::new("reset");
    if options.destroy_workers {
        pipeline = pipeline.step("destroy workers", destroy_workers);
    }
    pipeline = pipeline.step("reset cluster", reset_hosts);
    if options.remove_binaries {
        pipeline = pipeline.step("remove binaries", remove_binaries);
    }
    pipeline
}

/// Delete every MachineDeployment and wait for the machines to go away
///
/// Not reaching an empty machine list only warns; the hosts are reset
/// regardless.
fn destroy_workers(ctx: &Context) -> Result<()> {
    build_kube_client(ctx)?;
    let kube = ctx.kube_client()?;

    ctx.logger.info("destroying worker machines");
    let callback = LogCallback {
        operation: "destroying worker machines",
    };
    let result = with_retry(&ctx.retry, Some(&callback), || -> Result<()> {
        kube.delete_all("machinedeployments", MACHINE_NAMESPACE)?;
        let remaining = kube.list_names("machines", MACHINE_NAMESPACE)?;
        if remaining.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("{} machine(s) still present", remaining.len()))
        }
    });

    if let Err(e) = result {
        ctx.logger
            .warn(format!("worker machines were not destroyed: {e:#}; continuing with reset"));
    }
    Ok(())
}

fn reset_hosts(ctx: &Context) -> Result<()> {
    let vars = base_vars(ctx)?;
    let task = |ctx: &Context, _: &Host, runner: &Runner| -> Result<()> {
        ctx.logger.info("resetting node");
        runner.run(RESET_SCRIPT, &vars)?;
        Ok(())
    };

    run_tasks(ctx, Selector::All, task)?;
    run_tasks(ctx, Selector::Workers, task)
}

fn remove_binaries(ctx: &Context) -> Result<()> {
    let task = |ctx: &Context, host: &Host, runner: &Runner| -> Result<()> {
        let os = host_os(ctx, host, runner)?;
        ctx.logger.info(format!("removing Kubernetes binaries ({os})"));
        runner.run(os.scripts().remove_binaries, &Vars::new())?;
        Ok(())
    };

    run_tasks(ctx, Selector::All, task)?;
    run_tasks(ctx, Selector::Workers, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::tests::{cluster, host};
    use crate::workflow::tests::fleet;
    use sshkit::testing::FakeConnector;
    use std::sync::Arc;
    use std::time::Duration;
    use stepflow::RetryConfig;

    fn run(options: Options, connector: &Arc<FakeConnector>) -> Result<()> {
        let mut c = cluster(&["h0", "h1"], "1.14.1");
        c.static_workers = vec![host("w0")];
        c.default_and_validate()?;
        let ctx = Context::new(c, options.clone(), connector.clone())
            .with_retry(RetryConfig::new(3, Duration::from_millis(1), 2.0));
        pipeline(&options).execute(&ctx)
    }

    #[test]
    fn test_reset_every_host() {
        let connector = fleet(&["h0", "h1", "w0"]);

        run(Options::default(), &connector).unwrap();

        assert_eq!(
            connector.hosts_running("kubeadm reset --force"),
            vec!["h0", "h1", "w0"]
        );
        assert!(connector.hosts_running("delete machinedeployments").is_empty());
        assert!(connector.hosts_running("apt-get remove").is_empty());
    }

    #[test]
    fn test_destroy_workers_then_reset() {
        let connector = fleet(&["h0", "h1", "w0"]);
        let options = Options {
            destroy_workers: true,
            ..Default::default()
        };

        run(options, &connector).unwrap();

        assert_eq!(connector.hosts_running("delete machinedeployments --all"), vec!["h0"]);
        let commands: Vec<_> = connector.commands().into_iter().map(|(_, c)| c).collect();
        let deleted = commands.iter().position(|c| c.contains("delete machinedeployments"));
        let reset = commands.iter().position(|c| c.contains("kubeadm reset"));
        assert!(deleted < reset);
    }

    #[test]
    fn test_lingering_machines_only_warn() {
        let connector = fleet(&["h0", "h1", "w0"]);
        connector.respond("get machines -o name", "machine.cluster.k8s.io/pool-abc");
        let options = Options {
            destroy_workers: true,
            ..Default::default()
        };

        run(options, &connector).unwrap();

        assert_eq!(connector.hosts_running("get machines -o name").len(), 3);
        assert_eq!(connector.hosts_running("kubeadm reset --force").len(), 3);
    }

    #[test]
    fn test_unreachable_api_is_fatal_when_destroying_workers() {
        let connector = fleet(&["h0", "h1", "w0"]);
        connector.fail("/healthz", "connection refused");
        let options = Options {
            destroy_workers: true,
            ..Default::default()
        };

        let err = run(options, &connector).unwrap_err();

        assert!(err.to_string().contains("destroy workers"));
        assert!(connector.hosts_running("kubeadm reset").is_empty());
    }

    #[test]
    fn test_remove_binaries_uses_detected_os() {
        let connector = fleet(&["h0", "h1", "w0"]);
        connector.respond_on("w0", "os-release", "centos");
        let options = Options {
            remove_binaries: true,
            ..Default::default()
        };

        run(options, &connector).unwrap();

        assert_eq!(connector.hosts_running("apt-get remove"), vec!["h0", "h1"]);
        assert_eq!(connector.hosts_running("yum remove"), vec!["w0"]);
    }
}
