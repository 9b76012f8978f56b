//! Install: bring up a highly-available control plane

use anyhow::{Context as _, Result, bail};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use stepflow::Pipeline;

use super::{base_vars, build_kube_client, detect_host_facts, host_vars, upload_configuration};
use crate::cluster::{Cluster, Host};
use crate::configuration::Configuration;
use crate::context::Context;
use crate::dispatch::{Selector, run_tasks};
use crate::kube::{KUBECTL, MACHINE_NAMESPACE};
use crate::manifests::kubeadm::{KubeadmFlavor, flavor_for};
use crate::manifests::{ark, machine_controller, workers};
use crate::runner::Runner;

pub const KUBECONFIG_FILE: &str = "kubeconfig";
pub const MACHINE_CONTROLLER_FILE: &str = "machine-controller.yaml";
pub const WORKERS_FILE: &str = "workers.yaml";
pub const ARK_FILE: &str = "ark.yaml";

const MACHINE_CONTROLLER_TIMEOUT: Duration = Duration::from_secs(300);

/// CA material shared by every control-plane host
const SHARED_PKI: &str =
    "ca.crt ca.key sa.key sa.pub front-proxy-ca.crt front-proxy-ca.key etcd/ca.crt etcd/ca.key";

const GENERATE_CA_SCRIPT: &str = r#"
if [[ ! -f /etc/kubernetes/pki/ca.crt ]]; then
  sudo kubeadm init phase certs all --config=./{{ .WORK_DIR }}/cfg/master_{{ .NODE_ID }}.yaml
fi
mkdir -p ./{{ .WORK_DIR }}/pki/etcd
for f in {{ .SHARED_PKI }}; do
  sudo cp "/etc/kubernetes/pki/${f}" "./{{ .WORK_DIR }}/pki/${f}"
done
sudo chown -R "$(id -u):$(id -g)" ./{{ .WORK_DIR }}/pki
"#;

const CLEAN_PKI_SCRIPT: &str = "rm -rf ./{{ .WORK_DIR }}/pki";

const INSTALL_CA_SCRIPT: &str = r#"
sudo mkdir -p /etc/kubernetes/pki/etcd
for f in {{ .SHARED_PKI }}; do
  sudo install -m 0600 -o root -g root "./{{ .WORK_DIR }}/pki/${f}" "/etc/kubernetes/pki/${f}"
done
rm -rf ./{{ .WORK_DIR }}/pki
"#;

const FOLLOWER_CERTS_SCRIPT: &str = r#"
for phase in apiserver apiserver-kubelet-client apiserver-etcd-client front-proxy-client etcd-server etcd-peer etcd-healthcheck-client; do
  sudo kubeadm init phase certs "${phase}" --config=./{{ .WORK_DIR }}/cfg/master_{{ .NODE_ID }}.yaml
done
"#;

const INIT_SCRIPT: &str = r#"
if [[ -f /etc/kubernetes/admin.conf ]]; then
  echo "control plane already initialized"
  exit 0
fi
sudo kubeadm init --config=./{{ .WORK_DIR }}/cfg/master_{{ .NODE_ID }}.yaml
"#;

const JOIN_TOKEN_SCRIPT: &str = "sudo kubeadm token create --print-join-command";

const JOIN_CONTROL_PLANE_SCRIPT: &str = r#"
if [[ -f /etc/kubernetes/kubelet.conf ]]; then
  echo "node already joined"
  exit 0
fi
sudo {{ .JOIN_COMMAND }} {{ .CONTROL_PLANE_FLAG }} \
  --node-name={{ .NODE_NAME }} \
  --apiserver-advertise-address={{ .PRIVATE_ADDRESS }}
"#;

const JOIN_WORKER_SCRIPT: &str = r#"
if [[ -f /etc/kubernetes/kubelet.conf ]]; then
  echo "node already joined"
  exit 0
fi
sudo {{ .JOIN_COMMAND }} --node-name={{ .NODE_NAME }}
"#;

const COPY_KUBECONFIG_SCRIPT: &str = r#"
mkdir -p "${HOME}/.kube"
sudo cp /etc/kubernetes/admin.conf "${HOME}/.kube/config"
sudo chown "$(id -u):$(id -g)" "${HOME}/.kube/config"
cat "${HOME}/.kube/config"
"#;

/// Install steps for a cluster; optional add-ons only appear when enabled
pub fn pipeline(cluster: &Cluster) -> Result<Pipeline<Context>> {
    let flavor = flavor_for(&cluster.kubernetes_version()?)?;
    log::debug!("using kubeadm {} flavor", flavor.name());

    let mut pipeline = Pipeline::new("install")
        .step("install prerequisites", install_prerequisites)
        .step("generate kubeadm configuration", move |ctx| {
            generate_kubeadm_config(ctx, flavor)
        })
        .step("deploy CA", deploy_ca)
        .step("distribute CA", distribute_ca)
        .step("deploy certificates on followers", follower_certificates)
        .step("initialize control plane", init_leader)
        .step("join control plane", move |ctx| join_control_plane(ctx, flavor));

    if !cluster.static_workers.is_empty() {
        pipeline = pipeline.step("join static workers", join_static_workers);
    }

    pipeline = pipeline
        .step("copy admin credentials", copy_kubeconfig)
        .step("build Kubernetes API client", build_kube_client)
        .step("apply CNI", apply_cni);

    if cluster.machine_controller.deploy {
        pipeline = pipeline.step("deploy machine-controller", deploy_machine_controller);
    }
    if !cluster.workers.is_empty() {
        pipeline = pipeline.step("create worker machines", create_worker_machines);
    }
    if cluster.backup.deploy {
        pipeline = pipeline.step("deploy Ark", deploy_ark);
    }

    Ok(pipeline)
}

fn install_prerequisites(ctx: &Context) -> Result<()> {
    let vars = base_vars(ctx)?;
    let task = |ctx: &Context, host: &Host, runner: &Runner| -> Result<()> {
        let os = detect_host_facts(ctx, host, runner)?;
        ctx.logger.info(format!("installing prerequisites for {os}"));
        runner.run(os.scripts().install, &vars)?;
        Ok(())
    };

    run_tasks(ctx, Selector::All, task)?;
    run_tasks(ctx, Selector::Workers, task)
}

fn generate_kubeadm_config(ctx: &Context, flavor: &dyn KubeadmFlavor) -> Result<()> {
    let cluster = ctx.cluster();
    {
        let mut configuration = ctx.configuration();
        for host in &cluster.hosts {
            configuration.add(
                format!("cfg/master_{}.yaml", host.id),
                &flavor.config(&cluster, host)?,
            );
        }
    }

    run_tasks(ctx, Selector::All, |ctx, _, runner| {
        upload_configuration(ctx, runner)
    })
}

fn deploy_ca(ctx: &Context) -> Result<()> {
    let vars = base_vars(ctx)?.set("SHARED_PKI", SHARED_PKI);

    run_tasks(ctx, Selector::Leader, |ctx, host, runner| {
        ctx.logger.info("generating certificates");
        runner.run(GENERATE_CA_SCRIPT, &host_vars(&vars, host))?;

        let pki_dir = format!("{}/pki", ctx.work_dir);
        let count = ctx
            .configuration()
            .download_from(runner.session(), &pki_dir, "pki")
            .context("failed to download PKI")?;
        ctx.logger.debug(format!("staged {count} PKI files"));

        runner.run(CLEAN_PKI_SCRIPT, &vars)?;
        Ok(())
    })?;

    backup(ctx);
    Ok(())
}

/// Archive the staged files if asked to; failure only warns
fn backup(ctx: &Context) {
    if let Some(path) = &ctx.options.backup_file {
        match ctx.configuration().backup(path) {
            Ok(()) => ctx
                .logger
                .info(format!("backed up PKI and configuration to {}", path.display())),
            Err(e) => ctx.logger.warn(format!(
                "failed to back up PKI to {}: {e}; continuing without a backup",
                path.display()
            )),
        }
    }
}

fn distribute_ca(ctx: &Context) -> Result<()> {
    let vars = base_vars(ctx)?.set("SHARED_PKI", SHARED_PKI);

    run_tasks(ctx, Selector::Followers, |ctx, _, runner| {
        ctx.logger.info("installing CA");
        upload_configuration(ctx, runner)?;
        runner.run(INSTALL_CA_SCRIPT, &vars)?;
        Ok(())
    })
}

fn follower_certificates(ctx: &Context) -> Result<()> {
    let vars = base_vars(ctx)?;

    run_tasks(ctx, Selector::Followers, |ctx, host, runner| {
        ctx.logger.info("generating certificates");
        runner.run(FOLLOWER_CERTS_SCRIPT, &host_vars(&vars, host))?;
        Ok(())
    })
}

fn init_leader(ctx: &Context) -> Result<()> {
    let vars = base_vars(ctx)?;

    run_tasks(ctx, Selector::Leader, |ctx, host, runner| {
        ctx.logger.info("initializing control plane");
        runner.run(INIT_SCRIPT, &host_vars(&vars, host))?;

        let (join_command, _) = runner.run(JOIN_TOKEN_SCRIPT, &vars)?;
        if join_command.is_empty() {
            bail!("kubeadm printed an empty join command");
        }
        ctx.set_join_command(join_command);
        Ok(())
    })
}

fn join_control_plane(ctx: &Context, flavor: &dyn KubeadmFlavor) -> Result<()> {
    let vars = base_vars(ctx)?
        .set("JOIN_COMMAND", ctx.join_command()?)
        .set("CONTROL_PLANE_FLAG", flavor.control_plane_join_flag());

    run_tasks(ctx, Selector::Followers, |ctx, host, runner| {
        ctx.logger.info("joining control plane");
        runner.run(JOIN_CONTROL_PLANE_SCRIPT, &host_vars(&vars, host))?;
        Ok(())
    })
}

fn join_static_workers(ctx: &Context) -> Result<()> {
    let vars = base_vars(ctx)?.set("JOIN_COMMAND", ctx.join_command()?);

    run_tasks(ctx, Selector::Workers, |ctx, host, runner| {
        ctx.logger.info("joining cluster as worker");
        runner.run(JOIN_WORKER_SCRIPT, &host_vars(&vars, host))?;
        Ok(())
    })
}

fn copy_kubeconfig(ctx: &Context) -> Result<()> {
    run_tasks(ctx, Selector::Leader, |ctx, _, runner| {
        let (kubeconfig, _) = runner.run(COPY_KUBECONFIG_SCRIPT, &base_vars(ctx)?)?;
        ctx.configuration().add(KUBECONFIG_FILE, &kubeconfig);

        if let Some(path) = &ctx.options.kubeconfig_file {
            write_private_file(path, &format!("{}\n", kubeconfig.trim_end()))
                .with_context(|| format!("failed to write kubeconfig to {}", path.display()))?;
            ctx.logger
                .info(format!("saved admin kubeconfig to {}", path.display()));
        }
        Ok(())
    })
}

/// Write `content` to a file only the current user can read
fn write_private_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    std::os::unix::fs::OpenOptionsExt::mode(&mut options, 0o600);

    let mut file = options.open(path)?;
    // An existing file keeps its old mode through open()
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(content.as_bytes())
}

fn apply_cni(ctx: &Context) -> Result<()> {
    let manifest = ctx.cluster().network.cni_manifest;
    ctx.logger.info(format!("applying CNI from {manifest}"));
    ctx.kube_client()?.apply(&manifest)
}

/// Stage `content` as `file`, push only that file to the leader and apply
/// it there
fn stage_and_apply(ctx: &Context, file: &str, content: &str) -> Result<()> {
    ctx.configuration().add(file, content);

    let mut single = Configuration::new();
    single.add(file, content);

    run_tasks(ctx, Selector::Leader, |ctx, _, runner| {
        single
            .upload_to(runner.session(), &ctx.work_dir)
            .with_context(|| format!("failed to upload {file}"))?;
        ctx.kube_client()?
            .apply(&format!("./{}/{}", ctx.work_dir, file))
    })
}

fn deploy_machine_controller(ctx: &Context) -> Result<()> {
    let manifest = machine_controller::manifest(&ctx.cluster());
    stage_and_apply(ctx, MACHINE_CONTROLLER_FILE, &manifest)?;

    let check = format!(
        "{KUBECTL} -n {MACHINE_NAMESPACE} get pods -l app={} -o jsonpath='{{.items[*].status.phase}}'",
        machine_controller::APP_LABEL
    );
    run_tasks(ctx, Selector::Leader, |ctx, _, runner| {
        ctx.logger.info("waiting for machine-controller to come up");
        let running = runner.wait_for_condition(&check, MACHINE_CONTROLLER_TIMEOUT, |phases| {
            !phases.is_empty() && phases.split_whitespace().all(|p| p == "Running")
        });
        if !running {
            bail!(
                "machine-controller did not become ready within {}s",
                MACHINE_CONTROLLER_TIMEOUT.as_secs()
            );
        }
        Ok(())
    })
}

fn create_worker_machines(ctx: &Context) -> Result<()> {
    let manifest = workers::manifest(&ctx.cluster())?;
    stage_and_apply(ctx, WORKERS_FILE, &manifest)
}

fn deploy_ark(ctx: &Context) -> Result<()> {
    let manifest = ark::manifest(&ctx.cluster());
    stage_and_apply(ctx, ARK_FILE, &manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::tests::{cluster, host};
    use crate::context::Options;
    use crate::workflow::tests::fleet;
    use sshkit::testing::FakeConnector;
    use std::sync::Arc;
    use stepflow::{LogProgress, RetryConfig};

    const JOIN: &str = "kubeadm join h0:6443 --token abc.def --discovery-token-ca-cert-hash sha256:1234";
    const KUBECONFIG: &str = "apiVersion: v1\nkind: Config";

    /// A fleet that answers like a healthy cluster bring-up
    fn healthy_fleet(addresses: &[&str]) -> Arc<FakeConnector> {
        let connector = fleet(addresses);
        connector.respond("token create", JOIN);
        connector.respond("find . -type f", "./ca.crt\n./etcd/ca.key");
        connector.put_file("h0", "kubeone/pki/ca.crt", b"CA CERT");
        connector.put_file("h0", "kubeone/pki/etcd/ca.key", b"ETCD KEY");
        connector.respond("cp /etc/kubernetes/admin.conf", KUBECONFIG);
        connector
    }

    fn run(cluster: &Cluster, options: Options, connector: &Arc<FakeConnector>) -> Result<Context> {
        let ctx = Context::new(cluster.clone(), options, connector.clone())
            .with_retry(RetryConfig::new(2, Duration::from_millis(1), 2.0));
        pipeline(cluster)?.execute_with_progress(&ctx, &mut LogProgress)?;
        Ok(ctx)
    }

    fn position(connector: &FakeConnector, needle: &str) -> usize {
        connector
            .commands()
            .iter()
            .position(|(_, c)| c.contains(needle))
            .unwrap_or_else(|| panic!("nothing ran {needle:?}"))
    }

    #[test]
    fn test_three_host_install_order() {
        let connector = healthy_fleet(&["h0", "h1", "h2"]);
        let c = cluster(&["h0", "h1", "h2"], "1.14.1");

        let ctx = run(&c, Options::default(), &connector).unwrap();

        assert_eq!(
            connector.hosts_running("apt-mark hold kubelet kubeadm kubectl"),
            vec!["h0", "h1", "h2"]
        );
        assert_eq!(connector.hosts_running("init phase certs all"), vec!["h0"]);
        assert_eq!(connector.hosts_running("sudo install -m 0600"), vec!["h1", "h2"]);
        assert_eq!(connector.hosts_running("kubeadm init --config"), vec!["h0"]);
        assert_eq!(connector.hosts_running("kubeadm join"), vec!["h1", "h2"]);
        assert_eq!(
            connector.hosts_running("cp /etc/kubernetes/admin.conf"),
            vec!["h0"]
        );

        let steps = [
            "apt-mark hold",
            "init phase certs all",
            "sudo install -m 0600",
            "kubeadm init --config",
            "kubeadm join",
            "cp /etc/kubernetes/admin.conf",
            "/healthz",
            "apply -f",
        ];
        for pair in steps.windows(2) {
            assert!(
                position(&connector, pair[0]) < position(&connector, pair[1]),
                "{} should run before {}",
                pair[0],
                pair[1]
            );
        }

        // Leader PKI reached the followers through the staged set
        assert_eq!(
            connector.file("h2", "kubeone/pki/etcd/ca.key").unwrap(),
            b"ETCD KEY"
        );
        assert!(
            connector
                .commands_on("h1")
                .iter()
                .any(|c| c.contains("--control-plane") && c.contains("--node-name=node-1"))
        );
        assert_eq!(ctx.configuration().get(KUBECONFIG_FILE).unwrap(), b"apiVersion: v1\nkind: Config\n");
        assert_eq!(ctx.cluster().hosts[2].hostname, "node-2");
    }

    #[test]
    fn test_join_failure_stops_before_admin_credentials() {
        let connector = healthy_fleet(&["h0", "h1", "h2"]);
        connector.fail_on("h1", "kubeadm join", "etcd cluster is unavailable");
        let c = cluster(&["h0", "h1", "h2"], "1.14.1");

        let err = run(&c, Options::default(), &connector).err().unwrap();

        assert!(err.to_string().contains("join"));
        assert!(format!("{err:#}").contains("etcd cluster is unavailable"));
        assert_eq!(connector.hosts_running("kubeadm join"), vec!["h1"]);
        assert!(connector.hosts_running("cp /etc/kubernetes/admin.conf").is_empty());
    }

    #[test]
    fn test_backup_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();

        let connector = healthy_fleet(&["h0", "h1"]);
        let c = cluster(&["h0", "h1"], "1.14.1");
        let options = Options {
            backup_file: Some(blocker.join("backup.tar.gz")),
            ..Default::default()
        };
        let ctx = Context::new(c.clone(), options, connector.clone());

        install_prerequisites(&ctx).unwrap();
        generate_kubeadm_config(&ctx, flavor_for(&c.kubernetes_version().unwrap()).unwrap())
            .unwrap();
        deploy_ca(&ctx).unwrap();

        assert_eq!(ctx.configuration().get("pki/ca.crt").unwrap(), b"CA CERT");
    }

    #[test]
    fn test_backup_and_kubeconfig_written() {
        let dir = tempfile::tempdir().unwrap();
        let backup_file = dir.path().join("test-backup.tar.gz");
        let kubeconfig_file = dir.path().join("kubeconfig");

        let connector = healthy_fleet(&["h0"]);
        let c = cluster(&["h0"], "1.13.5");
        let options = Options {
            backup_file: Some(backup_file.clone()),
            kubeconfig_file: Some(kubeconfig_file.clone()),
            ..Default::default()
        };

        run(&c, options, &connector).unwrap();

        assert!(backup_file.exists());
        assert_eq!(
            fs::read_to_string(&kubeconfig_file).unwrap(),
            "apiVersion: v1\nkind: Config\n"
        );
    }

    #[test]
    fn test_static_workers_join_after_control_plane() {
        let connector = healthy_fleet(&["h0", "h1", "w0"]);
        let mut c = cluster(&["h0", "h1"], "1.13.5");
        c.static_workers = vec![host("w0")];
        c.default_and_validate().unwrap();

        run(&c, Options::default(), &connector).unwrap();

        assert_eq!(connector.hosts_running("kubeadm join"), vec!["h1", "w0"]);
        let worker_join = connector
            .commands_on("w0")
            .into_iter()
            .find(|c| c.contains("kubeadm join"))
            .unwrap();
        assert!(!worker_join.contains("control-plane"));
        // v1.13 flavor
        assert!(
            connector
                .commands_on("h1")
                .iter()
                .any(|c| c.contains("--experimental-control-plane"))
        );
    }

    #[test]
    fn test_optional_addons_are_staged_and_applied() {
        let connector = healthy_fleet(&["h0"]);
        connector.respond("app=machine-controller", "Running");
        let mut c = cluster(&["h0"], "1.14.1");
        c.machine_controller.deploy = true;
        c.machine_controller.provider = "aws".to_string();
        c.workers.push(crate::cluster::WorkerConfig {
            name: "pool".to_string(),
            replicas: 2,
            cloud_provider_spec: serde_json::Value::Null,
            operating_system: String::new(),
        });
        c.backup.deploy = true;

        let labels = pipeline(&c).unwrap().labels().join(", ");
        assert!(labels.ends_with("deploy machine-controller, create worker machines, deploy Ark"));

        let ctx = run(&c, Options::default(), &connector).unwrap();

        for file in [MACHINE_CONTROLLER_FILE, WORKERS_FILE, ARK_FILE] {
            assert!(ctx.configuration().get(file).is_some());
            assert!(connector.file("h0", &format!("kubeone/{file}")).is_some());
            assert!(!connector.hosts_running(&format!("apply -f './kubeone/{file}'")).is_empty());
        }
    }

    #[test]
    fn test_leader_drops_pki_copy_after_download() {
        let connector = healthy_fleet(&["h0", "h1", "h2"]);
        let c = cluster(&["h0", "h1", "h2"], "1.14.1");

        run(&c, Options::default(), &connector).unwrap();

        let leader = connector.commands_on("h0");
        let download = leader.iter().position(|c| c.contains("find . -type f")).unwrap();
        let cleanup = leader
            .iter()
            .position(|c| c.contains("rm -rf ./kubeone/pki"))
            .unwrap();
        assert!(download < cleanup);
        assert_eq!(
            connector.hosts_running("rm -rf ./kubeone/pki"),
            vec!["h0", "h1", "h2"]
        );
    }

    #[test]
    fn test_addons_upload_only_their_manifest() {
        let connector = healthy_fleet(&["h0"]);
        let mut c = cluster(&["h0"], "1.14.1");
        c.backup.deploy = true;

        run(&c, Options::default(), &connector).unwrap();

        let uploads: Vec<String> = connector
            .commands_on("h0")
            .into_iter()
            .filter(|c| c.starts_with("upload "))
            .collect();
        assert_eq!(
            uploads,
            vec!["upload kubeone/cfg/master_0.yaml", "upload kubeone/ark.yaml"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_private_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/kubeconfig");
        write_private_file(&path, "apiVersion: v1\n").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let existing = dir.path().join("existing");
        fs::write(&existing, "old").unwrap();
        fs::set_permissions(&existing, fs::Permissions::from_mode(0o644)).unwrap();
        write_private_file(&existing, "new").unwrap();
        assert_eq!(fs::read_to_string(&existing).unwrap(), "new");
        let mode = fs::metadata(&existing).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_unsupported_version_rejected_up_front() {
        let c = cluster(&["h0"], "1.12.0");
        assert!(pipeline(&c).is_err());
    }
}
