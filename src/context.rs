//! Per-invocation run state shared by every pipeline step
//!
//! `Context` is cheap to clone: the cluster, session pool, staged file set,
//! join command and API client are shared behind `Arc`s, while the logger
//! tag belongs to each clone. The dispatcher hands every host task its own
//! clone via [`Context::with_host`].

use anyhow::{Context as _, Result};
use sshkit::{Connector, Session, SessionPool};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use stepflow::RetryConfig;

use crate::cluster::{Cluster, Host};
use crate::configuration::Configuration;
use crate::kube::KubeClient;

/// Remote work directory, relative to the SSH user's home
pub const DEFAULT_WORK_DIR: &str = "kubeone";

/// User-supplied switches for a workflow
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Stream remote output live
    pub verbose: bool,
    /// Archive the staged file set (PKI included) here after certificates
    /// are generated
    pub backup_file: Option<PathBuf>,
    /// Also write the admin kubeconfig here after install
    pub kubeconfig_file: Option<PathBuf>,
    /// Delete machine-controller workers before resetting
    pub destroy_workers: bool,
    /// Uninstall kubeadm, kubelet and kubectl during reset
    pub remove_binaries: bool,
    /// Downgrade upgrade preflight failures to warnings
    pub force_upgrade: bool,
}

/// Log lines tagged with the host being worked on
#[derive(Debug, Clone, Default)]
pub struct HostLogger {
    address: Option<String>,
}

impl HostLogger {
    pub fn for_host(address: &str) -> Self {
        Self {
            address: Some(address.to_string()),
        }
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    fn tag(&self) -> String {
        match &self.address {
            Some(address) => format!("[{address}] "),
            None => String::new(),
        }
    }

    pub fn info(&self, msg: impl Display) {
        log::info!("{}{}", self.tag(), msg);
    }

    pub fn warn(&self, msg: impl Display) {
        log::warn!("{}{}", self.tag(), msg);
    }

    pub fn debug(&self, msg: impl Display) {
        log::debug!("{}{}", self.tag(), msg);
    }
}

#[derive(Clone)]
pub struct Context {
    cluster: Arc<RwLock<Cluster>>,
    pool: Arc<SessionPool>,
    configuration: Arc<Mutex<Configuration>>,
    join_command: Arc<Mutex<Option<String>>>,
    kube_client: Arc<Mutex<Option<KubeClient>>>,
    pub options: Options,
    pub work_dir: String,
    /// Backoff for steps waiting on eventual consistency
    pub retry: RetryConfig,
    pub logger: HostLogger,
}

impl Context {
    pub fn new(cluster: Cluster, options: Options, connector: Arc<dyn Connector>) -> Self {
        Self {
            cluster: Arc::new(RwLock::new(cluster)),
            pool: Arc::new(SessionPool::new(connector)),
            configuration: Arc::new(Mutex::new(Configuration::new())),
            join_command: Arc::new(Mutex::new(None)),
            kube_client: Arc::new(Mutex::new(None)),
            options,
            work_dir: DEFAULT_WORK_DIR.to_string(),
            retry: RetryConfig::default(),
            logger: HostLogger::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Shallow clone whose log lines are tagged with `host`
    pub fn with_host(&self, host: &Host) -> Self {
        Self {
            logger: HostLogger::for_host(&host.public_address),
            ..self.clone()
        }
    }

    /// Snapshot of the cluster, including facts discovered so far
    pub fn cluster(&self) -> Cluster {
        match self.cluster.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Record discovered facts on a host
    pub fn update_host(&self, id: usize, update: impl FnOnce(&mut Host)) {
        let mut cluster = match self.cluster.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(host) = cluster.host_mut(id) {
            update(host);
        }
    }

    /// Open (or reuse) the session for a host
    pub fn connect(&self, host: &Host) -> Result<Arc<dyn Session>> {
        self.pool
            .connect(&host.target())
            .with_context(|| format!("failed to connect to {}", host.public_address))
    }

    pub fn configuration(&self) -> MutexGuard<'_, Configuration> {
        lock(&self.configuration)
    }

    pub fn set_join_command(&self, command: String) {
        *lock(&self.join_command) = Some(command);
    }

    pub fn join_command(&self) -> Result<String> {
        lock(&self.join_command)
            .clone()
            .context("join command is not available; the leader has not been initialized")
    }

    pub fn set_kube_client(&self, client: KubeClient) {
        *lock(&self.kube_client) = Some(client);
    }

    pub fn kube_client(&self) -> Result<KubeClient> {
        lock(&self.kube_client)
            .clone()
            .context("Kubernetes API client has not been built")
    }

    /// Close every pooled session
    pub fn close(&self) {
        self.pool.close_all();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::tests::cluster;
    use sshkit::testing::FakeConnector;

    fn context() -> Context {
        Context::new(
            cluster(&["h0", "h1"], "1.14.1"),
            Options::default(),
            Arc::new(FakeConnector::new()),
        )
    }

    #[test]
    fn test_with_host_tags_only_the_clone() {
        let ctx = context();
        let snapshot = ctx.cluster();
        let h1 = ctx.with_host(&snapshot.hosts[1]);

        assert_eq!(h1.logger.address(), Some("h1"));
        assert_eq!(ctx.logger.address(), None);
    }

    #[test]
    fn test_clones_share_state() {
        let ctx = context();
        let snapshot = ctx.cluster();
        let h1 = ctx.with_host(&snapshot.hosts[1]);

        h1.configuration().add("cfg/master_1.yaml", "x");
        h1.set_join_command("kubeadm join h0:6443".to_string());
        h1.update_host(1, |h| h.hostname = "node-1".to_string());

        assert_eq!(ctx.configuration().len(), 1);
        assert_eq!(ctx.join_command().unwrap(), "kubeadm join h0:6443");
        assert_eq!(ctx.cluster().hosts[1].hostname, "node-1");
    }

    #[test]
    fn test_join_command_missing() {
        let err = context().join_command().unwrap_err();
        assert!(err.to_string().contains("not been initialized"));
    }
}
