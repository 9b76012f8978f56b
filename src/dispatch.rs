//! Per-host task dispatch by role

use anyhow::{Context as _, Result};

use crate::cluster::{Cluster, Host};
use crate::context::Context;
use crate::runner::Runner;

/// Which hosts a task runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// The first control-plane host
    Leader,
    /// Every control-plane host except the leader
    Followers,
    /// Every control-plane host, leader first
    All,
    /// Statically joined worker hosts
    Workers,
}

impl Selector {
    /// Selected hosts in ascending id order
    pub fn select(self, cluster: &Cluster) -> Vec<Host> {
        let mut hosts: Vec<Host> = match self {
            Self::Leader => cluster.hosts.iter().filter(|h| h.is_leader).cloned().collect(),
            Self::Followers => cluster.followers().cloned().collect(),
            Self::All => cluster.hosts.clone(),
            Self::Workers => cluster.static_workers.clone(),
        };
        hosts.sort_by_key(|h| h.id);
        hosts
    }
}

/// Run `task` once per selected host, one host at a time
///
/// Each invocation gets a host-tagged clone of the context and a fresh
/// runner over the pooled session. The first error stops the loop; later
/// hosts are not touched.
pub fn run_tasks<F>(ctx: &Context, selector: Selector, mut task: F) -> Result<()>
where
    F: FnMut(&Context, &Host, &Runner) -> Result<()>,
{
    for host in selector.select(&ctx.cluster()) {
        let host_ctx = ctx.with_host(&host);
        let session = ctx.connect(&host)?;
        let runner = Runner::new(session, ctx.options.verbose);

        task(&host_ctx, &host, &runner).with_context(|| format!("host {}", host.public_address))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::tests::{cluster, host};
    use crate::context::Options;
    use crate::template::Vars;
    use sshkit::testing::FakeConnector;
    use std::sync::Arc;

    fn context(connector: &Arc<FakeConnector>) -> Context {
        let mut c = cluster(&["h0", "h1", "h2"], "1.14.1");
        c.static_workers = vec![host("w0")];
        c.default_and_validate().unwrap();
        Context::new(c, Options::default(), connector.clone())
    }

    fn visited(ctx: &Context, selector: Selector) -> Vec<String> {
        let mut seen = Vec::new();
        run_tasks(ctx, selector, |_, host, _| {
            seen.push(host.public_address.clone());
            Ok(())
        })
        .unwrap();
        seen
    }

    #[test]
    fn test_role_order() {
        let connector = Arc::new(FakeConnector::new());
        let ctx = context(&connector);

        assert_eq!(visited(&ctx, Selector::Leader), vec!["h0"]);
        assert_eq!(visited(&ctx, Selector::Followers), vec!["h1", "h2"]);
        assert_eq!(visited(&ctx, Selector::All), vec!["h0", "h1", "h2"]);
        assert_eq!(visited(&ctx, Selector::Workers), vec!["w0"]);
    }

    #[test]
    fn test_stops_at_first_error() {
        let connector = Arc::new(FakeConnector::new());
        connector.fail_on("h1", "kubeadm join", "etcd unhealthy");
        let ctx = context(&connector);

        let err = run_tasks(&ctx, Selector::All, |_, _, runner| {
            runner.run("sudo kubeadm join", &Vars::new())?;
            Ok(())
        })
        .unwrap_err();

        assert!(format!("{err:#}").contains("host h1"));
        assert!(format!("{err:#}").contains("etcd unhealthy"));
        assert_eq!(connector.hosts_running("kubeadm join"), vec!["h0", "h1"]);
    }

    #[test]
    fn test_task_context_is_host_tagged_and_sessions_reused() {
        let connector = Arc::new(FakeConnector::new());
        let ctx = context(&connector);

        run_tasks(&ctx, Selector::All, |host_ctx, host, runner| {
            assert_eq!(host_ctx.logger.address(), Some(host.public_address.as_str()));
            assert_eq!(runner.address(), host.public_address);
            Ok(())
        })
        .unwrap();
        run_tasks(&ctx, Selector::All, |_, _, _| Ok(())).unwrap();

        assert_eq!(connector.connect_count(), 3);
        assert_eq!(ctx.logger.address(), None);
    }

    #[test]
    fn test_connection_failure_names_host() {
        let connector = Arc::new(FakeConnector::new());
        connector.refuse("h2");
        let ctx = context(&connector);

        let err = run_tasks(&ctx, Selector::All, |_, _, _| Ok(())).unwrap_err();
        assert!(err.to_string().contains("failed to connect to h2"));
    }
}
