use anyhow::Result;
use chrono::Utc;

use super::{backup_path, base_options, connector, load_cluster};
use crate::Context as AppContext;
use crate::cli::InstallArgs;
use crate::context::Options;
use crate::ui::{self, UiProgress};
use crate::workflow;

pub fn run(app: &AppContext, args: InstallArgs) -> Result<()> {
    ui::header("Installing Kubernetes");
    let cluster = load_cluster(&args.manifest)?;

    let options = Options {
        backup_file: backup_path(args.backup.as_deref(), &cluster.name, Utc::now()),
        kubeconfig_file: args.kubeconfig,
        ..base_options(app)
    };
    if let Some(path) = &options.backup_file {
        ui::kv("Backup", &path.display().to_string());
    }

    workflow::install(&cluster, &options, connector(), &mut UiProgress::new(app.quiet))?;

    if let Some(path) = &options.kubeconfig_file {
        ui::info(&format!("Admin kubeconfig saved to {}", path.display()));
    }
    Ok(())
}
