use anyhow::{Context as _, Result};

use super::{base_options, connector, load_cluster};
use crate::Context as AppContext;
use crate::cli::ResetArgs;
use crate::context::Options;
use crate::ui::{self, UiProgress};
use crate::workflow;

pub fn run(app: &AppContext, args: ResetArgs) -> Result<()> {
    ui::header("Resetting cluster");
    let cluster = load_cluster(&args.manifest)?;

    if !args.yes {
        ui::warn("This removes Kubernetes and all cluster state from every host.");
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Reset cluster {}?", cluster.name))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;

        if !confirmed {
            ui::warn("Aborted. No changes made.");
            return Ok(());
        }
    }

    let options = Options {
        destroy_workers: args.destroy_workers,
        remove_binaries: args.remove_binaries,
        ..base_options(app)
    };

    workflow::reset(&cluster, &options, connector(), &mut UiProgress::new(app.quiet))
}
