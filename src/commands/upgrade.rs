use anyhow::Result;

use super::{base_options, connector, load_cluster};
use crate::Context as AppContext;
use crate::cli::UpgradeArgs;
use crate::context::Options;
use crate::ui::{self, UiProgress};
use crate::workflow;

pub fn run(app: &AppContext, args: UpgradeArgs) -> Result<()> {
    ui::header("Upgrading control plane");
    let cluster = load_cluster(&args.manifest)?;

    if args.force {
        ui::warn("Version-skew checks downgraded to warnings (--force)");
    }

    let options = Options {
        force_upgrade: args.force,
        ..base_options(app)
    };

    workflow::upgrade(&cluster, &options, connector(), &mut UiProgress::new(app.quiet))
}
