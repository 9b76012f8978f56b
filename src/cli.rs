use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kubeone")]
#[command(author = "Kubermatic")]
#[command(version)]
#[command(about = "Provision highly-available Kubernetes clusters over SSH", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level; twice or more also streams remote command output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Install Kubernetes on the hosts of a cluster manifest
    Install(InstallArgs),

    /// Tear a cluster down and return the hosts to a pre-install state
    Reset(ResetArgs),

    /// Upgrade the control plane to the version in the manifest
    Upgrade(UpgradeArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Install
// ============================================================================

#[derive(Parser)]
pub struct InstallArgs {
    /// Cluster manifest (TOML)
    pub manifest: PathBuf,

    /// Archive PKI and generated configuration; without a path a
    /// timestamped file is written to the current directory
    #[arg(short, long, num_args = 0..=1, default_missing_value = "")]
    pub backup: Option<String>,

    /// Save the admin kubeconfig to this file
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,
}

// ============================================================================
// Reset
// ============================================================================

#[derive(Parser)]
pub struct ResetArgs {
    /// Cluster manifest (TOML)
    pub manifest: PathBuf,

    /// Delete worker machines through machine-controller first
    #[arg(long)]
    pub destroy_workers: bool,

    /// Also uninstall kubelet, kubeadm and kubectl
    #[arg(long)]
    pub remove_binaries: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

// ============================================================================
// Upgrade
// ============================================================================

#[derive(Parser)]
pub struct UpgradeArgs {
    /// Cluster manifest (TOML)
    pub manifest: PathBuf,

    /// Turn version-skew violations into warnings
    #[arg(short, long)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("kubeone").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_backup_without_path() {
        let Command::Install(args) = parse(&["install", "cluster.toml", "--backup"]).command else {
            panic!("expected install");
        };
        assert_eq!(args.backup.as_deref(), Some(""));
        assert_eq!(args.manifest, PathBuf::from("cluster.toml"));
    }

    #[test]
    fn test_backup_with_path() {
        let Command::Install(args) =
            parse(&["install", "cluster.toml", "--backup", "pki.tar.gz"]).command
        else {
            panic!("expected install");
        };
        assert_eq!(args.backup.as_deref(), Some("pki.tar.gz"));

        let Command::Install(args) = parse(&["install", "cluster.toml"]).command else {
            panic!("expected install");
        };
        assert!(args.backup.is_none());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["reset", "cluster.toml", "--destroy-workers", "-y", "-vv"]);
        assert_eq!(cli.verbose, 2);
        let Command::Reset(args) = cli.command else {
            panic!("expected reset");
        };
        assert!(args.destroy_workers);
        assert!(args.yes);
        assert!(!args.remove_binaries);
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
