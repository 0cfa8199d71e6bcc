use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod deploy;
pub mod env_files;

#[derive(Parser)]
#[command(
    name = "shipwright",
    version,
    about = "Deploy a git repository to remote hosts over SSH"
)]
pub struct Cli {
    /// Path to shipwright.toml (environment variables take precedence)
    #[arg(short, long, default_value = "shipwright.toml")]
    pub config: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Provision the hosts, sync the repository and run the deployment
    Deploy,

    /// Preview the environment files a deployment would write
    EnvFiles {
        /// Show values instead of masking them
        #[arg(long)]
        reveal: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
