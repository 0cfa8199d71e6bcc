mod artifacts;
mod cli;
mod config;
mod deploy;
mod env_files;
mod git;
mod output;
mod providers;
mod provision;
mod remote;
mod ssh;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::Settings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup tracing
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .without_time()
        .init();

    let deploying = matches!(cli.command, Command::Deploy);
    if let Err(e) = run(cli).await {
        output::error(&format!("{:#}", e));
        if deploying {
            record_failure();
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let vars = Settings::load_vars(&cli.config)?;
    let settings = Settings::from_vars(vars)?;

    match cli.command {
        Command::Deploy => {
            cli::deploy::run(settings).await?;
        }

        Command::EnvFiles { reveal, json } => {
            cli::env_files::run(&settings, reveal, json)?;
        }
    }

    Ok(())
}

fn record_failure() {
    let Some(path) = std::env::var_os("GITHUB_OUTPUT").map(PathBuf::from) else {
        return;
    };
    if let Err(e) = output::write_step_outputs(&path, &[("deployment_status", "failed")]) {
        tracing::warn!("{:#}", e);
    }
}
