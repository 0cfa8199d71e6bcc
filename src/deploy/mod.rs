pub mod context;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::artifacts;
use crate::config::Settings;
use crate::env_files;
use crate::git;
use crate::output;
use crate::providers;
use crate::provision;
use crate::remote::{RemoteExecutor, RunOptions};
use crate::ssh::SshSession;

use context::{ci_output_path, DeployContext, Step};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReport {
    pub host: String,
    pub hostname: String,
    pub branch: Option<String>,
}

/// Deploy to every configured host. Hosts run concurrently; the run fails
/// once all of them have finished if any one failed.
pub async fn run(settings: &Settings) -> Result<()> {
    let contexts: Vec<DeployContext> = settings
        .per_host()?
        .into_iter()
        .map(DeployContext::new)
        .collect();

    output::header(&format!(
        "Deploying {} ({}, {}) to {} host(s)",
        settings.project_name(),
        settings.deployment,
        settings.environment,
        contexts.len()
    ));

    let hosts: Vec<String> = contexts.iter().map(|ctx| ctx.host().to_string()).collect();
    let results: Vec<Result<HostReport>> = if contexts.len() == 1 {
        let mut results = Vec::new();
        for ctx in &contexts {
            results.push(deploy_host(ctx).await);
        }
        results
    } else {
        let handles = contexts
            .into_iter()
            .map(|ctx| tokio::spawn(async move { deploy_host(&ctx).await }));
        join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_else(|e| Err(anyhow!("Deploy task failed: {}", e))))
            .collect()
    };

    println!();
    let mut failed = 0;
    for (host, result) in hosts.iter().zip(&results) {
        match result {
            Ok(report) => output::success(&format!(
                "{} ({}) deployed{}",
                report.host,
                report.hostname,
                report
                    .branch
                    .as_ref()
                    .map(|b| format!(" from branch {}", b))
                    .unwrap_or_default()
            )),
            Err(e) => {
                failed += 1;
                output::error(&format!("{}: {:#}", host, e));
            }
        }
    }

    if failed > 0 {
        bail!("Deployment failed on {} of {} host(s)", failed, hosts.len());
    }

    if let Some(path) = ci_output_path(settings) {
        let deployed_at = Utc::now().to_rfc3339();
        output::write_step_outputs(
            &path,
            &[("deployment_status", "success"), ("deployed_at", deployed_at.as_str())],
        )?;
    }
    output::success("Deployment completed successfully!");
    Ok(())
}

async fn deploy_host(ctx: &DeployContext) -> Result<HostReport> {
    let settings = &ctx.settings;
    output::info(&format!(
        "Connecting to {}@{}",
        settings.remote.user,
        ctx.host()
    ));

    let session = SshSession::connect(&settings.remote, settings.use_sudo).await?;
    let result = run_pipeline(&session, ctx).await;
    if let Err(e) = session.close().await {
        warn!("{:#}", e);
    }
    result
}

/// Run every planned step against one host.
pub async fn run_pipeline(exec: &dyn RemoteExecutor, ctx: &DeployContext) -> Result<HostReport> {
    let settings = &ctx.settings;

    let hostname = exec
        .run("hostname", RunOptions::default().hidden())
        .await?
        .stdout
        .trim()
        .to_string();
    debug!(host = ctx.host(), "remote hostname is {}", hostname);
    if let Some(path) = ctx.ci_output() {
        output::write_step_outputs(&path, &[("remote_hostname", hostname.as_str())])?;
    }

    let total = ctx.steps.len();
    let mut branch = None;
    for (i, step) in ctx.steps.iter().enumerate() {
        output::step(i + 1, total, &format!("{} on {}", step, ctx.host()));
        match step {
            Step::InstallDependencies => provision::install_dependencies(exec).await?,
            Step::InstallDocker => provision::install_docker(exec, settings).await?,
            Step::InstallKubernetes => {
                provision::install_kubectl(exec).await?;
                provision::install_helm(exec, settings).await?;
                provision::install_k3s(exec).await?;
            }
            Step::SyncRepository => {
                let access = git::resolve_auth(&settings.git, settings.remote.ssh_key.as_deref())?;
                let synced = git::sync_repository(exec, settings, &access)
                    .await
                    .context("Failed to sync the repository")?;
                branch = Some(synced);
            }
            Step::GenerateEnvFiles => env_files::generate_env_files(exec, settings).await,
            Step::CopyArtifacts => artifacts::copy_artifacts(exec, settings).await?,
            Step::Deploy => providers::dispatch(exec, settings).await?,
        }
    }

    Ok(HostReport {
        host: ctx.host().to_string(),
        hostname,
        branch,
    })
}
