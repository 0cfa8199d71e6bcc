use anyhow::{bail, Context, Result};

use crate::config::{RegistryType, Settings};
use crate::output;
use crate::remote::{quote, InDir, RemoteExecutor, RunOptions};

/// The `docker login` command for the configured registry, if any.
pub fn login_command(settings: &Settings) -> Result<Option<String>> {
    let command = match settings.registry {
        RegistryType::None => return Ok(None),
        RegistryType::Ghcr => {
            let (Some(user), Some(token)) = (&settings.git.user, &settings.git.token) else {
                bail!("GIT_USER and GIT_TOKEN must be set for GHCR");
            };
            format!(
                "printf '%s' {} | docker login ghcr.io -u {} --password-stdin",
                quote(token),
                quote(user)
            )
        }
        RegistryType::DockerHub => {
            let (Some(user), Some(password)) = (
                settings.var("REGISTRY_USERNAME"),
                settings.var("REGISTRY_PASSWORD"),
            ) else {
                bail!("REGISTRY_USERNAME and REGISTRY_PASSWORD must be set");
            };
            format!(
                "printf '%s' {} | docker login -u {} --password-stdin",
                quote(password),
                quote(user)
            )
        }
        RegistryType::Ecr => {
            let (Some(region), Some(account)) =
                (settings.var("AWS_REGION"), settings.var("AWS_ACCOUNT_ID"))
            else {
                bail!("AWS_REGION and AWS_ACCOUNT_ID must be set for ECR login");
            };
            format!(
                "aws ecr get-login-password --region {region} | docker login --username AWS --password-stdin {account}.dkr.ecr.{region}.amazonaws.com",
                region = region,
                account = account
            )
        }
    };
    Ok(Some(command))
}

pub async fn registry_login(exec: &dyn RemoteExecutor, settings: &Settings) -> Result<()> {
    let Some(command) = login_command(settings)? else {
        output::info("No registry configured, skipping docker login");
        return Ok(());
    };

    output::info(&format!("Logging in to {}...", settings.registry));
    exec.run(&command, RunOptions::default().secret())
        .await
        .with_context(|| format!("docker login to {} failed", settings.registry))?;
    Ok(())
}

pub fn compose_up_command(profile: Option<&str>) -> String {
    match profile {
        Some(profile) => format!("docker compose --profile {} up --build -d", quote(profile)),
        None => "docker compose up --build -d".to_string(),
    }
}

pub async fn deploy(repo: &InDir<'_>, settings: &Settings) -> Result<()> {
    registry_login(repo.executor(), settings).await?;

    match &settings.profile {
        Some(profile) => output::info(&format!("Deploying with Docker Compose profile: {}", profile)),
        None => output::info("Deploying with Docker Compose"),
    }
    repo.run(
        &compose_up_command(settings.profile.as_deref()),
        RunOptions::shell(),
    )
    .await
    .context("docker compose up failed")?;

    output::success("Docker deployment completed");
    Ok(())
}
