pub mod baremetal;
pub mod database;
pub mod docker;
pub mod k8s;

use anyhow::Result;
use thiserror::Error;

use crate::config::{DeploymentType, Settings};
use crate::output;
use crate::remote::{InDir, RemoteExecutor, RunOptions};

const EXIT_MARKER: &str = "Command failed with exit code:";

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("{what} failed with exit code: {code}")]
    CommandFailed { what: String, code: i32 },

    #[error("No DEPLOY_COMMAND specified and no deploy.sh or Makefile found. Please set DEPLOY_COMMAND.")]
    NoDeployTarget,

    #[error("No K8S_MANIFEST_PATH specified and no Kubernetes manifests found")]
    NoManifests,
}

/// Run the deployment itself inside the checkout.
pub async fn dispatch(exec: &dyn RemoteExecutor, settings: &Settings) -> Result<()> {
    let repo = InDir::new(exec, &settings.git_dir());

    database::fix_database_permissions(&repo, settings).await?;

    if let Some(command) = &settings.deploy_command {
        output::info(&format!("Running deploy command: {}", command));
        run_user_command(&repo, command, "Deploy command").await?;
        output::success("Deploy command completed");
        return Ok(());
    }

    match settings.deployment {
        DeploymentType::Baremetal => baremetal::deploy(&repo, settings).await,
        DeploymentType::Docker => docker::deploy(&repo, settings).await,
        DeploymentType::K8s => k8s::deploy(&repo, settings).await,
    }
}

/// Append a trailer that prints the exit code of a failing command.
pub fn with_exit_marker(command: &str) -> String {
    format!(
        "{}; EXIT_CODE=$?; if [ $EXIT_CODE -ne 0 ]; then echo '{}' $EXIT_CODE; exit $EXIT_CODE; fi",
        command, EXIT_MARKER
    )
}

pub fn parse_exit_marker(stdout: &str) -> Option<i32> {
    stdout
        .lines()
        .find_map(|line| line.split_once(EXIT_MARKER))
        .and_then(|(_, code)| code.trim().parse().ok())
}

/// Run a user-supplied script in the login shell, failing with its exit code.
pub async fn run_user_command(repo: &InDir<'_>, command: &str, what: &str) -> Result<()> {
    let output = repo
        .run(&with_exit_marker(command), RunOptions::shell().warn())
        .await?;

    let code = match parse_exit_marker(&output.stdout) {
        Some(code) => Some(code),
        None if !output.success() => Some(output.status.unwrap_or(-1)),
        None => None,
    };

    match code {
        Some(code) => Err(DeployError::CommandFailed {
            what: what.to_string(),
            code,
        }
        .into()),
        None => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::VarSet;
    use crate::remote::testing::RecordingExecutor;

    pub(crate) fn settings(pairs: &[(&str, &str)]) -> Settings {
        let vars: VarSet = [
            ("GITHUB_REPOSITORY", "acme/shop"),
            ("REMOTE_HOST", "web1"),
            ("REMOTE_USER", "deploy"),
        ]
        .iter()
        .chain(pairs.iter())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Settings::from_vars(vars).unwrap()
    }

    #[test]
    fn exit_marker_round_trip() {
        let wrapped = with_exit_marker("make prod");
        assert!(wrapped.starts_with("make prod; EXIT_CODE=$?;"));
        assert_eq!(
            parse_exit_marker("building...\nCommand failed with exit code: 2\n"),
            Some(2)
        );
        assert_eq!(parse_exit_marker("all good\n"), None);
    }

    #[tokio::test]
    async fn marker_in_output_becomes_a_typed_error() {
        let exec = RecordingExecutor::new().respond("./migrate", "Command failed with exit code: 3\n");
        let repo = InDir::new(&exec, "/srv/shop");

        let err = run_user_command(&repo, "./migrate", "Deploy command")
            .await
            .unwrap_err();

        match err.downcast_ref::<DeployError>() {
            Some(DeployError::CommandFailed { what, code }) => {
                assert_eq!(what, "Deploy command");
                assert_eq!(*code, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_zero_exit_without_marker_still_fails() {
        let exec = RecordingExecutor::new().fail_on("./migrate");
        let repo = InDir::new(&exec, "/srv/shop");
        let err = run_user_command(&repo, "./migrate", "Deploy command")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Deploy command failed with exit code: 1");
    }

    #[tokio::test]
    async fn deploy_command_wins_over_deployment_type() {
        let exec = RecordingExecutor::new();
        let s = settings(&[("DEPLOYMENT_TYPE", "docker"), ("DEPLOY_COMMAND", "./release.sh")]);

        dispatch(&exec, &s).await.unwrap();

        let commands = exec.commands();
        assert!(commands
            .iter()
            .any(|c| c.starts_with("cd '/home/deploy/shop' && ./release.sh; EXIT_CODE=$?")));
        assert!(commands.iter().all(|c| !c.contains("docker compose")));
        assert_eq!(
            exec.options_for("./release.sh").unwrap(),
            RunOptions::shell().warn()
        );
    }
}
