use anyhow::{Context, Result};

use super::docker::registry_login;
use super::DeployError;
use crate::config::Settings;
use crate::output;
use crate::remote::{quote, InDir, RunOptions};

/// Directories searched for manifests, in order.
pub const MANIFEST_DIRS: [&str; 3] = ["k8s", "manifests", "kubernetes"];
/// Single-file manifests, tried after the directories.
pub const MANIFEST_FILES: [&str; 4] = ["k8s.yaml", "k8s.yml", "deployment.yaml", "deployment.yml"];

const KUBECONFIG: &str = "export KUBECONFIG=/etc/rancher/k3s/k3s.yaml";

pub async fn find_manifests(repo: &InDir<'_>, settings: &Settings) -> Result<String> {
    if let Some(path) = &settings.k8s.manifest_path {
        return Ok(path.clone());
    }
    for dir in MANIFEST_DIRS {
        if repo.exec_ok(&format!("test -d {}", dir)).await? {
            return Ok(dir.to_string());
        }
    }
    for file in MANIFEST_FILES {
        if repo.exec_ok(&format!("test -f {}", file)).await? {
            return Ok(file.to_string());
        }
    }
    Err(DeployError::NoManifests.into())
}

pub async fn deploy(repo: &InDir<'_>, settings: &Settings) -> Result<()> {
    registry_login(repo.executor(), settings).await?;

    let manifests = find_manifests(repo, settings).await?;
    output::info(&format!("Deploying to Kubernetes using: {}", manifests));

    let namespace = quote(&settings.k8s.namespace);
    repo.run(
        &format!(
            "{} && kubectl create namespace {} --dry-run=client -o yaml | kubectl apply -f -",
            KUBECONFIG, namespace
        ),
        RunOptions::default(),
    )
    .await
    .context("Failed to ensure the namespace exists")?;

    let target = if repo
        .exec_ok(&format!("test -d {}", quote(&manifests)))
        .await?
    {
        format!("{}/", manifests.trim_end_matches('/'))
    } else {
        manifests
    };
    repo.run(
        &format!(
            "{} && kubectl apply -f {} -n {}",
            KUBECONFIG,
            quote(&target),
            namespace
        ),
        RunOptions::default(),
    )
    .await
    .context("kubectl apply failed")?;

    output::success("Kubernetes deployment completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::tests::settings;
    use crate::remote::testing::RecordingExecutor;

    #[tokio::test]
    async fn discovers_directory_before_files() {
        let exec = RecordingExecutor::new().fail_on("test -d k8s");
        let repo = InDir::new(&exec, "/srv/shop");
        assert_eq!(find_manifests(&repo, &settings(&[])).await.unwrap(), "manifests");
    }

    #[tokio::test]
    async fn falls_back_to_single_files() {
        let exec = RecordingExecutor::new()
            .fail_on("test -d ")
            .fail_on("test -f k8s.yaml");
        let repo = InDir::new(&exec, "/srv/shop");
        assert_eq!(find_manifests(&repo, &settings(&[])).await.unwrap(), "k8s.yml");
    }

    #[tokio::test]
    async fn nothing_found_is_a_typed_error() {
        let exec = RecordingExecutor::new().fail_on("test -");
        let repo = InDir::new(&exec, "/srv/shop");
        let err = find_manifests(&repo, &settings(&[])).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::NoManifests)
        ));
    }

    #[tokio::test]
    async fn applies_into_the_namespace() {
        let exec = RecordingExecutor::new();
        let repo = InDir::new(&exec, "/srv/shop");
        let s = settings(&[
            ("REGISTRY_TYPE", "none"),
            ("K8S_MANIFEST_PATH", "deploy/k8s"),
            ("K8S_NAMESPACE", "shop"),
        ]);

        deploy(&repo, &s).await.unwrap();

        let commands = exec.commands();
        assert!(commands[0].contains("kubectl create namespace 'shop' --dry-run=client"));
        assert_eq!(
            commands.last().unwrap(),
            "cd '/srv/shop' && export KUBECONFIG=/etc/rancher/k3s/k3s.yaml && kubectl apply -f 'deploy/k8s/' -n 'shop'"
        );
    }
}
