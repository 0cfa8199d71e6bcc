use std::io::Write;

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::Settings;
use crate::output;
use crate::remote::{quote, RemoteExecutor, RunOptions};

/// Packages every deployment needs on the host.
pub const BASE_PACKAGES: [&str; 6] = [
    "git",
    "python3-pip",
    "python3-dev",
    "build-essential",
    "libssl-dev",
    "libffi-dev",
];

const KUBECONFIG_EXPORT: &str = "export KUBECONFIG=/etc/rancher/k3s/k3s.yaml";
const HELM_ASKPASS: &str = "/tmp/helm-askpass.sh";
const HELM_INSTALLER: &str = "/tmp/get-helm-3.sh";

/// True when `tool` is on the login user's PATH.
pub async fn has_tool(exec: &dyn RemoteExecutor, tool: &str) -> Result<bool> {
    let output = exec
        .run(&format!("which {}", tool), RunOptions::default().hidden().warn())
        .await?;
    Ok(!output.stdout.trim().is_empty())
}

pub async fn install_dependencies(exec: &dyn RemoteExecutor) -> Result<()> {
    let mut missing = Vec::new();
    for package in BASE_PACKAGES {
        if !exec
            .exec_ok(&format!("dpkg -s {} >/dev/null 2>&1", package))
            .await?
        {
            missing.push(package);
        }
    }

    if missing.is_empty() {
        output::success("All dependencies already installed");
        return Ok(());
    }

    let spinner = output::create_spinner(&format!("Installing {}...", missing.join(", ")));
    let result = apt_install(exec, &missing).await;
    spinner.finish_and_clear();
    result.context("Failed to install dependencies")?;

    output::success(&format!("Installed {}", missing.join(", ")));
    Ok(())
}

async fn apt_install(exec: &dyn RemoteExecutor, packages: &[&str]) -> Result<()> {
    exec.run("apt-get update", RunOptions::shell().hidden()).await?;
    exec.run(
        &format!(
            "DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
            packages.join(" ")
        ),
        RunOptions::shell().hidden(),
    )
    .await?;
    Ok(())
}

pub async fn install_docker(exec: &dyn RemoteExecutor, settings: &Settings) -> Result<()> {
    if has_tool(exec, "docker").await? {
        output::success("Docker already installed");
        return Ok(());
    }

    let spinner = output::create_spinner("Installing Docker...");
    let result = async {
        exec.run(
            "curl -fsSL https://get.docker.com | sh",
            RunOptions::shell().hidden(),
        )
        .await?;
        exec.run(
            &format!("usermod -aG docker {}", quote(&settings.remote.user)),
            RunOptions::shell(),
        )
        .await?;
        exec.run("systemctl enable --now docker", RunOptions::shell())
            .await?;
        anyhow::Ok(())
    }
    .await;
    spinner.finish_and_clear();
    result.context("Failed to install Docker")?;

    output::success("Docker installed");
    Ok(())
}

pub async fn install_kubectl(exec: &dyn RemoteExecutor) -> Result<()> {
    if has_tool(exec, "kubectl").await? {
        output::success("kubectl already installed");
        return Ok(());
    }

    output::info("Installing kubectl...");
    let version = exec
        .run(
            "curl -L -s https://dl.k8s.io/release/stable.txt",
            RunOptions::default().hidden(),
        )
        .await?
        .stdout;
    let version = version.trim();
    debug!("Latest kubectl release is {}", version);

    exec.run(
        &format!(
            "curl -sLo /tmp/kubectl https://dl.k8s.io/release/{}/bin/linux/amd64/kubectl && chmod +x /tmp/kubectl",
            version
        ),
        RunOptions::default(),
    )
    .await
    .context("Failed to download kubectl")?;
    exec.run("mv /tmp/kubectl /usr/local/bin/kubectl", RunOptions::shell())
        .await?;

    output::success("kubectl installed");
    Ok(())
}

/// Install helm. With a sudo password the installer's sudo calls are routed
/// through an askpass helper, since there is no terminal to prompt on.
pub async fn install_helm(exec: &dyn RemoteExecutor, settings: &Settings) -> Result<()> {
    if has_tool(exec, "helm").await? {
        output::success("helm already installed");
        return Ok(());
    }

    output::info("Installing helm...");
    let Some(password) = settings.remote.password.as_deref() else {
        exec.run(
            "curl -fsSL https://raw.githubusercontent.com/helm/helm/main/scripts/get-helm-3 | bash",
            RunOptions::default(),
        )
        .await
        .context("Failed to install helm")?;
        output::success("helm installed");
        return Ok(());
    };

    let mut askpass = tempfile::Builder::new()
        .prefix("shipwright-askpass-")
        .tempfile()
        .context("Failed to create askpass helper")?;
    askpass.write_all(askpass_script(password).as_bytes())?;
    askpass.flush()?;

    exec.put(askpass.path(), HELM_ASKPASS).await?;
    exec.run(&format!("chmod 700 {}", HELM_ASKPASS), RunOptions::default())
        .await?;
    exec.run(
        &format!(
            "curl -fsSL https://raw.githubusercontent.com/helm/helm/main/scripts/get-helm-3 > {installer} && sed -i 's/sudo /sudo -A /g' {installer} && chmod +x {installer}",
            installer = HELM_INSTALLER
        ),
        RunOptions::default(),
    )
    .await?;

    let installed = exec
        .run(
            &format!("SUDO_ASKPASS={} bash {}", HELM_ASKPASS, HELM_INSTALLER),
            RunOptions::default(),
        )
        .await;
    exec.run(
        &format!("rm -f {} {}", HELM_ASKPASS, HELM_INSTALLER),
        RunOptions::default().warn(),
    )
    .await?;
    installed.context("Failed to install helm")?;

    output::success("helm installed");
    Ok(())
}

fn askpass_script(password: &str) -> String {
    format!("#!/bin/sh\nprintf '%s\\n' {}\n", quote(password))
}

pub async fn install_k3s(exec: &dyn RemoteExecutor) -> Result<()> {
    if has_tool(exec, "k3s").await? {
        output::success("k3s already installed");
        return Ok(());
    }

    let spinner = output::create_spinner("Installing k3s...");
    let result = async {
        exec.run(
            "curl -sfL https://get.k3s.io | INSTALL_K3S_EXEC=\"--disable=traefik\" sh -",
            RunOptions::shell().hidden(),
        )
        .await?;
        exec.run("systemctl enable --now k3s", RunOptions::shell())
            .await?;
        anyhow::Ok(())
    }
    .await;
    spinner.finish_and_clear();
    result.context("Failed to install k3s")?;

    exec.run(
        &format!(
            "grep -qsF {export} ~/.bashrc || echo {export} >> ~/.bashrc",
            export = quote(KUBECONFIG_EXPORT)
        ),
        RunOptions::default(),
    )
    .await?;

    output::success("k3s installed");
    Ok(())
}
