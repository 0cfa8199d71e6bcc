use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::{Artifact, Settings};
use crate::output;
use crate::remote::{join_path, parent_dir, quote, RemoteExecutor, RunOptions};

/// Upload each `COPY_ARTIFACTS` entry as a tarball and unpack it in place.
pub async fn copy_artifacts(exec: &dyn RemoteExecutor, settings: &Settings) -> Result<()> {
    if settings.artifacts.is_empty() {
        return Ok(());
    }

    output::info(&format!("Copying {} artifact(s)", settings.artifacts.len()));
    let git_dir = settings.git_dir();
    for artifact in &settings.artifacts {
        copy_one(exec, artifact, &git_dir).await?;
    }
    output::success("Artifacts copied");
    Ok(())
}

async fn copy_one(exec: &dyn RemoteExecutor, artifact: &Artifact, git_dir: &str) -> Result<()> {
    if !artifact.local.exists() {
        output::warning(&format!(
            "Local artifact '{}' not found, skipping",
            artifact.local.display()
        ));
        return Ok(());
    }

    let Some(local_name) = artifact.local.file_name().and_then(|n| n.to_str()) else {
        bail!("Artifact path {} has no file name", artifact.local.display());
    };
    let remote = join_path(git_dir, &artifact.remote);
    output::info(&format!("{} -> {}", artifact.local.display(), remote));

    let tarball = pack(&artifact.local, local_name)?;
    let Some(tar_name) = tarball.path().file_name().and_then(|n| n.to_str()) else {
        bail!("Temporary tarball has no file name");
    };
    let remote_tmp = format!("/tmp/{}", tar_name);

    exec.put(tarball.path(), &remote_tmp).await?;
    exec.run(&extract_command(&remote_tmp, &remote, local_name), RunOptions::shell())
        .await
        .with_context(|| format!("Failed to unpack {} on {}", remote, exec.host()))?;

    debug!("Unpacked {} into {}", local_name, remote);
    Ok(())
}

fn pack(local: &Path, name: &str) -> Result<NamedTempFile> {
    if which::which("tar").is_err() {
        bail!("tar is required locally to copy artifacts");
    }

    let tarball = tempfile::Builder::new()
        .prefix("shipwright-artifact-")
        .suffix(".tar.gz")
        .tempfile()
        .context("Failed to create artifact tarball")?;

    let dir = local.parent().unwrap_or_else(|| Path::new("."));
    let status = Command::new("tar")
        .arg("-czf")
        .arg(tarball.path())
        .arg("-C")
        .arg(dir)
        .arg(name)
        .status()
        .context("Failed to run tar")?;

    if !status.success() {
        bail!("tar failed for {}", local.display());
    }
    Ok(tarball)
}

/// Replace `remote` with the unpacked tarball; the archive holds `local_name`.
pub fn extract_command(remote_tmp: &str, remote: &str, local_name: &str) -> String {
    let parent = parent_dir(remote);
    let remote_name = remote.trim_end_matches('/').rsplit('/').next().unwrap_or(remote);

    let mut command = format!(
        "mkdir -p {parent} && rm -rf {target} && tar -xzf {tmp} -C {parent}",
        parent = quote(parent),
        target = quote(remote),
        tmp = quote(remote_tmp),
    );
    if remote_name != local_name {
        command.push_str(&format!(
            " && mv {} {}",
            quote(&join_path(parent, local_name)),
            quote(remote)
        ));
    }
    command.push_str(&format!(" && rm -f {}", quote(remote_tmp)));
    command
}
