use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use openssh::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::SshSession;
use crate::output;
use crate::remote::{quote, CommandOutput, Elevation, RemoteError, RemoteExecutor, RunOptions};

const PROFILE_FILES: [&str; 3] = [".bashrc", ".bash_profile", ".profile"];

/// What the wrapper needs to know about the login account.
#[derive(Debug, Clone, Copy)]
pub struct ShellContext<'a> {
    pub home: &'a str,
    pub use_sudo: bool,
    /// sudo reads the password from stdin.
    pub sudo_password: bool,
}

pub fn elevates(options: &RunOptions, use_sudo: bool) -> bool {
    match options.elevation {
        Elevation::None => false,
        Elevation::Configured => use_sudo,
        Elevation::Always => true,
    }
}

/// Build the command line actually sent to the host.
pub fn wrap_command(command: &str, options: &RunOptions, ctx: &ShellContext<'_>) -> String {
    let elevate = elevates(options, ctx.use_sudo);
    let sudo = if ctx.sudo_password {
        "sudo -S -p ''"
    } else {
        "sudo"
    };

    if !options.profile {
        return if elevate {
            format!("{} bash -c {}", sudo, quote(command))
        } else {
            command.to_string()
        };
    }

    let login = format!("bash -l -c {}", quote(&profile_script(ctx.home, command)));
    if elevate {
        format!("{} {}", sudo, login)
    } else {
        login
    }
}

// profile errors must not abort the command, so sourcing runs under `set +e`
fn profile_script(home: &str, command: &str) -> String {
    let mut script = String::from("export PS1=\"$ \"; set +e; ");
    for file in PROFILE_FILES {
        let path = format!("{}/{}", home.trim_end_matches('/'), file);
        script.push_str(&format!(
            "if [ -f {path} ]; then source {path} 2>/dev/null; fi; ",
            path = path
        ));
    }
    script.push_str("set -e; ");
    script.push_str(command);
    script
}

impl SshSession {
    fn shell_context(&self) -> ShellContext<'_> {
        ShellContext {
            home: &self.home,
            use_sudo: self.use_sudo,
            sudo_password: self.sudo_password.is_some(),
        }
    }

    async fn output(&self, command: &str, stdin: Option<&str>) -> Result<std::process::Output> {
        let Some(input) = stdin else {
            return Ok(self
                .session
                .command("bash")
                .arg("-c")
                .arg(command)
                .output()
                .await?);
        };

        let mut child = self
            .session
            .command("bash")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .await?;

        if let Some(mut pipe) = child.stdin().take() {
            pipe.write_all(input.as_bytes()).await?;
            pipe.write_all(b"\n").await?;
            pipe.shutdown().await?;
        }

        Ok(child.wait_with_output().await?)
    }
}

#[async_trait]
impl RemoteExecutor for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: &str, options: RunOptions) -> Result<CommandOutput> {
        let shown = if options.secret { "<redacted>" } else { command };
        debug!("[{}] exec: {}", self.host, shown);

        let wrapped = wrap_command(command, &options, &self.shell_context());
        let password = self
            .sudo_password
            .as_deref()
            .filter(|_| elevates(&options, self.use_sudo));

        let output = self
            .output(&wrapped, password)
            .await
            .with_context(|| format!("Failed to execute command on {}: {}", self.host, shown))?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !options.hide {
            output::remote(&self.host, &result.stdout);
        }

        if !result.success() && !options.warn {
            return Err(RemoteError::CommandFailed {
                host: self.host.clone(),
                command: shown.to_string(),
                status: result.status,
                stderr: result.stderr.trim().to_string(),
            }
            .into());
        }

        Ok(result)
    }

    async fn put(&self, local: &Path, remote: &str) -> Result<()> {
        debug!("[{}] put: {} -> {}", self.host, local.display(), remote);

        let upload_failed = |reason: String| RemoteError::UploadFailed {
            host: self.host.clone(),
            local: local.display().to_string(),
            remote: remote.to_string(),
            reason,
        };

        let data = tokio::fs::read(local)
            .await
            .with_context(|| format!("Failed to read {}", local.display()))?;

        let mut child = self
            .session
            .command("bash")
            .arg("-c")
            .arg(format!("cat > {}", quote(remote)))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .await
            .map_err(|e| upload_failed(e.to_string()))?;

        if let Some(mut pipe) = child.stdin().take() {
            pipe.write_all(&data)
                .await
                .map_err(|e| upload_failed(e.to_string()))?;
            pipe.shutdown()
                .await
                .map_err(|e| upload_failed(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| upload_failed(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(upload_failed(stderr).into());
        }

        Ok(())
    }
}
