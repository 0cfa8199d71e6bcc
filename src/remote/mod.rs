#[cfg(test)]
pub mod testing;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

/// When a command should run through `sudo`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Elevation {
    /// Run as the login user.
    #[default]
    None,
    /// Elevate only when `USE_SUDO` is enabled for the run.
    Configured,
    /// Always elevate.
    Always,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub elevation: Elevation,
    /// Source the login user's shell profile before running.
    pub profile: bool,
    /// Keep stdout out of the info log.
    pub hide: bool,
    /// Return non-zero exits as output instead of an error.
    pub warn: bool,
    /// The command text itself carries secrets; never log or echo it.
    pub secret: bool,
}

impl RunOptions {
    /// Elevated login shell, used for installers and deploy scripts.
    pub fn shell() -> Self {
        Self {
            elevation: Elevation::Always,
            profile: true,
            ..Self::default()
        }
    }

    /// A single batched command that skips profile sourcing and only
    /// elevates when the run is configured for sudo.
    pub fn batch() -> Self {
        Self {
            elevation: Elevation::Configured,
            ..Self::default()
        }
    }

    pub fn hidden(mut self) -> Self {
        self.hide = true;
        self
    }

    pub fn warn(mut self) -> Self {
        self.warn = true;
        self
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self.hide = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("command failed on {host} (exit {}): {command}\nstderr: {stderr}", exit_label(.status))]
    CommandFailed {
        host: String,
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("upload of {local} to {host}:{remote} failed: {reason}")]
    UploadFailed {
        host: String,
        local: String,
        remote: String,
        reason: String,
    },
}

fn exit_label(status: &Option<i32>) -> String {
    status
        .map(|code| code.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

/// A shell on the deployment target.
///
/// Commands are issued one at a time and awaited before the next one; the
/// executor never owns more than one in-flight command.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    fn host(&self) -> &str;

    async fn run(&self, command: &str, options: RunOptions) -> Result<CommandOutput>;

    async fn put(&self, local: &Path, remote: &str) -> Result<()>;

    /// Returns true when the command exits 0.
    async fn exec_ok(&self, command: &str) -> Result<bool> {
        let output = self
            .run(command, RunOptions::default().hidden().warn())
            .await?;
        Ok(output.success())
    }
}

/// Scoped working directory for relative-path commands.
pub struct InDir<'a> {
    executor: &'a dyn RemoteExecutor,
    dir: String,
}

impl<'a> InDir<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, dir: &str) -> Self {
        Self {
            executor,
            dir: dir.to_string(),
        }
    }

    pub fn executor(&self) -> &'a dyn RemoteExecutor {
        self.executor
    }

    pub fn command(&self, command: &str) -> String {
        format!("cd {} && {}", quote(&self.dir), command)
    }

    pub async fn run(&self, command: &str, options: RunOptions) -> Result<CommandOutput> {
        self.executor.run(&self.command(command), options).await
    }

    pub async fn exec_ok(&self, command: &str) -> Result<bool> {
        self.executor.exec_ok(&self.command(command)).await
    }
}

/// Single-quote a string for a POSIX shell.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Join a remote POSIX path; an absolute `part` replaces `base`.
pub fn join_path(base: &str, part: &str) -> String {
    if part.starts_with('/') || base.is_empty() {
        return part.to_string();
    }
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        format!("/{}", part)
    } else {
        format!("{}/{}", base, part)
    }
}

/// Parent directory of a remote POSIX path.
pub fn parent_dir(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => ".",
    }
}
