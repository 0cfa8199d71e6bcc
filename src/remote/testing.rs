use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::{CommandOutput, RemoteError, RemoteExecutor, RunOptions};

/// Executor double that records commands instead of running them.
///
/// Commands containing a `fail_on` needle exit 1; commands containing a
/// `respond` needle return its canned stdout. Everything else succeeds with
/// empty output.
#[derive(Default)]
pub struct RecordingExecutor {
    commands: Mutex<Vec<(String, RunOptions)>>,
    uploads: Mutex<Vec<(String, String)>>,
    fail_on: Vec<String>,
    responses: Vec<(String, String)>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, needle: &str) -> Self {
        self.fail_on.push(needle.to_string());
        self
    }

    pub fn respond(mut self, needle: &str, stdout: &str) -> Self {
        self.responses.push((needle.to_string(), stdout.to_string()));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|(cmd, _)| cmd.clone())
            .collect()
    }

    pub fn options_for(&self, needle: &str) -> Option<RunOptions> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .find(|(cmd, _)| cmd.contains(needle))
            .map(|(_, opts)| *opts)
    }

    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    fn host(&self) -> &str {
        "test-host"
    }

    async fn run(&self, command: &str, options: RunOptions) -> Result<CommandOutput> {
        self.commands
            .lock()
            .unwrap()
            .push((command.to_string(), options));

        if self.fail_on.iter().any(|needle| command.contains(needle)) {
            if options.warn {
                return Ok(CommandOutput {
                    status: Some(1),
                    ..CommandOutput::default()
                });
            }
            return Err(RemoteError::CommandFailed {
                host: self.host().to_string(),
                command: command.to_string(),
                status: Some(1),
                stderr: "scripted failure".to_string(),
            }
            .into());
        }

        let stdout = self
            .responses
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default();

        Ok(CommandOutput {
            status: Some(0),
            stdout,
            stderr: String::new(),
        })
    }

    async fn put(&self, local: &Path, remote: &str) -> Result<()> {
        self.uploads
            .lock()
            .unwrap()
            .push((local.display().to_string(), remote.to_string()));
        Ok(())
    }
}
