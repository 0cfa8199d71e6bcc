use std::fmt;
use std::path::PathBuf;

use crate::config::{DeploymentType, Settings};

/// One stage of the per-host pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    InstallDependencies,
    InstallDocker,
    InstallKubernetes,
    SyncRepository,
    GenerateEnvFiles,
    CopyArtifacts,
    Deploy,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Step::InstallDependencies => "Installing dependencies",
            Step::InstallDocker => "Installing Docker",
            Step::InstallKubernetes => "Installing kubectl, Helm and k3s",
            Step::SyncRepository => "Syncing repository",
            Step::GenerateEnvFiles => "Generating environment files",
            Step::CopyArtifacts => "Copying artifacts",
            Step::Deploy => "Deploying",
        };
        f.write_str(label)
    }
}

pub struct DeployContext {
    pub settings: Settings,
    pub steps: Vec<Step>,
}

impl DeployContext {
    pub fn new(settings: Settings) -> Self {
        let steps = plan_steps(&settings);
        Self { settings, steps }
    }

    pub fn host(&self) -> &str {
        self.settings.remote.host.trim()
    }

    /// CI step-output file, when running under a runner that provides one.
    pub fn ci_output(&self) -> Option<PathBuf> {
        ci_output_path(&self.settings)
    }
}

pub fn ci_output_path(settings: &Settings) -> Option<PathBuf> {
    settings.var("GITHUB_OUTPUT").map(PathBuf::from)
}

pub fn plan_steps(settings: &Settings) -> Vec<Step> {
    let mut steps = vec![Step::InstallDependencies];
    match settings.deployment {
        DeploymentType::Baremetal => {}
        DeploymentType::Docker => steps.push(Step::InstallDocker),
        DeploymentType::K8s => steps.extend([Step::InstallDocker, Step::InstallKubernetes]),
    }
    steps.push(Step::SyncRepository);
    if settings.env_files.generate {
        steps.push(Step::GenerateEnvFiles);
    }
    if !settings.artifacts.is_empty() {
        steps.push(Step::CopyArtifacts);
    }
    steps.push(Step::Deploy);
    steps
}
