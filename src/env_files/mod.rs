//! Environment files generated on the host from `ENV*` variables.
//!
//! Variables are classified by name ([`classify`]), merged per output file
//! ([`merge`]), placed according to the configured layout ([`layout`]) and
//! written in one command each ([`materialize`]).

pub mod classify;
pub mod content;
pub mod layout;
pub mod materialize;
pub mod merge;
pub mod parser;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{EnvFilesConfig, Settings, VarSet};
use crate::output;
use crate::remote::{join_path, RemoteExecutor};
use classify::Pattern;
use content::ResolvedContent;
use layout::Structure;

#[derive(Debug, Clone)]
pub struct PlannedFile {
    pub pattern: Pattern,
    pub path: String,
    pub content: ResolvedContent,
}

impl PlannedFile {
    /// Short SHA-256 of the rendered body; safe to log.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.render().as_bytes());
        let mut hash = hex::encode(hasher.finalize());
        hash.truncate(12);
        hash
    }
}

/// Every file a run would write, in write order.
#[derive(Debug, Clone)]
pub struct EnvFilePlan {
    /// The resolved layout; never `Auto` unless nothing was planned.
    pub structure: Structure,
    pub files: Vec<PlannedFile>,
}

impl EnvFilePlan {
    /// Files that would actually be written.
    pub fn writable(&self) -> impl Iterator<Item = &PlannedFile> {
        self.files.iter().filter(|file| !file.content.is_empty())
    }
}

/// Work out paths and contents without touching the host.
pub fn plan_env_files(
    source: &VarSet,
    config: &EnvFilesConfig,
    environment: &str,
    base_path: &str,
) -> EnvFilePlan {
    let vars = classify::working_vars(source);
    if vars.is_empty() {
        return EnvFilePlan {
            structure: config.structure,
            files: Vec::new(),
        };
    }

    let patterns = classify::resolve_patterns(&vars, config, environment);
    let placement = layout::determine_file_structure(
        config.structure,
        &patterns,
        environment,
        base_path,
        config.path.as_deref(),
        classify::has_active_scope(&vars, environment),
    );
    debug!(
        "Env file layout {} for {} pattern(s)",
        placement.structure,
        patterns.len()
    );

    let mut files = Vec::new();
    for pattern in &patterns {
        let Some(path) = placement.paths.get(pattern) else {
            debug!("No placement for {}", pattern);
            continue;
        };
        files.push(PlannedFile {
            pattern: pattern.clone(),
            path: path.clone(),
            content: merge::resolve_content(&vars, environment, pattern, config.format),
        });
    }

    if config.create_root && !matches!(placement.structure, Structure::Single | Structure::Flat) {
        files.push(PlannedFile {
            pattern: Pattern::Root,
            path: join_path(base_path, &Pattern::Root.file_name()),
            content: merge::resolve_content(&vars, environment, &Pattern::Root, config.format),
        });
    }

    EnvFilePlan {
        structure: placement.structure,
        files,
    }
}

/// Generate env files on the host. Never fails the deployment.
pub async fn generate_env_files(executor: &dyn RemoteExecutor, settings: &Settings) {
    if !settings.env_files.generate {
        debug!("ENV_FILES_GENERATE is off, skipping env files");
        return;
    }

    output::info("Generating environment files from secrets...");
    match write_env_files(executor, settings).await {
        Ok(0) => output::info("No environment variables found to generate files"),
        Ok(count) => output::success(&format!("Generated {} environment file(s)", count)),
        Err(e) => {
            warn!(host = executor.host(), "env file generation failed: {:#}", e);
            output::warning(&format!("Error processing environment files: {:#}", e));
            output::warning("Continuing deployment without environment files...");
        }
    }
}

async fn write_env_files(executor: &dyn RemoteExecutor, settings: &Settings) -> Result<usize> {
    let plan = plan_env_files(
        &settings.vars,
        &settings.env_files,
        &settings.environment,
        &settings.git_dir(),
    );

    let mut written = 0;
    for file in plan.writable() {
        output::info(&format!(
            "Writing {} ({} keys, sha256 {})",
            file.path,
            file.content.entries().len(),
            file.fingerprint()
        ));
        materialize::create_env_file(executor, &file.path, &file.content).await?;
        written += 1;
    }
    Ok(written)
}
