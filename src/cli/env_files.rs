use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Settings;
use crate::env_files::{plan_env_files, EnvFilePlan};
use crate::output;

#[derive(Serialize)]
struct PlanJson<'a> {
    environment: &'a str,
    structure: String,
    generate: bool,
    planned_at: DateTime<Utc>,
    files: Vec<FileJson>,
}

#[derive(Serialize)]
struct FileJson {
    path: String,
    sha256: String,
    values: BTreeMap<String, String>,
}

/// Print the env-file plan for the configured environment without connecting.
pub fn run(settings: &Settings, reveal: bool, json: bool) -> Result<()> {
    let plan = plan_env_files(
        &settings.vars,
        &settings.env_files,
        &settings.environment,
        &settings.git_dir(),
    );

    if json {
        println!("{}", to_json(settings, &plan, reveal)?);
        return Ok(());
    }

    if !settings.env_files.generate {
        output::warning("ENV_FILES_GENERATE is not 'true'; a deployment would skip these files");
    }
    if plan.writable().next().is_none() {
        output::info(&format!(
            "No environment files for environment '{}'",
            settings.environment
        ));
        return Ok(());
    }

    output::header(&format!(
        "Environment files for '{}' ({} layout)",
        settings.environment, plan.structure
    ));
    for line in describe(&plan, reveal) {
        println!("{}", line);
    }
    Ok(())
}

fn shown(value: &str, reveal: bool) -> String {
    if reveal {
        value.to_string()
    } else {
        output::mask_value(value)
    }
}

pub fn describe(plan: &EnvFilePlan, reveal: bool) -> Vec<String> {
    let mut lines = Vec::new();
    for file in plan.writable() {
        lines.push(format!("{}  (sha256 {})", file.path, file.fingerprint()));
        for (key, value) in file.content.entries() {
            lines.push(format!("  {}={}", key, shown(&value, reveal)));
        }
    }
    lines
}

fn to_json(settings: &Settings, plan: &EnvFilePlan, reveal: bool) -> Result<String> {
    let data = PlanJson {
        environment: &settings.environment,
        structure: plan.structure.to_string(),
        generate: settings.env_files.generate,
        planned_at: Utc::now(),
        files: plan
            .writable()
            .map(|file| FileJson {
                path: file.path.clone(),
                sha256: file.fingerprint(),
                values: file
                    .content
                    .entries()
                    .into_iter()
                    .map(|(key, value)| {
                        let value = shown(&value, reveal);
                        (key, value)
                    })
                    .collect(),
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&data)?)
}
