use anyhow::Result;
use regex::Regex;
use tracing::debug;

use super::k8s::MANIFEST_DIRS;
use crate::config::{DeploymentType, Settings};
use crate::output;
use crate::remote::{quote, InDir, RunOptions};

pub const COMPOSE_FILES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Container images run their database as uid/gid 999.
const DATABASE_OWNER: &str = "999:999";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseKind {
    pub name: &'static str,
    /// Case-insensitive needles that reveal the database in a config file.
    pub needles: &'static [&'static str],
    /// Fragment matched against existing data directory names.
    pub dir_name: &'static str,
    pub mode: &'static str,
}

pub static DATABASES: [DatabaseKind; 5] = [
    DatabaseKind {
        name: "postgres",
        needles: &["postgres"],
        dir_name: "postgres",
        mode: "700",
    },
    DatabaseKind {
        name: "mariadb",
        needles: &["mariadb"],
        dir_name: "mariadb",
        mode: "750",
    },
    DatabaseKind {
        name: "mysql",
        needles: &["mysql"],
        dir_name: "mysql",
        mode: "750",
    },
    DatabaseKind {
        name: "mongodb",
        needles: &["mongo"],
        dir_name: "mongodb",
        mode: "755",
    },
    DatabaseKind {
        name: "redis",
        needles: &["redis"],
        dir_name: "redis",
        mode: "755",
    },
];

pub fn detect_databases(sources: &[String]) -> Vec<&'static DatabaseKind> {
    let lowered: Vec<String> = sources.iter().map(|s| s.to_lowercase()).collect();
    DATABASES
        .iter()
        .filter(|db| {
            lowered
                .iter()
                .any(|source| db.needles.iter().any(|needle| source.contains(needle)))
        })
        .collect()
}

/// Host side of bind mounts in a compose file that mention `db`.
pub fn volume_paths(compose: &str, db: &DatabaseKind) -> Vec<String> {
    let Ok(pattern) = Regex::new(&format!(r"(?i)^\s+-\s+.*{}.*:/", regex::escape(db.name))) else {
        return Vec::new();
    };

    let mut paths = Vec::new();
    for line in compose.lines().filter(|line| pattern.is_match(line)) {
        let Some((host, _)) = line.trim().split_once(":/") else {
            continue;
        };
        let host = host.trim().trim_start_matches('-').trim();
        let host = host.trim_matches(|c| c == '"' || c == '\'');
        if (host.starts_with("./") || host.starts_with('/')) && !paths.iter().any(|p| p == host) {
            paths.push(host.to_string());
        }
    }
    paths
}

fn normalize(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("./{}", path.trim_start_matches("./"))
    }
}

pub fn fix_command(path: &str, db: &DatabaseKind) -> String {
    let path = quote(&normalize(path));
    format!(
        "mkdir -p {path} || true && chown -R {owner} {path} || true && chmod -R {mode} {path} || true",
        path = path,
        owner = DATABASE_OWNER,
        mode = db.mode
    )
}

async fn read_compose_files(repo: &InDir<'_>) -> Result<Vec<String>> {
    let mut contents = Vec::new();
    for file in COMPOSE_FILES {
        let output = repo
            .run(&format!("cat {} 2>/dev/null", file), RunOptions::default().hidden().warn())
            .await?;
        if output.success() && !output.stdout.trim().is_empty() {
            contents.push(output.stdout);
        }
    }
    Ok(contents)
}

/// Make bind-mounted database directories writable by the container user.
///
/// Every step is best-effort; a failing `chown` never stops the deployment.
pub async fn fix_database_permissions(repo: &InDir<'_>, settings: &Settings) -> Result<()> {
    let compose = read_compose_files(repo).await?;

    let mut sources = compose.clone();
    if settings.deployment == DeploymentType::K8s {
        for dir in MANIFEST_DIRS {
            let output = repo
                .run(
                    &format!(
                        "grep -rhoiE 'postgres|mariadb|mysql|mongo|redis' {}/ 2>/dev/null | sort -u",
                        dir
                    ),
                    RunOptions::default().hidden().warn(),
                )
                .await?;
            sources.push(output.stdout);
        }
    }

    let databases = detect_databases(&sources);
    if databases.is_empty() {
        debug!("No database services detected");
        return Ok(());
    }

    for db in databases {
        let mut paths: Vec<String> = compose
            .iter()
            .flat_map(|content| volume_paths(content, db))
            .collect();

        let existing = repo
            .run(
                &format!(
                    "find . -type d -name '*{dir}*' -path '*/data/*' -o -type d -name '*{dir}*' -path '*/volumes/*' 2>/dev/null | head -10",
                    dir = db.dir_name
                ),
                RunOptions::default().hidden().warn(),
            )
            .await?;
        for dir in existing.stdout.lines().map(str::trim).filter(|d| !d.is_empty()) {
            if !paths.iter().any(|p| p == dir) {
                paths.push(dir.to_string());
            }
        }

        if paths.is_empty() {
            continue;
        }

        output::info(&format!("Fixing {} data directory permissions", db.name));
        for path in &paths {
            repo.run(&fix_command(path, db), RunOptions::shell().warn())
                .await?;
        }
    }
    Ok(())
}
