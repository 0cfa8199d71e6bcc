use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};

use crate::env_files::layout::Structure;
use crate::env_files::parser::BlobFormat;
use crate::remote::join_path;

mod validate;

/// Variables a run is configured from: the process environment laid over
/// the optional config file.
pub type VarSet = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentType {
    Baremetal,
    Docker,
    K8s,
}

impl FromStr for DeploymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "baremetal" => Ok(Self::Baremetal),
            "docker" => Ok(Self::Docker),
            "k8s" => Ok(Self::K8s),
            other => Err(format!(
                "invalid value '{}'. Supported: baremetal, docker, k8s",
                other
            )),
        }
    }
}

impl fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Baremetal => "baremetal",
            Self::Docker => "docker",
            Self::K8s => "k8s",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitAuthMethod {
    None,
    Token,
    Ssh,
}

impl FromStr for GitAuthMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "token" => Ok(Self::Token),
            "ssh" => Ok(Self::Ssh),
            other => Err(format!(
                "invalid value '{}'. Supported: token, ssh, none",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryType {
    Ghcr,
    DockerHub,
    Ecr,
    None,
}

impl FromStr for RegistryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ghcr" => Ok(Self::Ghcr),
            "dockerhub" => Ok(Self::DockerHub),
            "ecr" => Ok(Self::Ecr),
            "none" | "" => Ok(Self::None),
            other => Err(format!(
                "invalid value '{}'. Supported: ghcr, dockerhub, ecr, none",
                other
            )),
        }
    }
}

impl fmt::Display for RegistryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ghcr => "ghcr.io",
            Self::DockerHub => "Docker Hub",
            Self::Ecr => "AWS ECR",
            Self::None => "none",
        })
    }
}

#[derive(Debug, Clone)]
pub struct GitSettings {
    pub url: String,
    pub auth: GitAuthMethod,
    pub token: Option<String>,
    pub user: Option<String>,
    pub ssh_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    /// May hold a comma-separated host list before fan-out.
    pub host: String,
    pub user: String,
    pub port: Option<u16>,
    pub password: Option<String>,
    pub ssh_key: Option<String>,
    pub dir: String,
}

impl RemoteSettings {
    pub fn hosts(&self) -> Vec<String> {
        split_list(&self.host)
    }
}

#[derive(Debug, Clone)]
pub struct K8sSettings {
    pub manifest_path: Option<String>,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub local: PathBuf,
    pub remote: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFilesConfig {
    pub generate: bool,
    pub structure: Structure,
    /// Base directory override (`ENV_FILES_PATH`).
    pub path: Option<String>,
    /// Explicit pattern list (`ENV_FILES_PATTERNS`).
    pub patterns: Vec<String>,
    pub create_root: bool,
    pub format: BlobFormat,
}

impl Default for EnvFilesConfig {
    fn default() -> Self {
        Self {
            generate: false,
            structure: Structure::Auto,
            path: None,
            patterns: Vec::new(),
            create_root: false,
            format: BlobFormat::Auto,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub git: GitSettings,
    pub deployment: DeploymentType,
    pub environment: String,
    pub remote: RemoteSettings,
    pub use_sudo: bool,
    pub registry: RegistryType,
    pub profile: Option<String>,
    pub deploy_command: Option<String>,
    pub k8s: K8sSettings,
    pub artifacts: Vec<Artifact>,
    pub env_files: EnvFilesConfig,
    pub vars: VarSet,
}

impl Settings {
    /// Read the config file (if present) and overlay the process environment.
    pub fn load_vars(path: &Path) -> Result<VarSet> {
        let mut vars = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            parse_config_file(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            VarSet::new()
        };

        vars.extend(utf8_vars(std::env::vars_os()));
        Ok(vars)
    }

    pub fn from_vars(vars: VarSet) -> Result<Self> {
        let url = match get(&vars, "GIT_URL") {
            Some(url) => url.trim().to_string(),
            None => get(&vars, "GITHUB_REPOSITORY")
                .map(|repo| format!("https://github.com/{}.git", repo))
                .unwrap_or_default(),
        };

        let git = GitSettings {
            url,
            auth: parse_choice(&vars, "GIT_AUTH_METHOD", "none")?,
            token: get(&vars, "GIT_TOKEN").map(str::to_string),
            user: get(&vars, "GIT_USER")
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .or_else(|| get(&vars, "GITHUB_ACTOR"))
                .map(str::to_string),
            ssh_key: get(&vars, "GIT_SSH_KEY").map(str::to_string),
        };

        let user = get(&vars, "REMOTE_USER").unwrap_or("root").to_string();
        let dir = match get(&vars, "REMOTE_DIR") {
            Some(dir) => dir.to_string(),
            None => home_dir(&user),
        };

        let port = match get(&vars, "REMOTE_PORT") {
            Some(port) => Some(
                port.parse::<u16>()
                    .with_context(|| format!("REMOTE_PORT has invalid value '{}'", port))?,
            ),
            None => None,
        };

        let remote = RemoteSettings {
            host: get(&vars, "REMOTE_HOST").unwrap_or("127.0.0.1").to_string(),
            user,
            port,
            password: get(&vars, "REMOTE_PASSWORD").map(str::to_string),
            ssh_key: get(&vars, "SSH_KEY").map(str::to_string),
            dir,
        };

        let env_files = EnvFilesConfig {
            generate: get_bool(&vars, "ENV_FILES_GENERATE"),
            structure: parse_choice_or_default(&vars, "ENV_FILES_STRUCTURE"),
            path: get(&vars, "ENV_FILES_PATH").map(str::to_string),
            patterns: get(&vars, "ENV_FILES_PATTERNS")
                .map(split_list)
                .unwrap_or_default(),
            create_root: get_bool(&vars, "ENV_FILES_CREATE_ROOT"),
            format: parse_choice_or_default(&vars, "ENV_FILES_FORMAT"),
        };

        let workspace = PathBuf::from(get(&vars, "GITHUB_WORKSPACE").unwrap_or("."));
        let artifacts = get(&vars, "COPY_ARTIFACTS")
            .map(|raw| parse_artifacts(raw, &workspace))
            .unwrap_or_default();

        let settings = Self {
            git,
            deployment: parse_choice(&vars, "DEPLOYMENT_TYPE", "baremetal")?,
            environment: get(&vars, "ENVIRONMENT").unwrap_or("dev").to_string(),
            remote,
            use_sudo: get_bool(&vars, "USE_SUDO"),
            registry: parse_choice(&vars, "REGISTRY_TYPE", "ghcr")?,
            profile: get(&vars, "PROFILE").map(str::to_string),
            deploy_command: get(&vars, "DEPLOY_COMMAND").map(str::to_string),
            k8s: K8sSettings {
                manifest_path: get(&vars, "K8S_MANIFEST_PATH").map(str::to_string),
                namespace: get(&vars, "K8S_NAMESPACE").unwrap_or("default").to_string(),
            },
            artifacts,
            env_files,
            vars,
        };

        validate::validate(&settings)?;

        Ok(settings)
    }

    /// One independent configuration per target host.
    ///
    /// Comma-separated user/password/key lists are matched to hosts by
    /// position; a shorter list keeps reusing its last entry.
    pub fn per_host(&self) -> Result<Vec<Settings>> {
        let hosts = self.remote.hosts();
        if hosts.len() <= 1 {
            return Ok(vec![self.clone()]);
        }

        let users = self.list_var("REMOTE_USER");
        let passwords = self.list_var("REMOTE_PASSWORD");
        let keys = self.list_var("SSH_KEY");

        hosts
            .iter()
            .enumerate()
            .map(|(i, host)| {
                let mut vars = self.vars.clone();
                vars.insert("REMOTE_HOST".to_string(), host.clone());
                for (name, list) in [
                    ("REMOTE_USER", &users),
                    ("REMOTE_PASSWORD", &passwords),
                    ("SSH_KEY", &keys),
                ] {
                    if let Some(value) = pick(list, i) {
                        vars.insert(name.to_string(), value.to_string());
                    }
                }
                Settings::from_vars(vars)
                    .with_context(|| format!("Invalid configuration for host {}", host))
            })
            .collect()
    }

    /// Repository name derived from the git URL.
    pub fn project_name(&self) -> String {
        self.git
            .url
            .rsplit('/')
            .next()
            .and_then(|last| last.split('.').next())
            .unwrap_or_default()
            .to_string()
    }

    /// Remote checkout directory; also the base for generated env files.
    pub fn git_dir(&self) -> String {
        let project = self.project_name();
        if project.is_empty() {
            self.remote.dir.clone()
        } else {
            join_path(&self.remote.dir, &project)
        }
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        get(&self.vars, name)
    }

    fn list_var(&self, name: &str) -> Vec<String> {
        self.var(name).map(split_list).unwrap_or_default()
    }
}

fn get<'a>(vars: &'a VarSet, name: &str) -> Option<&'a str> {
    vars.get(name).map(String::as_str).filter(|v| !v.is_empty())
}

fn get_bool(vars: &VarSet, name: &str) -> bool {
    get(vars, name).is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

fn parse_choice<T>(vars: &VarSet, name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = get(vars, name).unwrap_or(default).trim().to_lowercase();
    match raw.parse::<T>() {
        Ok(value) => Ok(value),
        Err(e) => bail!("{} has {}", name, e),
    }
}

/// Like `parse_choice`, but an unknown value only warns and falls back to the default.
fn parse_choice_or_default<T>(vars: &VarSet, name: &str) -> T
where
    T: FromStr + Default,
    T::Err: Display,
{
    let Some(raw) = get(vars, name) else {
        return T::default();
    };
    raw.trim().to_lowercase().parse::<T>().unwrap_or_else(|e| {
        warn!("{} has {}; using auto", name, e);
        T::default()
    })
}

/// Environment entries whose name and value are valid UTF-8. Others are skipped.
fn utf8_vars<I>(entries: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    entries
        .into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                debug!("skipping non UTF-8 environment variable {:?}", key);
                None
            }
        })
}

/// Home directory of a login user on a conventional Linux host.
pub fn home_dir(user: &str) -> String {
    if user == "root" {
        "/root".to_string()
    } else {
        format!("/home/{}", user)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn pick(list: &[String], index: usize) -> Option<&str> {
    list.get(index).or_else(|| list.last()).map(String::as_str)
}

/// `local:remote` pairs, comma-separated.
fn parse_artifacts(raw: &str, workspace: &Path) -> Vec<Artifact> {
    raw.split(',')
        .filter_map(|item| item.split_once(':'))
        .map(|(local, remote)| {
            let local = PathBuf::from(local.trim());
            let local = if local.is_absolute() {
                local
            } else {
                workspace.join(local)
            };
            Artifact {
                local,
                remote: remote.trim().to_string(),
            }
        })
        .collect()
}

fn parse_config_file(content: &str) -> Result<VarSet> {
    let table: toml::Table = toml::from_str(content)?;
    let mut vars = VarSet::new();
    for (key, value) in table {
        let value = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            _ => bail!("{} must be a string, number or boolean", key),
        };
        vars.insert(key, value);
    }
    Ok(vars)
}
