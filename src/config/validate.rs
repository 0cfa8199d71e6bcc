use anyhow::{bail, Result};

use super::{GitAuthMethod, Settings};

pub fn validate(settings: &Settings) -> Result<()> {
    if settings.remote.hosts().is_empty() {
        bail!("REMOTE_HOST cannot be empty");
    }

    if settings.remote.user.is_empty() {
        bail!("REMOTE_USER cannot be empty");
    }

    match settings.git.auth {
        GitAuthMethod::Token => {
            if settings.git.token.is_none() || settings.git.user.is_none() {
                bail!("GIT_TOKEN and GIT_USER are required when GIT_AUTH_METHOD is 'token'");
            }
        }
        GitAuthMethod::Ssh => {
            if settings.git.ssh_key.is_none() && settings.remote.ssh_key.is_none() {
                bail!("GIT_SSH_KEY or SSH_KEY is required when GIT_AUTH_METHOD is 'ssh'");
            }
        }
        GitAuthMethod::None => {}
    }

    if settings.environment.trim().is_empty() {
        bail!("ENVIRONMENT cannot be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::{Settings, VarSet};

    fn settings(pairs: &[(&str, &str)]) -> anyhow::Result<Settings> {
        Settings::from_vars(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<VarSet>(),
        )
    }

    #[test]
    fn token_auth_requires_credentials() {
        let err = settings(&[("GIT_AUTH_METHOD", "token"), ("GIT_TOKEN", "t")]).unwrap_err();
        assert!(err.to_string().contains("GIT_USER"));

        assert!(settings(&[
            ("GIT_AUTH_METHOD", "token"),
            ("GIT_TOKEN", "t"),
            ("GITHUB_ACTOR", "octocat"),
        ])
        .is_ok());
    }

    #[test]
    fn ssh_auth_accepts_the_login_key() {
        assert!(settings(&[("GIT_AUTH_METHOD", "ssh")]).is_err());
        assert!(settings(&[("GIT_AUTH_METHOD", "ssh"), ("SSH_KEY", "k")]).is_ok());
    }

    #[test]
    fn host_list_must_not_be_blank() {
        let err = settings(&[("REMOTE_HOST", " , ")]).unwrap_err();
        assert!(err.to_string().contains("REMOTE_HOST"));
    }
}
