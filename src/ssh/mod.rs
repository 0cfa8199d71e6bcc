pub mod exec;

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use openssh::{KnownHosts, Session, SessionBuilder};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::{home_dir, RemoteSettings};

pub struct SshSession {
    session: Session,
    host: String,
    home: String,
    use_sudo: bool,
    sudo_password: Option<String>,
    // removed from disk when the session is dropped
    _key_file: Option<NamedTempFile>,
}

impl SshSession {
    pub async fn connect(remote: &RemoteSettings, use_sudo: bool) -> Result<Self> {
        let host = remote.host.trim().to_string();
        debug!("Connecting to {}@{}", remote.user, host);

        let mut builder = SessionBuilder::default();
        builder.known_hosts_check(KnownHosts::Accept);
        builder.user(remote.user.clone());
        builder.connect_timeout(Duration::from_secs(30));

        if let Some(port) = remote.port {
            builder.port(port);
        }

        let key_file = match &remote.ssh_key {
            Some(key) => {
                let file = write_key_file(key)?;
                builder.keyfile(file.path());
                Some(file)
            }
            None => {
                if remote.password.is_some() {
                    warn!("REMOTE_PASSWORD is only used for sudo; SSH login relies on the agent or default keys");
                }
                None
            }
        };

        let session = builder
            .connect(&host)
            .await
            .with_context(|| format!("Failed to connect to {}@{}", remote.user, host))?;

        Ok(Self {
            session,
            host,
            home: home_dir(&remote.user),
            use_sudo,
            sudo_password: remote.password.clone(),
            _key_file: key_file,
        })
    }

    pub async fn close(self) -> Result<()> {
        self.session
            .close()
            .await
            .with_context(|| format!("Failed to close SSH session to {}", self.host))?;
        Ok(())
    }
}

/// A private key given either as PEM text or as base64 of the PEM.
pub fn decode_key(raw: &str) -> String {
    let raw = raw.trim();
    let decoded = STANDARD
        .decode(raw)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .filter(|text| text.contains("BEGIN") && text.contains("PRIVATE KEY"));

    let mut key = decoded.unwrap_or_else(|| raw.to_string());
    if !key.ends_with('\n') {
        key.push('\n');
    }
    key
}

fn write_key_file(raw: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("shipwright-key-")
        .suffix(".pem")
        .tempfile()
        .context("Failed to create SSH key file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(decode_key(raw).as_bytes())
        .context("Failed to write SSH key file")?;
    file.flush()?;
    Ok(file)
}
