use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::debug;

use super::content::ResolvedContent;
use crate::remote::{parent_dir, quote, RemoteExecutor, RunOptions};

/// Write one env file on the host in a single round trip.
///
/// The body travels base64-encoded inside the command so no shell quoting
/// applies to it; the file ends up mode 600. Empty content writes nothing.
pub async fn create_env_file(
    executor: &dyn RemoteExecutor,
    path: &str,
    content: &ResolvedContent,
) -> Result<()> {
    if content.is_empty() {
        debug!("Skipping {}, nothing to write", path);
        return Ok(());
    }

    executor
        .run(&write_command(path, content), RunOptions::batch().secret())
        .await
        .with_context(|| format!("Failed to write {}", path))?;

    debug!("[{}] wrote {} (mode 600)", executor.host(), path);
    Ok(())
}

fn write_command(path: &str, content: &ResolvedContent) -> String {
    format!(
        "mkdir -p {dir} && echo '{encoded}' | base64 -d | tee {path} > /dev/null && chmod 600 {path}",
        dir = quote(parent_dir(path)),
        encoded = STANDARD.encode(content.render()),
        path = quote(path),
    )
}
