use anyhow::Result;

use super::{run_user_command, DeployError};
use crate::config::Settings;
use crate::output;
use crate::remote::{quote, InDir, RunOptions};

/// `./deploy.sh` when the repository has one, otherwise `make <environment>`.
pub async fn deploy(repo: &InDir<'_>, settings: &Settings) -> Result<()> {
    if repo.exec_ok("test -f deploy.sh").await? {
        output::info("Running deploy.sh");
        repo.run("chmod +x deploy.sh", RunOptions::default().warn())
            .await?;
        run_user_command(repo, "./deploy.sh", "deploy.sh").await?;
    } else if repo.exec_ok("test -f Makefile").await? {
        output::info(&format!("Running make target: {}", settings.environment));
        run_user_command(
            repo,
            &format!("make {}", quote(&settings.environment)),
            &format!("make {}", settings.environment),
        )
        .await?;
    } else {
        return Err(DeployError::NoDeployTarget.into());
    }

    output::success("Baremetal deployment completed");
    Ok(())
}
