use anyhow::Result;

use crate::config::Settings;
use crate::deploy;

pub async fn run(settings: Settings) -> Result<()> {
    deploy::run(&settings).await
}
