use anyhow::{Context, Result};
use api::ApiConfig;

use crate::logging;
use crate::utils::env_paths::EnvPaths;

/// Run the portal server until interrupted.
pub async fn execute(port: Option<u16>) -> Result<()> {
    let paths = EnvPaths::load()?;
    let _guard = logging::init_server_logging(&paths.logs_path())?;

    let mut config = ApiConfig::from_env()?;
    config.data_path = paths.data_path;
    config.config_path = paths.configuration_path;
    if let Some(port) = port {
        config.port = port;
    }

    tracing::info!("Starting portal server");
    api::start_server_with_config(config)
        .await
        .context("Portal server stopped with an error")?;
    tracing::info!("Portal server shut down");
    Ok(())
}
