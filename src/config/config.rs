use std::{path::PathBuf, sync::Arc};

use thiserror::Error;

use super::{
    cli::CliConfig,
    gateways::{GatewayEndpoint, GatewaysConfig, GatewaysError},
    types::LogLevel,
};

// -----------------------------------------------------------------------------
// ----- Config ----------------------------------------------------------------

/// Everything the worker needs at startup. Loaded once and passed down
/// explicitly.
#[derive(Clone, Debug)]
pub struct Config {
    pub worker_id: Option<u32>,
    pub log_level: LogLevel,
    pub gateways: Vec<Arc<GatewayEndpoint>>,
}

// -----------------------------------------------------------------------------
// ----- Config: Static --------------------------------------------------------

impl Config {
    /// Async because the gateway file is read with non-blocking IO.
    pub async fn load() -> Result<Config, ConfigError> {
        let cli = CliConfig::from_args()?;
        Self::from_cli(cli).await
    }

    pub async fn from_cli(cli: CliConfig) -> Result<Config, ConfigError> {
        let gateways = GatewaysConfig::from_file(&cli.config_file_location).await?;

        Ok(Config {
            worker_id: cli.worker_id,
            log_level: cli.log_level,
            gateways: gateways.into_endpoints(),
        })
    }

    /// Build directly from endpoints, mostly for embedding and tests.
    pub fn with_gateways(gateways: Vec<GatewayEndpoint>) -> Config {
        Config {
            worker_id: None,
            log_level: LogLevel::default(),
            gateways: gateways.into_iter().map(Arc::new).collect(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ConfigError -----------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid CLI/ENV: {0}")]
    Cli(#[from] clap::Error),

    #[error("required file missing: {} (from {hint})", path.display())]
    MissingFile { path: PathBuf, hint: &'static str },

    #[error("path is not a file: {} (from {hint})", path.display())]
    NotAFile { path: PathBuf, hint: &'static str },

    #[error(transparent)]
    Gateways(#[from] GatewaysError),
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
