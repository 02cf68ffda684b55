use clap::Parser;
use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use super::{config::ConfigError, types::LogLevel};

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub config_file_location: PathBuf,
    pub worker_id: Option<u32>,
    pub log_level: LogLevel,
}

// -----------------------------------------------------------------------------
// ----- CliConfig: Static -----------------------------------------------------

impl CliConfig {
    /// Parse the process arguments and environment.
    pub fn from_args() -> Result<CliConfig, ConfigError> {
        Self::from_parsed(Args::try_parse()?)
    }

    pub fn try_parse_from<I, T>(args: I) -> Result<CliConfig, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::from_parsed(Args::try_parse_from(args)?)
    }
}

// -----------------------------------------------------------------------------
// ----- CliConfig: Private ----------------------------------------------------

impl CliConfig {
    fn from_parsed(args: Args) -> Result<CliConfig, ConfigError> {
        let cfg = Self {
            config_file_location: args.config_file,
            worker_id: args.worker_id,
            log_level: args.log_level,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        must_exist_file(&self.config_file_location, "--config / netbus.toml")
    }
}

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "netbus", version, about = "Business worker bridge to the gateway cluster")]
struct Args {
    // Not required via CLI or ENV (defaults to info).
    #[arg(long = "log", default_value = "info")]
    log_level: LogLevel,

    // Must exist; no defaults.
    #[arg(long = "config", env = "NETBUS_CONFIG_FILE")]
    config_file: PathBuf,

    // Optional; only used to tag logs.
    #[arg(long = "worker-id", env = "NETBUS_WORKER_ID")]
    worker_id: Option<u32>,
}

// -----------------------------------------------------------------------------
// ----- Private Utils ---------------------------------------------------------

fn must_exist_file(path: &Path, hint: &'static str) -> Result<(), ConfigError> {
    match fs::metadata(path) {
        Ok(md) if md.is_file() => Ok(()),
        Ok(_) => Err(ConfigError::NotAFile {
            path: path.to_path_buf(),
            hint,
        }),
        Err(_) => Err(ConfigError::MissingFile {
            path: path.to_path_buf(),
            hint,
        }),
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
