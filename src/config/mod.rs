//! Process configuration: CLI/env options plus the TOML gateway file.

pub mod cli;
pub mod config;
pub mod gateways;
pub mod types;

pub use cli::CliConfig;
pub use config::{Config, ConfigError};
pub use gateways::{GatewayEndpoint, GatewaysConfig, GatewaysError, ServerId};
pub use types::LogLevel;
