use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use netbus::wire::messages::{ConnClose, ConnOpen, Transfer};
use netbus::{Config, EventCallback, HexPrefixResolver, Netbus};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "netbus";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let config = match setup().await {
        Ok(config) => config,
        Err(code) => return code,
    };

    run_until_signal(config).await
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

async fn setup() -> Result<Config, ExitCode> {
    // Config has to come first, it carries the log level.
    let config = match Config::load().await {
        Ok(config) => config,
        Err(netbus::config::ConfigError::Cli(e)) => {
            let _ = e.print();
            return Err(ExitCode::from(2));
        }
        Err(e) => {
            eprintln!("{APP_NAME}: {e}");
            return Err(ExitCode::FAILURE);
        }
    };

    init_tracing(&config);
    Ok(config)
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(config.log_level.as_str())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run_until_signal(config: Config) -> ExitCode {
    let worker = config
        .worker_id
        .map(|id| format!("worker {id}"))
        .unwrap_or_else(|| "worker".to_string());

    let bus = match Netbus::build(&config, Arc::new(LogEvents), Arc::new(HexPrefixResolver)) {
        Ok(bus) => bus,
        Err(e) => {
            error!("{APP_NAME} {worker}: {e}");
            return ExitCode::FAILURE;
        }
    };

    if !bus.start().await {
        error!("{APP_NAME} {worker}: not every gateway registered, shutting down");
        bus.close().await;
        return ExitCode::FAILURE;
    }

    info!(
        "{APP_NAME} {worker} connected to {} gateways",
        config.gateways.len()
    );

    if let Err(e) = signal::ctrl_c().await {
        error!("signal handler error: {e}");
    }

    info!("{APP_NAME} {worker} shutting down");
    bus.close().await;
    ExitCode::SUCCESS
}

// -----------------------------------------------------------------------------
// ----- LogEvents -------------------------------------------------------------

/// Logs gateway events; stands in for real business handlers.
struct LogEvents;

#[async_trait]
impl EventCallback for LogEvents {
    async fn on_open(&self, event: ConnOpen) {
        info!("client {} connected", event.uniq_id);
    }

    async fn on_message(&self, event: Transfer) {
        info!(
            "client {} sent {} bytes",
            event.uniq_id,
            event.data.len()
        );
    }

    async fn on_close(&self, event: ConnClose) {
        info!("client {} disconnected", event.uniq_id);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
