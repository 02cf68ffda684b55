use std::time::Duration;

use thiserror::Error;

use crate::config::{GatewaysError, ServerId};
use crate::net::TransportError;
use crate::wire::Command;

// -----------------------------------------------------------------------------
// ----- NetbusError -----------------------------------------------------------

#[derive(Debug, Error)]
pub enum NetbusError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("gateway rejected register: code={code} message={message}")]
    Registration { code: i32, message: String },

    #[error(
        "task connection pool of server {server_id} exhausted; cannot establish new connection before wait_timeout {}",
        display_timeout(.timeout)
    )]
    PoolExhausted {
        server_id: ServerId,
        timeout: Option<Duration>,
    },

    #[error("task connection pool of server {server_id} is closed")]
    PoolClosed { server_id: ServerId },

    #[error("serverId {0} is configured more than once")]
    DuplicateServerId(ServerId),

    #[error("decode {command} response failed: {source}")]
    Decode {
        command: Command,
        source: prost::DecodeError,
    },

    #[error("call {command} failed because the gateway did not answer before the receive timeout")]
    NoResponse { command: Command },

    #[error("expected {expected} response, got command code {got}")]
    UnexpectedCommand { expected: Command, got: u32 },

    #[error("fan-out task for server {server_id} ended without a result")]
    ShardLost { server_id: ServerId },

    #[error(transparent)]
    Config(#[from] GatewaysError),
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn display_timeout(timeout: &Option<Duration>) -> String {
    match timeout {
        Some(limit) => humantime::format_duration(*limit).to_string(),
        None => "infinite".to_string(),
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
