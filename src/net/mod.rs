// net/mod.rs
//! Networking layer: one length-prefixed TCP connection and the capability
//! trait the pooled and registered connections are built on.

pub mod connection;
pub mod transport;

pub use connection::{Connection, ConnectionFactory};
pub use transport::{FramedTransport, TransportFactory, TransportOptions};

use thiserror::Error;

// -----------------------------------------------------------------------------
// ----- TransportError --------------------------------------------------------

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("connection to {addr} is not established")]
    NotConnected { addr: String },

    #[error("send to {addr} failed: {reason}")]
    Send { addr: String, reason: String },

    #[error("receive from {addr} failed: {reason}")]
    Receive { addr: String, reason: String },

    #[error("frame of {len} bytes from {addr} exceeds the maximum frame size")]
    FrameTooLarge { addr: String, len: usize },

    #[error("payload of {len} bytes for {addr} exceeds the maximum frame size")]
    PayloadTooLarge { addr: String, len: usize },
}
