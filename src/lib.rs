pub mod config;
pub mod errors;
pub mod gateway;
pub mod net;
pub mod sync;
pub mod wire;

pub use config::{Config, GatewayEndpoint, ServerId};
pub use errors::NetbusError;
pub use gateway::{EventCallback, GatewayRouter, HexPrefixResolver, Netbus, ServerIdResolver};
