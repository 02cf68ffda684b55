//! Connection management and routing towards the gateway cluster.

pub mod events;
pub mod main_connection;
pub mod main_manager;
pub mod netbus;
pub mod pool;
pub mod pool_manager;
pub mod resolver;
pub mod router;

pub use events::{EventCallback, NoopEvents};
pub use main_connection::MainConnection;
pub use main_manager::MainConnectionManager;
pub use netbus::Netbus;
pub use pool::{PooledConnection, TaskConnectionPool};
pub use pool_manager::TaskPoolManager;
pub use resolver::{HexPrefixResolver, ServerIdResolver};
pub use router::{GatewayRouter, ServerCount, ServerMetric};
