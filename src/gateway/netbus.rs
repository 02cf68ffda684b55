use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use super::events::EventCallback;
use super::main_connection::MainConnection;
use super::main_manager::MainConnectionManager;
use super::pool::TaskConnectionPool;
use super::pool_manager::TaskPoolManager;
use super::resolver::ServerIdResolver;
use super::router::GatewayRouter;
use crate::config::{Config, GatewaysError};
use crate::errors::NetbusError;

// -----------------------------------------------------------------------------
// ----- Netbus ----------------------------------------------------------------

/// Everything needed to talk to the gateway cluster, built from a `Config`.
///
/// Owns one main connection and one task connection pool per gateway and
/// hands out a `GatewayRouter` over them.
#[derive(Debug)]
pub struct Netbus {
    mains: Arc<MainConnectionManager>,
    pools: Arc<TaskPoolManager>,
    router: GatewayRouter,
    heartbeats_started: AtomicBool,
}

// -----------------------------------------------------------------------------
// ----- Netbus: Static --------------------------------------------------------

impl Netbus {
    /// Nothing connects until `start`; task connections are opened lazily.
    pub fn build(
        config: &Config,
        events: Arc<dyn EventCallback>,
        resolver: Arc<dyn ServerIdResolver>,
    ) -> Result<Netbus, NetbusError> {
        if config.gateways.is_empty() {
            return Err(GatewaysError::NoGateways.into());
        }

        let mut pools = TaskPoolManager::new();
        let mut mains = MainConnectionManager::new();

        for endpoint in &config.gateways {
            let pool = TaskConnectionPool::from_endpoint(endpoint);
            pools.insert(pool.clone())?;
            mains.insert(MainConnection::new(endpoint.clone(), events.clone(), pool))?;
        }

        let mains = Arc::new(mains);
        let pools = Arc::new(pools);
        let router = GatewayRouter::new(mains.clone(), pools.clone(), resolver);

        Ok(Netbus {
            mains,
            pools,
            router,
            heartbeats_started: AtomicBool::new(false),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Netbus: Public --------------------------------------------------------

impl Netbus {
    pub fn router(&self) -> &GatewayRouter {
        &self.router
    }

    pub fn main_connections(&self) -> &MainConnectionManager {
        &self.mains
    }

    pub fn task_pools(&self) -> &TaskPoolManager {
        &self.pools
    }

    /// Connect and register every main connection and start the pool
    /// heartbeats. True only when every gateway registered.
    pub async fn start(&self) -> bool {
        if !self.heartbeats_started.swap(true, Ordering::AcqRel) {
            self.pools.spawn_heartbeats();
        }

        let ok = self.mains.start().await;
        if ok {
            info!("netbus started ({} gateways)", self.pools.count());
        }
        ok
    }

    /// Idempotent. Main connections go first because unregistering borrows
    /// task connections.
    pub async fn close(&self) {
        self.mains.close().await;
        self.pools.close().await;
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
