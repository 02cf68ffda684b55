use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::main_connection::MainConnection;
use crate::config::ServerId;
use crate::errors::NetbusError;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const UNREGISTER_ATTEMPTS: usize = 3;

// -----------------------------------------------------------------------------
// ----- MainConnectionManager -------------------------------------------------

/// One main connection per gateway. Only connections that came up and
/// registered during `start` are exposed to routing.
#[derive(Debug, Default)]
pub struct MainConnectionManager {
    configured: BTreeMap<ServerId, Arc<MainConnection>>,
    live: RwLock<BTreeMap<ServerId, Arc<MainConnection>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

// -----------------------------------------------------------------------------
// ----- MainConnectionManager: Public -----------------------------------------

impl MainConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, conn: Arc<MainConnection>) -> Result<(), NetbusError> {
        let server_id = conn.server_id();
        if self.configured.contains_key(&server_id) {
            return Err(NetbusError::DuplicateServerId(server_id));
        }
        self.configured.insert(server_id, conn);
        Ok(())
    }

    /// Live (started) connections.
    pub fn count(&self) -> usize {
        self.live.read().len()
    }

    pub fn socket(&self, server_id: ServerId) -> Option<Arc<MainConnection>> {
        self.live.read().get(&server_id).cloned()
    }

    pub fn sockets(&self) -> Vec<Arc<MainConnection>> {
        self.live.read().values().cloned().collect()
    }

    /// Connect and register every configured gateway concurrently, then spawn
    /// the loops of each one that succeeded. True only if all succeeded; a
    /// later call retries the ones that did not.
    pub async fn start(&self) -> bool {
        if self.started.load(Ordering::Acquire) {
            return true;
        }
        if self.closed.load(Ordering::Acquire) {
            warn!("main connection manager already closed; not starting");
            return false;
        }

        let mut starting = JoinSet::new();
        for conn in self.configured.values() {
            if self.live.read().contains_key(&conn.server_id()) {
                continue;
            }

            let conn = conn.clone();
            starting.spawn(async move {
                if let Err(e) = conn.connect().await {
                    error!("main connection {} failed to connect: {e}", conn.addr());
                    return (conn, false);
                }
                let registered = conn.register().await;
                (conn, registered)
            });
        }

        let mut all_ok = true;
        while let Some(joined) = starting.join_next().await {
            match joined {
                Ok((conn, true)) => {
                    conn.start_loops();
                    self.live.write().insert(conn.server_id(), conn);
                }
                Ok((_, false)) => all_ok = false,
                Err(e) => {
                    error!("main connection start task failed: {e}");
                    all_ok = false;
                }
            }
        }

        if all_ok {
            self.started.store(true, Ordering::Release);
            info!("main connections started ({} gateways)", self.count());
        }
        all_ok
    }

    /// Idempotent. Unregisters every gateway concurrently (a few tries each),
    /// then closes the connections. Nothing is exposed afterwards.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut unregistering = JoinSet::new();
        for conn in self.configured.values() {
            let conn = conn.clone();
            unregistering.spawn(async move {
                for attempt in 1..=UNREGISTER_ATTEMPTS {
                    if conn.unregister().await {
                        return;
                    }
                    warn!(
                        "unregister from {} failed (attempt {attempt}/{UNREGISTER_ATTEMPTS})",
                        conn.addr()
                    );
                }
            });
        }
        while unregistering.join_next().await.is_some() {}

        self.live.write().clear();

        let mut closing = JoinSet::new();
        for conn in self.configured.values() {
            let conn = conn.clone();
            closing.spawn(async move { conn.close().await });
        }
        while closing.join_next().await.is_some() {}

        info!("main connections closed ({} gateways)", self.configured.len());
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
