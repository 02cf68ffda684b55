use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::info;

use super::pool::{PooledConnection, TaskConnectionPool};
use crate::config::ServerId;
use crate::errors::NetbusError;
use crate::net::{Connection, FramedTransport};

// -----------------------------------------------------------------------------
// ----- TaskPoolManager -------------------------------------------------------

/// One task connection pool per gateway, keyed by serverId.
#[derive(Debug)]
pub struct TaskPoolManager<C: Connection = FramedTransport> {
    pools: BTreeMap<ServerId, Arc<TaskConnectionPool<C>>>,
}

impl<C: Connection> Default for TaskPoolManager<C> {
    fn default() -> Self {
        Self {
            pools: BTreeMap::new(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- TaskPoolManager: Public -----------------------------------------------

impl<C: Connection> TaskPoolManager<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pool: Arc<TaskConnectionPool<C>>) -> Result<(), NetbusError> {
        let server_id = pool.server_id();
        if self.pools.contains_key(&server_id) {
            return Err(NetbusError::DuplicateServerId(server_id));
        }
        self.pools.insert(server_id, pool);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.pools.len()
    }

    pub fn server_ids(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.pools.keys().copied()
    }

    pub fn pool(&self, server_id: ServerId) -> Option<&Arc<TaskConnectionPool<C>>> {
        self.pools.get(&server_id)
    }

    /// `Ok(None)` when no pool owns `server_id`.
    pub async fn socket(
        &self,
        server_id: ServerId,
    ) -> Result<Option<PooledConnection<C>>, NetbusError> {
        match self.pools.get(&server_id) {
            Some(pool) => pool.get().await.map(Some),
            None => Ok(None),
        }
    }

    /// One connection from every pool, or none at all: guards acquired
    /// before a failure are dropped, which returns them to their pools.
    pub async fn sockets(&self) -> Result<Vec<PooledConnection<C>>, NetbusError> {
        let mut acquired = Vec::with_capacity(self.pools.len());
        for pool in self.pools.values() {
            acquired.push(pool.get().await?);
        }
        Ok(acquired)
    }

    pub fn spawn_heartbeats(&self) {
        for pool in self.pools.values() {
            pool.spawn_heartbeat();
        }
    }

    /// Idempotent.
    pub async fn close(&self) {
        let mut closing = JoinSet::new();
        for pool in self.pools.values() {
            let pool = pool.clone();
            closing.spawn(async move { pool.close().await });
        }
        while closing.join_next().await.is_some() {}

        info!("task connection pools closed ({} gateways)", self.pools.len());
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
