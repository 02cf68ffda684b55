use std::collections::{HashSet, VecDeque};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore, TryAcquireError, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{GatewayEndpoint, ServerId};
use crate::errors::NetbusError;
use crate::net::{Connection, ConnectionFactory, FramedTransport, TransportFactory};
use crate::sync::{shutdown_signalled, wait_for};
use crate::wire::Command;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// How long one heartbeat pop waits for an idle connection.
const SWEEP_POP_TIMEOUT: Duration = Duration::from_millis(20);

// -----------------------------------------------------------------------------
// ----- TaskConnectionPool ----------------------------------------------------

/// Bounded, lazily filled pool of request/response connections to one gateway.
///
/// `live` counts every connection that exists, idle or checked out, and never
/// exceeds `capacity`. Slots are reserved under the state lock before a
/// connection is built, so concurrent getters cannot overshoot. The
/// `idle_ready` semaphore holds at most one permit per idle entry: permits are
/// added after a push and forgotten before a pop.
pub struct TaskConnectionPool<C: Connection = FramedTransport> {
    server_id: ServerId,
    capacity: usize,
    wait_timeout: Option<Duration>,
    heartbeat_interval: Duration,
    heartbeat_payload: Bytes,
    factory: Box<dyn ConnectionFactory<C>>,
    state: Mutex<PoolState<C>>,
    idle_ready: Semaphore,
    slot_freed: Notify,
    next_id: AtomicU64,
    shutdown: watch::Sender<bool>,
}

struct PoolState<C> {
    idle: VecDeque<IdleConnection<C>>,
    live: usize,
    closed: bool,
}

struct IdleConnection<C> {
    id: u64,
    conn: C,
}

enum Wake {
    Idle,
    Slot,
    Closed,
}

// -----------------------------------------------------------------------------
// ----- TaskConnectionPool: Static --------------------------------------------

impl TaskConnectionPool<FramedTransport> {
    /// Pool of real TCP transports built from the endpoint settings.
    pub fn from_endpoint(endpoint: &GatewayEndpoint) -> Arc<Self> {
        let factory = TransportFactory::new(endpoint.transport_options());
        Self::new(endpoint, Box::new(factory))
    }
}

impl<C: Connection> TaskConnectionPool<C> {
    pub fn new(endpoint: &GatewayEndpoint, factory: Box<dyn ConnectionFactory<C>>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        let capacity = endpoint.pool_capacity.max(1);

        Arc::new(Self {
            server_id: endpoint.server_id,
            capacity,
            wait_timeout: endpoint.pool_wait_timeout,
            heartbeat_interval: endpoint.heartbeat_interval,
            heartbeat_payload: endpoint.heartbeat_payload.clone(),
            factory,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(capacity),
                live: 0,
                closed: false,
            }),
            idle_ready: Semaphore::new(0),
            slot_freed: Notify::new(),
            next_id: AtomicU64::new(1),
            shutdown,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- TaskConnectionPool: Public --------------------------------------------

impl<C: Connection> TaskConnectionPool<C> {
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Connections that currently exist, idle or checked out.
    pub fn live(&self) -> usize {
        self.state.lock().live
    }

    pub fn idle(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Check out a connection: an idle one if available, a new one while the
    /// pool is below capacity, otherwise whichever frees up first before the
    /// wait timeout.
    pub async fn get(self: &Arc<Self>) -> Result<PooledConnection<C>, NetbusError> {
        let deadline = self.wait_timeout.map(|t| Instant::now() + t);

        loop {
            if let Some(idle) = self.try_take_idle()? {
                if let Some(guard) = self.check_out(idle).await {
                    return Ok(guard);
                }
                continue;
            }

            if let Some(reservation) = self.try_reserve()? {
                return self.build(reservation).await;
            }

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let woke = wait_for(remaining, async {
                tokio::select! {
                    permit = self.idle_ready.acquire() => match permit {
                        Ok(permit) => {
                            permit.forget();
                            Wake::Idle
                        }
                        Err(_) => Wake::Closed,
                    },
                    _ = self.slot_freed.notified() => Wake::Slot,
                }
            })
            .await;

            match woke {
                None => {
                    warn!(
                        "task connection pool {} exhausted after waiting",
                        self.server_id
                    );
                    return Err(NetbusError::PoolExhausted {
                        server_id: self.server_id,
                        timeout: self.wait_timeout,
                    });
                }
                Some(Wake::Closed) => {
                    return Err(NetbusError::PoolClosed {
                        server_id: self.server_id,
                    });
                }
                Some(Wake::Idle) => {
                    let popped = self.state.lock().idle.pop_front();
                    if let Some(idle) = popped
                        && let Some(guard) = self.check_out(idle).await
                    {
                        return Ok(guard);
                    }
                }
                Some(Wake::Slot) => {}
            }
        }
    }

    /// Hand a connection back. `None` means the caller lost it, which frees
    /// its slot; a disconnected connection is treated the same way.
    pub fn release(&self, conn: Option<C>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.release_with_id(id, conn);
    }

    /// Ping every idle connection once; healthy ones go back, failures are
    /// discarded so a later `get` can replace them.
    pub async fn heartbeat_sweep(&self) {
        let mut seen = HashSet::with_capacity(self.capacity);

        for _ in 0..self.capacity {
            let Some(idle) = self.pop_idle_within(SWEEP_POP_TIMEOUT).await else {
                break;
            };

            if !seen.insert(idle.id) {
                self.push_idle(idle);
                continue;
            }

            match idle.conn.round_trip(&self.heartbeat_payload).await {
                Ok(Some(_)) => self.push_idle(idle),
                Ok(None) => {
                    warn!(
                        "heartbeat to {} got no answer; dropping pooled connection",
                        idle.conn.addr()
                    );
                    self.drop_connection(idle.conn).await;
                }
                Err(e) => {
                    warn!(
                        "heartbeat to {} failed: {e}; dropping pooled connection",
                        idle.conn.addr()
                    );
                    self.drop_connection(idle.conn).await;
                }
            }
        }
    }

    /// Run `heartbeat_sweep` every heartbeat interval until `close`.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = self.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_signalled(&mut shutdown) => break,
                    _ = ticker.tick() => pool.heartbeat_sweep().await,
                }
            }

            debug!("task connection pool {} heartbeat stopped", pool.server_id);
        })
    }

    /// Idempotent. Stops the heartbeat, closes idle connections and makes
    /// every pending and future `get` fail.
    pub async fn close(&self) {
        let drained: Vec<IdleConnection<C>> = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.live = state.live.saturating_sub(drained.len());
            drained
        };

        self.idle_ready.close();
        self.shutdown.send_replace(true);
        self.slot_freed.notify_waiters();

        for idle in drained {
            idle.conn.close().await;
        }

        info!("task connection pool {} closed", self.server_id);
    }
}

// -----------------------------------------------------------------------------
// ----- TaskConnectionPool: Private -------------------------------------------

impl<C: Connection> TaskConnectionPool<C> {
    fn try_take_idle(&self) -> Result<Option<IdleConnection<C>>, NetbusError> {
        match self.idle_ready.try_acquire() {
            Ok(permit) => {
                permit.forget();
                Ok(self.state.lock().idle.pop_front())
            }
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(NetbusError::PoolClosed {
                server_id: self.server_id,
            }),
        }
    }

    fn try_reserve(&self) -> Result<Option<SlotReservation<'_, C>>, NetbusError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(NetbusError::PoolClosed {
                server_id: self.server_id,
            });
        }

        if state.idle.is_empty() && state.live < self.capacity {
            state.live += 1;
            return Ok(Some(SlotReservation {
                pool: self,
                armed: true,
            }));
        }

        Ok(None)
    }

    async fn build(
        self: &Arc<Self>,
        mut reservation: SlotReservation<'_, C>,
    ) -> Result<PooledConnection<C>, NetbusError> {
        let conn = self.factory.make().await?;
        reservation.armed = false;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            "task connection pool {} opened connection #{id} to {}",
            self.server_id,
            conn.addr()
        );

        Ok(PooledConnection {
            pool: self.clone(),
            id,
            conn: Some(conn),
        })
    }

    /// Idle entries that lost their socket are dropped instead of handed out.
    async fn check_out(self: &Arc<Self>, idle: IdleConnection<C>) -> Option<PooledConnection<C>> {
        if !idle.conn.is_connected() {
            self.drop_connection(idle.conn).await;
            return None;
        }

        Some(PooledConnection {
            pool: self.clone(),
            id: idle.id,
            conn: Some(idle.conn),
        })
    }

    async fn pop_idle_within(&self, timeout: Duration) -> Option<IdleConnection<C>> {
        match wait_for(Some(timeout), self.idle_ready.acquire()).await {
            Some(Ok(permit)) => {
                permit.forget();
                self.state.lock().idle.pop_front()
            }
            _ => None,
        }
    }

    fn push_idle(&self, idle: IdleConnection<C>) {
        {
            let mut state = self.state.lock();
            if !state.closed {
                state.idle.push_back(idle);
                drop(state);
                self.idle_ready.add_permits(1);
                return;
            }
            state.live = state.live.saturating_sub(1);
        }
        // Pool closed meanwhile; dropping the connection closes its socket.
    }

    fn release_with_id(&self, id: u64, conn: Option<C>) {
        match conn {
            Some(conn) if conn.is_connected() => self.push_idle(IdleConnection { id, conn }),
            _ => self.free_slot(),
        }
    }

    async fn drop_connection(&self, conn: C) {
        conn.close().await;
        self.free_slot();
    }

    fn free_slot(&self) {
        {
            let mut state = self.state.lock();
            state.live = state.live.saturating_sub(1);
        }
        self.slot_freed.notify_one();
    }
}

impl<C: Connection> std::fmt::Debug for TaskConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskConnectionPool")
            .field("server_id", &self.server_id)
            .field("capacity", &self.capacity)
            .field("live", &state.live)
            .field("idle", &state.idle.len())
            .field("closed", &state.closed)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- SlotReservation -------------------------------------------------------

/// A `live` slot taken for a connection that is still being built. Dropping
/// it without disarming gives the slot back, so a failed or cancelled build
/// never leaks capacity.
struct SlotReservation<'a, C: Connection> {
    pool: &'a TaskConnectionPool<C>,
    armed: bool,
}

impl<C: Connection> Drop for SlotReservation<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.free_slot();
        }
    }
}

// -----------------------------------------------------------------------------
// ----- PooledConnection ------------------------------------------------------

/// A checked-out connection. Dropping it returns the connection to the pool.
pub struct PooledConnection<C: Connection = FramedTransport> {
    pool: Arc<TaskConnectionPool<C>>,
    id: u64,
    conn: Option<C>,
}

impl<C: Connection> PooledConnection<C> {
    pub fn server_id(&self) -> ServerId {
        self.pool.server_id
    }

    /// Close the connection and free its slot instead of returning it.
    pub async fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.drop_connection(conn).await;
        }
    }

    /// One request/response exchange. The connection goes back to the pool
    /// on success and is discarded on failure or when no reply arrives.
    pub async fn call(self, command: Command, payload: &[u8]) -> Result<Bytes, NetbusError> {
        match self.round_trip(payload).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => {
                warn!("{command} to {} got no reply before timeout", self.addr());
                self.discard().await;
                Err(NetbusError::NoResponse { command })
            }
            Err(e) => {
                self.discard().await;
                Err(e.into())
            }
        }
    }
}

impl<C: Connection> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn
            .as_ref()
            .expect("pooled connection used after release")
    }
}

impl<C: Connection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release_with_id(self.id, Some(conn));
        }
    }
}

impl<C: Connection> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("server_id", &self.pool.server_id)
            .field("id", &self.id)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
