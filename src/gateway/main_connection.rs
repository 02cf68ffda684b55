use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use prost::Message;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::events::EventCallback;
use super::pool::TaskConnectionPool;
use crate::config::{GatewayEndpoint, ServerId};
use crate::errors::NetbusError;
use crate::net::{Connection, FramedTransport, TransportError};
use crate::sync::{InFlight, WaitGroup, shutdown_signalled};
use crate::wire::messages::{
    ConnClose, ConnOpen, RegisterReq, RegisterResp, Transfer, UnRegisterReq, UnRegisterResp,
};
use crate::wire::{Command, pack, unpack};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const OUTBOUND_CAPACITY: usize = 100;

/// Minimum spacing between two reconnect attempts.
pub const RECONNECT_THROTTLE: Duration = Duration::from_secs(3);

/// A heartbeat that cannot be queued this fast is skipped.
const HEARTBEAT_GRACE: Duration = Duration::from_millis(20);

const UNREGISTER_READS: usize = 3;

/// Longest a caller waits on a full outbound queue when no send timeout is set.
const MAX_ENQUEUE_WAIT: Duration = Duration::from_secs(3);

// -----------------------------------------------------------------------------
// ----- MainConnection --------------------------------------------------------

/// The registered connection to one gateway.
///
/// Outbound fire-and-forget payloads go through a bounded queue drained by a
/// single send loop; a receive loop dispatches gateway events to the
/// `EventCallback`; a heartbeat loop keeps the link alive. Every queued
/// payload and every running event handler is counted in `in_flight`, and
/// `close` waits for that count to reach zero before it tears down the socket.
pub struct MainConnection {
    endpoint: Arc<GatewayEndpoint>,
    transport: FramedTransport,
    events: Arc<dyn EventCallback>,
    task_pool: Arc<TaskConnectionPool>,
    conn_id: Mutex<String>,
    outbound: Mutex<Option<mpsc::Sender<Bytes>>>,
    pending_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    in_flight: Arc<WaitGroup>,
    reconnect_slot: tokio::sync::Mutex<ReconnectSlot>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct ReconnectSlot {
    last_attempt: Option<Instant>,
    closed: bool,
}

// -----------------------------------------------------------------------------
// ----- MainConnection: Static ------------------------------------------------

impl MainConnection {
    /// `task_pool` must belong to the same gateway; `unregister` borrows a
    /// connection from it.
    pub fn new(
        endpoint: Arc<GatewayEndpoint>,
        events: Arc<dyn EventCallback>,
        task_pool: Arc<TaskConnectionPool>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            transport: FramedTransport::new(endpoint.transport_options()),
            endpoint,
            events,
            task_pool,
            conn_id: Mutex::new(String::new()),
            outbound: Mutex::new(Some(tx)),
            pending_rx: Mutex::new(Some(rx)),
            in_flight: Arc::new(WaitGroup::new()),
            reconnect_slot: tokio::sync::Mutex::new(ReconnectSlot::default()),
            closed: AtomicBool::new(false),
            shutdown,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- MainConnection: Public ------------------------------------------------

impl MainConnection {
    pub fn server_id(&self) -> ServerId {
        self.endpoint.server_id
    }

    pub fn addr(&self) -> &str {
        &self.endpoint.addr
    }

    /// Empty until the gateway accepted `register`.
    pub fn conn_id(&self) -> String {
        self.conn_id.lock().clone()
    }

    pub fn is_registered(&self) -> bool {
        !self.conn_id.lock().is_empty()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queued payloads plus running event handlers.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count()
    }

    pub async fn connect(&self) -> Result<(), NetbusError> {
        self.transport.connect().await?;
        Ok(())
    }

    /// Announce this worker to the gateway. Logs and returns false on any
    /// failure or rejection.
    pub async fn register(&self) -> bool {
        let addr = self.addr();
        let req = RegisterReq {
            events: self.endpoint.events.bits(),
            process_cmd_goroutine_num: self.endpoint.desired_concurrency,
        };

        let reply = match self.transport.round_trip(&pack(Command::Register, &req)).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                error!("register to {addr} failed: no reply before timeout");
                return false;
            }
            Err(e) => {
                error!("register to {addr} failed: {e}");
                return false;
            }
        };

        let resp = match decode_reply::<RegisterResp>(Command::Register, &reply) {
            Ok(resp) => resp,
            Err(e) => {
                error!("register to {addr} failed: {e}");
                return false;
            }
        };

        if resp.code != 0 {
            let err = NetbusError::Registration {
                code: resp.code,
                message: resp.message,
            };
            error!("register to {addr} failed: {err}");
            return false;
        }

        if resp.conn_id.is_empty() {
            error!("register to {addr} failed: gateway accepted but sent no conn_id");
            return false;
        }

        info!("register to {addr} ok, conn_id={}", resp.conn_id);
        *self.conn_id.lock() = resp.conn_id;
        true
    }

    /// Withdraw the registration over a pooled task connection. True when
    /// there was nothing to undo or the gateway acknowledged.
    pub async fn unregister(&self) -> bool {
        let addr = self.addr();
        let conn_id = self.conn_id();
        if conn_id.is_empty() {
            return true;
        }

        let conn = match self.task_pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("unregister from {addr} failed: {e}");
                return false;
            }
        };

        let req = pack(Command::Unregister, &UnRegisterReq { conn_id });
        if let Err(e) = conn.send(&req).await {
            error!("unregister from {addr} failed: {e}");
            conn.discard().await;
            return false;
        }

        for _ in 0..UNREGISTER_READS {
            match conn.receive().await {
                Ok(None) => continue,
                Ok(Some(reply)) => {
                    if decode_reply::<UnRegisterResp>(Command::Unregister, &reply).is_err() {
                        debug!("unregister from {addr}: skipping unrelated frame");
                        continue;
                    }
                    self.conn_id.lock().clear();
                    info!("unregister from {addr} ok");
                    return true;
                }
                Err(e) => {
                    error!("unregister from {addr} failed: {e}");
                    conn.discard().await;
                    return false;
                }
            }
        }

        warn!("unregister from {addr} got no reply");
        conn.discard().await;
        false
    }

    /// Spawn the send, receive and heartbeat loops. Later calls are no-ops.
    pub fn start_loops(self: &Arc<Self>) {
        let Some(rx) = self.pending_rx.lock().take() else {
            return;
        };

        tokio::spawn(self.clone().send_loop(rx));
        tokio::spawn(self.clone().receive_loop());
        tokio::spawn(self.clone().heartbeat_loop());
    }

    /// Queue a fire-and-forget payload. Waits at most the send timeout for
    /// room; false means the payload was dropped.
    pub async fn enqueue_send(&self, payload: Bytes) -> bool {
        self.enqueue(payload, self.endpoint.send_timeout).await
    }

    /// Bring the transport back. Attempts are serialised and spaced at least
    /// `RECONNECT_THROTTLE` apart; a new socket is registered again unless
    /// the connection is closing.
    pub async fn reconnect(&self) -> bool {
        let addr = self.addr();
        let mut slot = self.reconnect_slot.lock().await;

        if slot.closed {
            return false;
        }
        if self.transport.is_connected() {
            return true;
        }

        if let Some(last) = slot.last_attempt {
            let since = last.elapsed();
            if since < RECONNECT_THROTTLE {
                tokio::time::sleep(RECONNECT_THROTTLE - since).await;
            }
        }
        slot.last_attempt = Some(Instant::now());

        warn!("reconnecting to {addr}");
        if let Err(e) = self.transport.connect().await {
            warn!("reconnect to {addr} failed: {e}");
            return false;
        }

        if !self.is_closed() {
            self.conn_id.lock().clear();
            self.register().await;
        }
        true
    }

    /// Idempotent. Stops the loops, waits until every queued payload is
    /// written (or dropped) and every event handler returned, then closes the
    /// socket.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.send_replace(true);
        self.in_flight.wait().await;

        // Dropping the last sender ends the send loop.
        self.outbound.lock().take();
        self.pending_rx.lock().take();
        self.transport.close().await;
        self.reconnect_slot.lock().await.closed = true;

        info!("main connection {} closed", self.addr());
    }
}

// -----------------------------------------------------------------------------
// ----- MainConnection: Loops -------------------------------------------------

impl MainConnection {
    async fn send_loop(self: Arc<Self>, mut rx: mpsc::Receiver<Bytes>) {
        let addr = self.addr().to_string();
        let mut gave_up = false;

        while let Some(payload) = rx.recv().await {
            let _done = InFlight::adopt(&self.in_flight);
            let mut last_chance = gave_up;

            loop {
                match self.transport.send(&payload).await {
                    Ok(()) => break,
                    Err(TransportError::PayloadTooLarge { .. }) => break,
                    Err(_) => {}
                }

                if last_chance {
                    gave_up = true;
                    warn!("dropping {} byte payload for {addr}: connection closed", payload.len());
                    break;
                }

                last_chance = self.is_closed();
                self.reconnect().await;
            }
        }

        debug!("send loop for {addr} stopped");
    }

    async fn receive_loop(self: Arc<Self>) {
        let _running = self.in_flight.enter();
        let addr = self.addr().to_string();
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let received = tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                received = self.transport.receive() => received,
            };

            match received {
                Ok(None) => continue,
                Ok(Some(frame)) => self.dispatch(frame),
                Err(_) => {
                    if self.is_closed() {
                        break;
                    }
                    tokio::select! {
                        _ = shutdown_signalled(&mut shutdown) => break,
                        _ = self.reconnect() => {}
                    }
                }
            }
        }

        debug!("receive loop for {addr} stopped");
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let addr = self.addr().to_string();
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.endpoint.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                _ = ticker.tick() => {
                    let payload = self.endpoint.heartbeat_payload.clone();
                    if !self.enqueue(payload, Some(HEARTBEAT_GRACE)).await {
                        debug!("heartbeat to {addr} skipped: outbound queue busy");
                    }
                }
            }
        }

        debug!("heartbeat loop for {addr} stopped");
    }
}

// -----------------------------------------------------------------------------
// ----- MainConnection: Private -----------------------------------------------

impl MainConnection {
    async fn enqueue(&self, payload: Bytes, wait: Option<Duration>) -> bool {
        let addr = self.addr();
        if self.is_closed() {
            warn!("send to {addr} dropped: connection closed");
            return false;
        }

        let Some(sender) = self.outbound.lock().clone() else {
            warn!("send to {addr} dropped: connection closed");
            return false;
        };

        self.in_flight.add();
        let limit = wait.unwrap_or(MAX_ENQUEUE_WAIT);
        let pushed = sender.send_timeout(payload, limit).await.is_ok();

        if !pushed {
            self.in_flight.done();
            warn!("send to {addr} dropped: outbound queue full or closed");
        }
        pushed
    }

    fn dispatch(&self, frame: Bytes) {
        let addr = self.addr();
        if frame == self.endpoint.heartbeat_payload {
            trace!("heartbeat echo from {addr}");
            return;
        }

        let Some((code, body)) = unpack(&frame) else {
            debug!("ignoring short frame from {addr}");
            return;
        };

        let events = self.events.clone();
        let guard = self.in_flight.enter();

        match Command::from_code(code) {
            Some(Command::Transfer) => match Transfer::decode(body) {
                Ok(event) => {
                    tokio::spawn(async move {
                        let _guard = guard;
                        events.on_message(event).await;
                    });
                }
                Err(e) => warn!("bad Transfer from {addr}: {e}"),
            },
            Some(Command::ConnOpen) => match ConnOpen::decode(body) {
                Ok(event) => {
                    tokio::spawn(async move {
                        let _guard = guard;
                        events.on_open(event).await;
                    });
                }
                Err(e) => warn!("bad ConnOpen from {addr}: {e}"),
            },
            Some(Command::ConnClose) => match ConnClose::decode(body) {
                Ok(event) => {
                    tokio::spawn(async move {
                        let _guard = guard;
                        events.on_close(event).await;
                    });
                }
                Err(e) => warn!("bad ConnClose from {addr}: {e}"),
            },
            _ => debug!("ignoring command {code} from {addr}"),
        }
    }
}

impl std::fmt::Debug for MainConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainConnection")
            .field("server_id", &self.endpoint.server_id)
            .field("addr", &self.endpoint.addr)
            .field("conn_id", &*self.conn_id.lock())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

/// Check the command code of a response and decode its body.
pub(crate) fn decode_reply<M: Message + Default>(
    expected: Command,
    reply: &Bytes,
) -> Result<M, NetbusError> {
    let Some((code, body)) = unpack(reply) else {
        return Err(NetbusError::UnexpectedCommand { expected, got: 0 });
    };

    if code != expected.code() {
        return Err(NetbusError::UnexpectedCommand {
            expected,
            got: code,
        });
    }

    M::decode(body).map_err(|source| NetbusError::Decode {
        command: expected,
        source,
    })
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
