mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use netbus::config::GatewayEndpoint;
use netbus::gateway::{
    EventCallback, MainConnection, MainConnectionManager, NoopEvents, TaskConnectionPool,
};
use netbus::wire::messages::{ConnClose, ConnOpen, RegisterReq, SingleCast, Transfer, UnRegisterReq};
use netbus::wire::{Command, pack};
use parking_lot::Mutex;
use support::{FakeGateway, HEARTBEAT};

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    opened: Mutex<Vec<String>>,
    messages: Mutex<Vec<(String, Vec<u8>)>>,
    closed: Mutex<Vec<String>>,
}

#[async_trait]
impl EventCallback for Recorder {
    async fn on_open(&self, event: ConnOpen) {
        self.opened.lock().push(event.uniq_id);
    }

    async fn on_message(&self, event: Transfer) {
        self.messages.lock().push((event.uniq_id, event.data));
    }

    async fn on_close(&self, event: ConnClose) {
        self.closed.lock().push(event.uniq_id);
    }
}

fn main_connection(
    endpoint: GatewayEndpoint,
    events: Arc<dyn EventCallback>,
) -> Arc<MainConnection> {
    let endpoint = Arc::new(endpoint);
    let pool = TaskConnectionPool::from_endpoint(&endpoint);
    MainConnection::new(endpoint, events, pool)
}

async fn started(gw: &FakeGateway, events: Arc<dyn EventCallback>) -> Arc<MainConnection> {
    let conn = main_connection(gw.endpoint(), events);
    conn.connect().await.unwrap();
    assert!(conn.register().await);
    conn.start_loops();
    conn
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn single_cast(uniq_id: &str) -> Bytes {
    pack(
        Command::SingleCast,
        &SingleCast {
            uniq_id: uniq_id.to_string(),
            data: b"payload".to_vec(),
        },
    )
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[tokio::test]
async fn register_announces_events_and_stores_conn_id() {
    let gw = FakeGateway::start(1).await;
    let conn = main_connection(gw.endpoint(), Arc::new(NoopEvents));

    conn.connect().await.unwrap();
    assert!(!conn.is_registered());
    assert!(conn.register().await);
    assert_eq!(conn.conn_id(), "conn-1-1");

    let reqs: Vec<RegisterReq> = gw.decoded(Command::Register);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].events, 1 | 2 | 4);
    assert_eq!(reqs[0].process_cmd_goroutine_num, 25);
}

#[tokio::test]
async fn rejected_register_keeps_conn_id_empty() {
    let gw = FakeGateway::start(1).await;
    gw.set_register_code(3);
    let conn = main_connection(gw.endpoint(), Arc::new(NoopEvents));

    conn.connect().await.unwrap();
    assert!(!conn.register().await);
    assert!(conn.conn_id().is_empty());

    // Nothing to withdraw, so no request goes out.
    assert!(conn.unregister().await);
    assert!(gw.frames(Command::Unregister).is_empty());
}

#[tokio::test]
async fn accepted_register_without_conn_id_is_a_failure() {
    let gw = FakeGateway::start(1).await;
    gw.blank_conn_id();
    let conn = main_connection(gw.endpoint(), Arc::new(NoopEvents));

    conn.connect().await.unwrap();
    assert!(!conn.register().await);
    assert!(!conn.is_registered());
    assert_eq!(gw.registrations(), 1);
}

#[tokio::test]
async fn gateway_events_reach_the_callback() {
    let gw = FakeGateway::start(1).await;
    let recorder = Arc::new(Recorder::default());
    let conn = started(&gw, recorder.clone()).await;

    gw.push(
        Command::ConnOpen,
        &ConnOpen {
            uniq_id: "01open".into(),
            ..ConnOpen::default()
        },
    )
    .await;
    gw.push(
        Command::Transfer,
        &Transfer {
            uniq_id: "01msg".into(),
            data: b"hello".to_vec(),
            ..Transfer::default()
        },
    )
    .await;
    gw.push(
        Command::ConnClose,
        &ConnClose {
            uniq_id: "01gone".into(),
            ..ConnClose::default()
        },
    )
    .await;

    eventually(|| {
        recorder.opened.lock().len() == 1
            && recorder.messages.lock().len() == 1
            && recorder.closed.lock().len() == 1
    })
    .await;

    assert_eq!(recorder.opened.lock()[0], "01open");
    assert_eq!(
        recorder.messages.lock()[0],
        ("01msg".to_string(), b"hello".to_vec())
    );
    assert_eq!(recorder.closed.lock()[0], "01gone");

    conn.close().await;
}

#[tokio::test]
async fn queued_sends_arrive_in_order() {
    let gw = FakeGateway::start(1).await;
    let conn = started(&gw, Arc::new(NoopEvents)).await;

    for i in 0..20 {
        assert!(conn.enqueue_send(single_cast(&format!("01-{i}"))).await);
    }

    gw.wait_for_frames(Command::SingleCast, 20).await;
    let ids: Vec<String> = gw
        .decoded::<SingleCast>(Command::SingleCast)
        .into_iter()
        .map(|m| m.uniq_id)
        .collect();
    let expected: Vec<String> = (0..20).map(|i| format!("01-{i}")).collect();
    assert_eq!(ids, expected);

    conn.close().await;
}

#[tokio::test]
async fn heartbeats_follow_the_interval() {
    let gw = FakeGateway::start(1).await;
    let endpoint = gw
        .endpoint()
        .with_heartbeat(Duration::from_millis(50), Bytes::from_static(HEARTBEAT));
    let conn = main_connection(endpoint, Arc::new(NoopEvents));
    conn.connect().await.unwrap();
    assert!(conn.register().await);
    conn.start_loops();

    eventually(|| gw.heartbeats() >= 3).await;
    conn.close().await;
}

#[tokio::test]
async fn reconnects_and_registers_again_after_the_gateway_drops_it() {
    let gw = FakeGateway::start(1).await;
    let conn = started(&gw, Arc::new(NoopEvents)).await;
    assert_eq!(conn.conn_id(), "conn-1-1");

    gw.drop_connections();

    eventually(|| gw.registrations() >= 2 && conn.is_registered()).await;
    assert_eq!(conn.conn_id(), "conn-1-2");

    assert!(conn.enqueue_send(single_cast("01-after")).await);
    gw.wait_for_frames(Command::SingleCast, 1).await;

    conn.close().await;
}

#[tokio::test]
async fn manager_close_drains_unregisters_and_is_idempotent() {
    let gw = FakeGateway::start(1).await;
    let conn = main_connection(gw.endpoint(), Arc::new(NoopEvents));

    let mut manager = MainConnectionManager::new();
    manager.insert(conn.clone()).unwrap();
    assert!(manager.start().await);
    assert!(manager.start().await);
    assert_eq!(gw.registrations(), 1);
    assert_eq!(manager.count(), 1);

    for i in 0..5 {
        assert!(conn.enqueue_send(single_cast(&format!("01-{i}"))).await);
    }

    manager.close().await;
    manager.close().await;

    assert!(conn.is_closed());
    assert_eq!(conn.in_flight(), 0);
    assert!(manager.socket(1).is_none());
    assert!(!conn.is_registered());

    gw.wait_for_frames(Command::SingleCast, 5).await;
    let unregister: Vec<UnRegisterReq> = gw.decoded(Command::Unregister);
    assert_eq!(unregister.len(), 1);
    assert_eq!(unregister[0].conn_id, "conn-1-1");

    assert!(!conn.enqueue_send(single_cast("01-late")).await);
}
