mod support;

use std::time::Duration;

use netbus::NetbusError;
use netbus::gateway::TaskConnectionPool;
use netbus::wire::messages::{CheckOnlineReq, CheckOnlineResp};
use netbus::wire::{Command, pack};
use prost::Message;
use support::FakeGateway;

#[tokio::test]
async fn concurrent_requests_share_at_most_capacity_connections() {
    let gw = FakeGateway::start(1).await;
    gw.set_online(&["01a"]);
    let endpoint = gw.endpoint().with_pool_capacity(2);
    let pool = TaskConnectionPool::from_endpoint(&endpoint);

    let mut tasks = Vec::new();
    for i in 0..2 + 6 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let conn = pool.get().await?;
            let req = CheckOnlineReq {
                uniq_ids: vec!["01a".to_string(), format!("01-{i}")],
            };
            let reply = conn.call(Command::CheckOnline, &pack(Command::CheckOnline, &req)).await?;
            Ok::<_, NetbusError>(reply)
        }));
    }

    for task in tasks {
        let reply = task.await.unwrap().unwrap();
        let (code, body) = netbus::wire::unpack(&reply).unwrap();
        assert_eq!(code, Command::CheckOnline.code());
        assert_eq!(CheckOnlineResp::decode(body).unwrap().uniq_ids, vec!["01a"]);
    }

    assert!(gw.accepted() <= 2);
    assert!(pool.live() <= 2);
    assert_eq!(pool.live(), pool.idle());
}

#[tokio::test]
async fn heartbeat_sweep_keeps_healthy_and_drops_dead_connections() {
    let gw = FakeGateway::start(1).await;
    let pool = TaskConnectionPool::from_endpoint(&gw.endpoint());

    let a = pool.get().await.unwrap();
    let b = pool.get().await.unwrap();
    drop(a);
    drop(b);
    assert_eq!(pool.idle(), 2);

    pool.heartbeat_sweep().await;
    assert_eq!(gw.heartbeats(), 2);
    assert_eq!(pool.idle(), 2);

    gw.drop_connections();
    tokio::time::sleep(Duration::from_millis(50)).await;

    pool.heartbeat_sweep().await;
    assert_eq!(pool.idle(), 0);
    assert_eq!(pool.live(), 0);

    // Freed slots are refilled on demand.
    let fresh = pool.get().await.unwrap();
    assert_eq!(fresh.server_id(), 1);
    assert_eq!(gw.accepted(), 3);
}

#[tokio::test]
async fn exhausted_pool_names_the_wait_timeout() {
    let gw = FakeGateway::start(1).await;
    let endpoint = gw
        .endpoint()
        .with_pool_capacity(1)
        .with_pool_wait_timeout(Some(Duration::from_millis(50)));
    let pool = TaskConnectionPool::from_endpoint(&endpoint);

    let _held = pool.get().await.unwrap();
    let err = pool.get().await.unwrap_err();
    assert!(matches!(err, NetbusError::PoolExhausted { server_id: 1, .. }));
    assert!(err.to_string().contains("wait_timeout"));
    assert_eq!(gw.accepted(), 1);
}

#[tokio::test]
async fn capacity_plus_k_getters_give_exactly_capacity_successes() {
    const CAPACITY: usize = 3;
    const EXTRA: usize = 5;

    let gw = FakeGateway::start(1).await;
    let endpoint = gw
        .endpoint()
        .with_pool_capacity(CAPACITY)
        .with_pool_wait_timeout(Some(Duration::from_millis(100)));
    let pool = TaskConnectionPool::from_endpoint(&endpoint);

    let mut tasks = Vec::new();
    for _ in 0..CAPACITY + EXTRA {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let conn = pool.get().await?;
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(conn);
            Ok::<_, NetbusError>(())
        }));
    }

    let mut ok = 0;
    let mut exhausted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => ok += 1,
            Err(NetbusError::PoolExhausted { server_id: 1, .. }) => exhausted += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(ok, CAPACITY);
    assert_eq!(exhausted, EXTRA);
    assert_eq!(gw.accepted(), CAPACITY);
    assert_eq!(pool.live(), CAPACITY);
}
