//! In-process fake gateway: accepts connections on an ephemeral port, records
//! every frame and answers register, heartbeat and query commands.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use netbus::config::{GatewayEndpoint, ServerId};
use netbus::wire::messages::{
    CheckOnlineReq, CheckOnlineResp, ConnInfoReq, ConnInfoResp, ConnInfoRespItem,
    ConnOpenCustomUniqIdTokenResp, LimitResp, LimitRespItem, MetricsResp, MetricsRespItem,
    RegisterResp, TopicCountResp, TopicListResp, TopicUniqIdCountReq, TopicUniqIdCountResp,
    TopicUniqIdListReq, TopicUniqIdListResp, TopicUniqIdListRespItem, UnRegisterResp,
    UniqIdCountResp, UniqIdListResp,
};
use netbus::wire::{Command, encode_frame, pack, try_decode_frame, unpack};
use parking_lot::Mutex;
use prost::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub const HEARTBEAT: &[u8] = b"~6YOt5rW35piO~";

// -----------------------------------------------------------------------------
// ----- FakeGateway -----------------------------------------------------------

pub struct FakeGateway {
    pub server_id: ServerId,
    pub addr: String,
    state: Arc<GatewayState>,
    kill: watch::Sender<u64>,
    accept: JoinHandle<()>,
}

#[derive(Default)]
struct GatewayState {
    server_id: ServerId,
    frames: Mutex<Vec<(u32, Bytes)>>,
    heartbeats: AtomicUsize,
    accepted: AtomicUsize,
    registrations: AtomicUsize,
    register_code: AtomicI32,
    blank_conn_id: AtomicBool,
    online: Mutex<HashSet<String>>,
    topics: Mutex<HashMap<String, Vec<String>>>,
    pushers: Mutex<Vec<mpsc::Sender<Bytes>>>,
}

#[allow(dead_code)]
impl FakeGateway {
    pub async fn start(server_id: ServerId) -> FakeGateway {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(GatewayState {
            server_id,
            ..GatewayState::default()
        });
        let (kill, _) = watch::channel(0u64);

        let accept = {
            let state = state.clone();
            let kill = kill.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    state.accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, state.clone(), kill.subscribe()));
                }
            })
        };

        FakeGateway {
            server_id,
            addr,
            state,
            kill,
            accept,
        }
    }

    /// Endpoint with short timeouts suited to tests.
    pub fn endpoint(&self) -> GatewayEndpoint {
        GatewayEndpoint::new(self.server_id, self.addr.clone())
            .with_pool_capacity(4)
            .with_pool_wait_timeout(Some(Duration::from_secs(1)))
            .with_receive_timeout(Some(Duration::from_millis(200)))
    }

    pub fn set_register_code(&self, code: i32) {
        self.state.register_code.store(code, Ordering::SeqCst);
    }

    /// Accept registrations but leave `conn_id` empty.
    pub fn blank_conn_id(&self) {
        self.state.blank_conn_id.store(true, Ordering::SeqCst);
    }

    pub fn set_online(&self, uniq_ids: &[&str]) {
        *self.state.online.lock() = uniq_ids.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_topic(&self, topic: &str, uniq_ids: &[&str]) {
        self.state.topics.lock().insert(
            topic.to_string(),
            uniq_ids.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    pub fn registrations(&self) -> usize {
        self.state.registrations.load(Ordering::SeqCst)
    }

    pub fn heartbeats(&self) -> usize {
        self.state.heartbeats.load(Ordering::SeqCst)
    }

    /// Bodies of every received frame carrying `command`.
    pub fn frames(&self, command: Command) -> Vec<Bytes> {
        self.state
            .frames
            .lock()
            .iter()
            .filter(|(code, _)| *code == command.code())
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn decoded<M: Message + Default>(&self, command: Command) -> Vec<M> {
        self.frames(command)
            .into_iter()
            .map(|body| M::decode(body).unwrap())
            .collect()
    }

    /// Poll until at least `n` frames of `command` arrived.
    pub async fn wait_for_frames(&self, command: Command, n: usize) -> Vec<Bytes> {
        for _ in 0..300 {
            let frames = self.frames(command);
            if frames.len() >= n {
                return frames;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "gateway {} saw {} {command} frames, wanted {n}",
            self.server_id,
            self.frames(command).len()
        );
    }

    /// Send an unsolicited event on every registered connection.
    pub async fn push(&self, command: Command, body: &impl Message) {
        let payload = pack(command, body);
        let pushers = self.state.pushers.lock().clone();
        for pusher in pushers {
            let _ = pusher.send(payload.clone()).await;
        }
    }

    /// Close every open connection; the listener keeps accepting.
    pub fn drop_connections(&self) {
        self.kill.send_modify(|generation| *generation += 1);
        self.state.pushers.lock().clear();
    }

    pub fn stop(&self) {
        self.accept.abort();
        self.drop_connections();
    }
}

impl Drop for FakeGateway {
    fn drop(&mut self) {
        self.stop();
    }
}

// -----------------------------------------------------------------------------
// ----- Connection handling ---------------------------------------------------

async fn serve(stream: TcpStream, state: Arc<GatewayState>, mut kill: watch::Receiver<u64>) {
    let (mut reader, mut writer) = stream.into_split();
    let (push_tx, mut push_rx) = mpsc::channel::<Bytes>(64);
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            _ = kill.changed() => break,
            Some(payload) = push_rx.recv() => {
                if writer.write_all(&encode_frame(&payload)).await.is_err() {
                    break;
                }
            }
            read = reader.read_buf(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                while let Ok(Some(frame)) = try_decode_frame(&mut buf) {
                    if let Some(reply) = state.handle(&frame, &push_tx)
                        && writer.write_all(&encode_frame(&reply)).await.is_err()
                    {
                        return;
                    }
                }
            }
        }
    }
}

impl GatewayState {
    fn handle(&self, frame: &Bytes, push_tx: &mpsc::Sender<Bytes>) -> Option<Bytes> {
        if frame.as_ref() == HEARTBEAT {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            return Some(frame.clone());
        }

        let (code, body) = unpack(frame)?;
        self.frames.lock().push((code, body.clone()));
        let server_id = self.server_id;

        let reply = match Command::from_code(code)? {
            Command::Register => {
                let code = self.register_code.load(Ordering::SeqCst);
                let n = self.registrations.fetch_add(1, Ordering::SeqCst) + 1;
                if code == 0 {
                    self.pushers.lock().push(push_tx.clone());
                }
                let resp = RegisterResp {
                    code,
                    message: if code == 0 { String::new() } else { "rejected".into() },
                    conn_id: if code == 0 && !self.blank_conn_id.load(Ordering::SeqCst) {
                        format!("conn-{server_id}-{n}")
                    } else {
                        String::new()
                    },
                };
                pack(Command::Register, &resp)
            }
            Command::Unregister => pack(Command::Unregister, &UnRegisterResp {}),
            Command::CheckOnline => {
                let req = CheckOnlineReq::decode(body).ok()?;
                let online = self.online.lock();
                let uniq_ids = req.uniq_ids.into_iter().filter(|id| online.contains(id)).collect();
                pack(Command::CheckOnline, &CheckOnlineResp { uniq_ids })
            }
            Command::ConnInfo => {
                let req = ConnInfoReq::decode(body).ok()?;
                let online = self.online.lock();
                let items = req
                    .uniq_ids
                    .into_iter()
                    .filter(|id| online.contains(id))
                    .map(|id| {
                        let item = ConnInfoRespItem {
                            topics: Vec::new(),
                            session: format!("session-{id}"),
                        };
                        (id, item)
                    })
                    .collect();
                pack(Command::ConnInfo, &ConnInfoResp { items })
            }
            Command::UniqIdList => {
                let mut uniq_ids: Vec<String> = self.online.lock().iter().cloned().collect();
                uniq_ids.sort();
                pack(Command::UniqIdList, &UniqIdListResp { server_id, uniq_ids })
            }
            Command::UniqIdCount => {
                let count = self.online.lock().len() as i32;
                pack(Command::UniqIdCount, &UniqIdCountResp { server_id, count })
            }
            Command::TopicCount => {
                let count = self.topics.lock().len() as i32;
                pack(Command::TopicCount, &TopicCountResp { server_id, count })
            }
            Command::TopicList => {
                let mut topics: Vec<String> = self.topics.lock().keys().cloned().collect();
                topics.sort();
                pack(Command::TopicList, &TopicListResp { server_id, topics })
            }
            Command::TopicUniqIdList => {
                let req = TopicUniqIdListReq::decode(body).ok()?;
                let topics = self.topics.lock();
                let items = req
                    .topics
                    .into_iter()
                    .filter_map(|t| {
                        let uniq_ids = topics.get(&t)?.clone();
                        Some((t, TopicUniqIdListRespItem { uniq_ids }))
                    })
                    .collect();
                pack(Command::TopicUniqIdList, &TopicUniqIdListResp { server_id, items })
            }
            Command::TopicUniqIdCount => {
                let req = TopicUniqIdCountReq::decode(body).ok()?;
                let topics = self.topics.lock();
                let items = if req.count_all {
                    topics.iter().map(|(t, ids)| (t.clone(), ids.len() as i32)).collect()
                } else {
                    req.topics
                        .into_iter()
                        .filter_map(|t| {
                            let n = topics.get(&t)?.len() as i32;
                            Some((t, n))
                        })
                        .collect()
                };
                pack(Command::TopicUniqIdCount, &TopicUniqIdCountResp { server_id, items })
            }
            Command::Metrics => {
                let item = MetricsRespItem {
                    count: i64::from(server_id),
                    ..MetricsRespItem::default()
                };
                let items = HashMap::from([("customerConnOpen".to_string(), item)]);
                pack(Command::Metrics, &MetricsResp { server_id, items })
            }
            Command::Limit => {
                let items = vec![LimitRespItem {
                    name: "transfer".into(),
                    worker_ids: vec![1],
                    concurrency: 10,
                }];
                pack(Command::Limit, &LimitResp { server_id, items })
            }
            Command::ConnOpenCustomUniqIdToken => {
                let resp = ConnOpenCustomUniqIdTokenResp {
                    uniq_id: format!("{server_id:02x}custom"),
                    token: "token".into(),
                };
                pack(Command::ConnOpenCustomUniqIdToken, &resp)
            }
            _ => return None,
        };

        Some(reply)
    }
}
