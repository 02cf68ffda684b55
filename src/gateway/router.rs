use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use prost::Message;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::main_connection::decode_reply;
use super::main_manager::MainConnectionManager;
use super::pool_manager::TaskPoolManager;
use super::resolver::ServerIdResolver;
use crate::config::ServerId;
use crate::errors::NetbusError;
use crate::net::Connection;
use crate::wire::messages::{
    Broadcast, CheckOnlineReq, CheckOnlineResp, ConnInfoDelete, ConnInfoReq, ConnInfoResp,
    ConnInfoRespItem, ConnInfoUpdate, ConnOpenCustomUniqIdTokenResp, ForceOffline,
    ForceOfflineGuest, LimitReq, LimitResp, MetricsResp, MetricsRespItem, Multicast, SingleCast,
    SingleCastBulk, TopicCountResp, TopicDelete, TopicListResp, TopicPublish, TopicPublishBulk,
    TopicSubscribe, TopicUniqIdCountReq, TopicUniqIdCountResp, TopicUniqIdListReq,
    TopicUniqIdListResp, TopicUnsubscribe, UniqIdCountResp, UniqIdListResp,
};
use crate::wire::{Command, pack, pack_empty};

type ShardResult = (ServerId, Result<Option<Bytes>, NetbusError>);

// -----------------------------------------------------------------------------
// ----- Result types ----------------------------------------------------------

/// A per-gateway counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerCount {
    pub server_id: ServerId,
    pub count: i32,
}

impl ServerCount {
    pub fn total(counts: &[ServerCount]) -> i64 {
        counts.iter().map(|c| i64::from(c.count)).sum()
    }
}

/// One metric item of one gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerMetric {
    pub server_id: ServerId,
    pub item: String,
    pub metric: MetricsRespItem,
}

// -----------------------------------------------------------------------------
// ----- GatewayRouter ---------------------------------------------------------

/// Routes business requests to the gateways.
///
/// Fire-and-forget commands prefer the main connection of the target gateway
/// and fall back to a pooled task connection; request/response commands
/// always use a pooled connection. Commands about several uniqIds are split
/// per owning gateway and sent concurrently. With a single gateway the
/// resolver is skipped.
#[derive(Clone)]
pub struct GatewayRouter {
    mains: Arc<MainConnectionManager>,
    pools: Arc<TaskPoolManager>,
    resolver: Arc<dyn ServerIdResolver>,
}

// -----------------------------------------------------------------------------
// ----- GatewayRouter: Static -------------------------------------------------

impl GatewayRouter {
    pub fn new(
        mains: Arc<MainConnectionManager>,
        pools: Arc<TaskPoolManager>,
        resolver: Arc<dyn ServerIdResolver>,
    ) -> Self {
        Self {
            mains,
            pools,
            resolver,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayRouter: Fire-and-forget ----------------------------------------

impl GatewayRouter {
    pub async fn conn_info_update(&self, req: ConnInfoUpdate) -> Result<(), NetbusError> {
        let Some(server_id) = self.route_one(&req.uniq_id) else {
            return Ok(());
        };
        self.send_one(server_id, Command::ConnInfoUpdate, pack(Command::ConnInfoUpdate, &req))
            .await
    }

    pub async fn conn_info_delete(&self, req: ConnInfoDelete) -> Result<(), NetbusError> {
        let Some(server_id) = self.route_one(&req.uniq_id) else {
            return Ok(());
        };
        self.send_one(server_id, Command::ConnInfoDelete, pack(Command::ConnInfoDelete, &req))
            .await
    }

    pub async fn broadcast(&self, data: impl Into<Vec<u8>>) -> Result<(), NetbusError> {
        let req = Broadcast { data: data.into() };
        self.send_all(Command::Broadcast, pack(Command::Broadcast, &req))
            .await
    }

    pub async fn multicast(
        &self,
        uniq_ids: Vec<String>,
        data: impl Into<Vec<u8>>,
    ) -> Result<(), NetbusError> {
        let data = data.into();
        let shards = self
            .partition(uniq_ids, |id| id.as_str())
            .into_iter()
            .map(|(server_id, uniq_ids)| {
                let req = Multicast {
                    uniq_ids,
                    data: data.clone(),
                };
                (server_id, pack(Command::Multicast, &req))
            })
            .collect();
        self.send_sharded(Command::Multicast, shards).await
    }

    pub async fn single_cast(
        &self,
        uniq_id: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Result<(), NetbusError> {
        let req = SingleCast {
            uniq_id: uniq_id.into(),
            data: data.into(),
        };
        let Some(server_id) = self.route_one(&req.uniq_id) else {
            return Ok(());
        };
        self.send_one(server_id, Command::SingleCast, pack(Command::SingleCast, &req))
            .await
    }

    /// Each uniqId gets its own payload; every gateway only receives the
    /// pairs it owns.
    pub async fn single_cast_bulk(
        &self,
        pairs: Vec<(String, Vec<u8>)>,
    ) -> Result<(), NetbusError> {
        let shards = self
            .partition(pairs, |(id, _)| id.as_str())
            .into_iter()
            .map(|(server_id, pairs)| {
                let (uniq_ids, data) = pairs.into_iter().unzip();
                let req = SingleCastBulk { uniq_ids, data };
                (server_id, pack(Command::SingleCastBulk, &req))
            })
            .collect();
        self.send_sharded(Command::SingleCastBulk, shards).await
    }

    pub async fn topic_subscribe(&self, req: TopicSubscribe) -> Result<(), NetbusError> {
        let Some(server_id) = self.route_one(&req.uniq_id) else {
            return Ok(());
        };
        self.send_one(server_id, Command::TopicSubscribe, pack(Command::TopicSubscribe, &req))
            .await
    }

    pub async fn topic_unsubscribe(&self, req: TopicUnsubscribe) -> Result<(), NetbusError> {
        let Some(server_id) = self.route_one(&req.uniq_id) else {
            return Ok(());
        };
        let payload = pack(Command::TopicUnsubscribe, &req);
        self.send_one(server_id, Command::TopicUnsubscribe, payload)
            .await
    }

    pub async fn topic_delete(&self, req: TopicDelete) -> Result<(), NetbusError> {
        self.send_all(Command::TopicDelete, pack(Command::TopicDelete, &req))
            .await
    }

    pub async fn topic_publish(&self, req: TopicPublish) -> Result<(), NetbusError> {
        self.send_all(Command::TopicPublish, pack(Command::TopicPublish, &req))
            .await
    }

    pub async fn topic_publish_bulk(&self, req: TopicPublishBulk) -> Result<(), NetbusError> {
        self.send_all(Command::TopicPublishBulk, pack(Command::TopicPublishBulk, &req))
            .await
    }

    pub async fn force_offline(
        &self,
        uniq_ids: Vec<String>,
        data: impl Into<Vec<u8>>,
    ) -> Result<(), NetbusError> {
        let data = data.into();
        let shards = self
            .partition(uniq_ids, |id| id.as_str())
            .into_iter()
            .map(|(server_id, uniq_ids)| {
                let req = ForceOffline {
                    uniq_ids,
                    data: data.clone(),
                };
                (server_id, pack(Command::ForceOffline, &req))
            })
            .collect();
        self.send_sharded(Command::ForceOffline, shards).await
    }

    /// Only affects connections that never logged in. `delay` is in seconds.
    pub async fn force_offline_guest(
        &self,
        uniq_ids: Vec<String>,
        data: impl Into<Vec<u8>>,
        delay: i32,
    ) -> Result<(), NetbusError> {
        let data = data.into();
        let shards = self
            .partition(uniq_ids, |id| id.as_str())
            .into_iter()
            .map(|(server_id, uniq_ids)| {
                let req = ForceOfflineGuest {
                    uniq_ids,
                    data: data.clone(),
                    delay,
                };
                (server_id, pack(Command::ForceOfflineGuest, &req))
            })
            .collect();
        self.send_sharded(Command::ForceOfflineGuest, shards).await
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayRouter: Request/response ---------------------------------------

impl GatewayRouter {
    /// `None` when no gateway with `server_id` is configured.
    pub async fn conn_open_custom_uniq_id_token(
        &self,
        server_id: ServerId,
    ) -> Result<Option<ConnOpenCustomUniqIdTokenResp>, NetbusError> {
        let command = Command::ConnOpenCustomUniqIdToken;
        match self.request_one(server_id, command, pack_empty(command)).await? {
            Some(reply) => decode_reply(command, &reply).map(Some),
            None => Ok(None),
        }
    }

    /// The subset of `uniq_ids` that is currently online.
    pub async fn check_online(&self, uniq_ids: Vec<String>) -> Result<Vec<String>, NetbusError> {
        let command = Command::CheckOnline;
        let shards = self
            .partition(uniq_ids, |id| id.as_str())
            .into_iter()
            .map(|(server_id, uniq_ids)| (server_id, pack(command, &CheckOnlineReq { uniq_ids })))
            .collect();

        let replies: Vec<CheckOnlineResp> = decode_all(command, self.fan_out(command, shards).await?)?;
        Ok(replies.into_iter().flat_map(|r| r.uniq_ids).collect())
    }

    pub async fn conn_info(
        &self,
        uniq_ids: Vec<String>,
    ) -> Result<HashMap<String, ConnInfoRespItem>, NetbusError> {
        let command = Command::ConnInfo;
        let shards = self
            .partition(uniq_ids, |id| id.as_str())
            .into_iter()
            .map(|(server_id, uniq_ids)| (server_id, pack(command, &ConnInfoReq { uniq_ids })))
            .collect();

        let replies: Vec<ConnInfoResp> = decode_all(command, self.fan_out(command, shards).await?)?;
        Ok(replies.into_iter().flat_map(|r| r.items).collect())
    }

    pub async fn uniq_id_list(&self) -> Result<Vec<UniqIdListResp>, NetbusError> {
        let command = Command::UniqIdList;
        decode_all(command, self.request_all(command, pack_empty(command)).await?)
    }

    pub async fn topic_list(&self) -> Result<Vec<TopicListResp>, NetbusError> {
        let command = Command::TopicList;
        decode_all(command, self.request_all(command, pack_empty(command)).await?)
    }

    pub async fn uniq_id_count(&self) -> Result<Vec<ServerCount>, NetbusError> {
        let command = Command::UniqIdCount;
        let replies: Vec<UniqIdCountResp> =
            decode_all(command, self.request_all(command, pack_empty(command)).await?)?;
        Ok(replies
            .into_iter()
            .map(|r| ServerCount {
                server_id: r.server_id,
                count: r.count,
            })
            .collect())
    }

    pub async fn topic_count(&self) -> Result<Vec<ServerCount>, NetbusError> {
        let command = Command::TopicCount;
        let replies: Vec<TopicCountResp> =
            decode_all(command, self.request_all(command, pack_empty(command)).await?)?;
        Ok(replies
            .into_iter()
            .map(|r| ServerCount {
                server_id: r.server_id,
                count: r.count,
            })
            .collect())
    }

    /// Subscribers per topic across every gateway.
    pub async fn topic_uniq_id_list(
        &self,
        topics: Vec<String>,
    ) -> Result<HashMap<String, Vec<String>>, NetbusError> {
        let command = Command::TopicUniqIdList;
        let payload = pack(command, &TopicUniqIdListReq { topics });
        let replies: Vec<TopicUniqIdListResp> =
            decode_all(command, self.request_all(command, payload).await?)?;

        let mut merged: HashMap<String, Vec<String>> = HashMap::new();
        for reply in replies {
            for (topic, item) in reply.items {
                merged.entry(topic).or_default().extend(item.uniq_ids);
            }
        }
        Ok(merged)
    }

    /// Subscriber count per topic, summed over every gateway.
    pub async fn topic_uniq_id_count(
        &self,
        topics: Vec<String>,
        count_all: bool,
    ) -> Result<HashMap<String, i64>, NetbusError> {
        let command = Command::TopicUniqIdCount;
        let payload = pack(command, &TopicUniqIdCountReq { topics, count_all });
        let replies: Vec<TopicUniqIdCountResp> =
            decode_all(command, self.request_all(command, payload).await?)?;

        let mut merged: HashMap<String, i64> = HashMap::new();
        for reply in replies {
            for (topic, count) in reply.items {
                *merged.entry(topic).or_default() += i64::from(count);
            }
        }
        Ok(merged)
    }

    pub async fn metrics(&self) -> Result<Vec<ServerMetric>, NetbusError> {
        let command = Command::Metrics;
        let replies: Vec<MetricsResp> =
            decode_all(command, self.request_all(command, pack_empty(command)).await?)?;

        let mut flat = Vec::new();
        for reply in replies {
            let mut items: Vec<_> = reply.items.into_iter().collect();
            items.sort_by(|a, b| a.0.cmp(&b.0));
            flat.extend(items.into_iter().map(|(item, metric)| ServerMetric {
                server_id: reply.server_id,
                item,
                metric,
            }));
        }
        Ok(flat)
    }

    /// Update and read the gateway's business rate limits. `None` targets
    /// every gateway.
    pub async fn limit(
        &self,
        req: LimitReq,
        server_id: Option<ServerId>,
    ) -> Result<Vec<LimitResp>, NetbusError> {
        let command = Command::Limit;
        let payload = pack(command, &req);

        let replies = match server_id {
            Some(server_id) => self
                .request_one(server_id, command, payload)
                .await?
                .into_iter()
                .collect(),
            None => self.request_all(command, payload).await?,
        };
        decode_all(command, replies)
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayRouter: Routing ------------------------------------------------

impl GatewayRouter {
    /// The only gateway, if exactly one is reachable. Live main connections
    /// decide when there are any, otherwise the configured pools.
    fn single_point(&self) -> Option<ServerId> {
        let mains = self.mains.sockets();
        if !mains.is_empty() {
            return match mains.as_slice() {
                [only] => Some(only.server_id()),
                _ => None,
            };
        }

        if self.pools.count() == 1 {
            return self.pools.server_ids().next();
        }
        None
    }

    fn route_one(&self, uniq_id: &str) -> Option<ServerId> {
        if let Some(server_id) = self.single_point() {
            return Some(server_id);
        }

        let resolved = self.resolver.resolve_one(uniq_id);
        if resolved.is_none() {
            warn!("dropping request for uniqId {uniq_id:?}: owning gateway unknown");
        }
        resolved
    }

    /// Group `items` by the gateway owning their key. Items whose key cannot
    /// be resolved are dropped.
    fn partition<T>(&self, items: Vec<T>, key: impl Fn(&T) -> &str) -> BTreeMap<ServerId, Vec<T>> {
        let mut groups: BTreeMap<ServerId, Vec<T>> = BTreeMap::new();
        if items.is_empty() {
            return groups;
        }

        if let Some(server_id) = self.single_point() {
            groups.insert(server_id, items);
            return groups;
        }

        let keys: Vec<String> = items.iter().map(|item| key(item).to_string()).collect();
        let resolved = self.resolver.resolve_many(&keys);

        for item in items {
            let owner = resolved.get(key(&item)).copied();
            match owner {
                Some(server_id) => groups.entry(server_id).or_default().push(item),
                None => warn!("dropping uniqId {:?}: owning gateway unknown", key(&item)),
            }
        }
        groups
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayRouter: Dispatch -----------------------------------------------

impl GatewayRouter {
    async fn send_one(
        &self,
        server_id: ServerId,
        command: Command,
        payload: Bytes,
    ) -> Result<(), NetbusError> {
        if let Some(main) = self.mains.socket(server_id) {
            if !main.enqueue_send(payload).await {
                warn!("{command} to serverId {server_id} dropped");
            }
            return Ok(());
        }

        let Some(conn) = self.pools.socket(server_id).await? else {
            warn!("{command} dropped: no gateway with serverId {server_id}");
            return Ok(());
        };

        if let Err(e) = conn.send(&payload).await {
            conn.discard().await;
            return Err(e.into());
        }
        debug!("{command} sent to serverId {server_id} over a task connection");
        Ok(())
    }

    async fn send_all(&self, command: Command, payload: Bytes) -> Result<(), NetbusError> {
        let targets: Vec<ServerId> = match self.mains.sockets() {
            mains if !mains.is_empty() => mains.iter().map(|m| m.server_id()).collect(),
            _ => self.pools.server_ids().collect(),
        };

        let shards = targets
            .into_iter()
            .map(|server_id| (server_id, payload.clone()))
            .collect();
        self.send_sharded(command, shards).await
    }

    /// A single target propagates its error. With several targets every
    /// shard is attempted and failures are only logged.
    async fn send_sharded(
        &self,
        command: Command,
        shards: Vec<(ServerId, Bytes)>,
    ) -> Result<(), NetbusError> {
        if let [(server_id, payload)] = shards.as_slice() {
            return self.send_one(*server_id, command, payload.clone()).await;
        }

        let mut sending = JoinSet::new();
        for (server_id, payload) in shards {
            let router = self.clone();
            sending.spawn(async move {
                let result = router.send_one(server_id, command, payload).await;
                (server_id, result)
            });
        }

        while let Some(joined) = sending.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((server_id, Err(e))) => {
                    error!("{command} to serverId {server_id} failed: {e}");
                }
                Err(e) => error!("{command} shard task failed: {e}"),
            }
        }

        Ok(())
    }

    /// `Ok(None)` when no pool owns `server_id`.
    async fn request_one(
        &self,
        server_id: ServerId,
        command: Command,
        payload: Bytes,
    ) -> Result<Option<Bytes>, NetbusError> {
        match self.pools.socket(server_id).await? {
            Some(conn) => conn.call(command, &payload).await.map(Some),
            None => {
                warn!("{command}: no gateway with serverId {server_id}; empty result");
                Ok(None)
            }
        }
    }

    /// One request per shard, concurrently.
    async fn fan_out(
        &self,
        command: Command,
        shards: Vec<(ServerId, Bytes)>,
    ) -> Result<Vec<Bytes>, NetbusError> {
        if let [(server_id, payload)] = shards.as_slice() {
            let reply = self.request_one(*server_id, command, payload.clone()).await?;
            return Ok(reply.into_iter().collect());
        }

        let expected: Vec<ServerId> = shards.iter().map(|(id, _)| *id).collect();
        let (tx, rx) = mpsc::channel(shards.len().max(1));

        for (server_id, payload) in shards {
            let router = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = router.request_one(server_id, command, payload).await;
                let _ = tx.send((server_id, result)).await;
            });
        }
        drop(tx);

        drain(command, rx, &expected).await
    }

    /// The same request to every gateway. Connections are taken from all
    /// pools up front, so either every gateway is asked or none is.
    async fn request_all(&self, command: Command, payload: Bytes) -> Result<Vec<Bytes>, NetbusError> {
        let mut conns = self.pools.sockets().await?;

        if conns.len() == 1
            && let Some(conn) = conns.pop()
        {
            return Ok(vec![conn.call(command, &payload).await?]);
        }

        let expected: Vec<ServerId> = conns.iter().map(|c| c.server_id()).collect();
        let (tx, rx) = mpsc::channel(conns.len().max(1));

        for conn in conns {
            let tx = tx.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                let server_id = conn.server_id();
                let result = conn.call(command, &payload).await.map(Some);
                let _ = tx.send((server_id, result)).await;
            });
        }
        drop(tx);

        drain(command, rx, &expected).await
    }
}

impl std::fmt::Debug for GatewayRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRouter")
            .field("main_connections", &self.mains.count())
            .field("task_pools", &self.pools.count())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

/// Receive exactly one result per expected shard, then report the first
/// failure, if any.
async fn drain(
    command: Command,
    mut rx: mpsc::Receiver<ShardResult>,
    expected: &[ServerId],
) -> Result<Vec<Bytes>, NetbusError> {
    let mut replies = Vec::with_capacity(expected.len());
    let mut answered = HashSet::with_capacity(expected.len());
    let mut first_err = None;

    for _ in 0..expected.len() {
        let Some((server_id, result)) = rx.recv().await else {
            break;
        };
        answered.insert(server_id);

        match result {
            Ok(Some(reply)) => replies.push(reply),
            Ok(None) => {}
            Err(e) => {
                error!("{command} to serverId {server_id} failed: {e}");
                first_err.get_or_insert(e);
            }
        }
    }

    if first_err.is_none()
        && let Some(lost) = expected.iter().find(|id| !answered.contains(*id))
    {
        first_err = Some(NetbusError::ShardLost { server_id: *lost });
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(replies),
    }
}

fn decode_all<M: Message + Default>(
    command: Command,
    replies: Vec<Bytes>,
) -> Result<Vec<M>, NetbusError> {
    replies
        .iter()
        .map(|reply| decode_reply(command, reply))
        .collect()
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
