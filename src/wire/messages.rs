//! Protobuf bodies carried after the command code.
//!
//! Field tags follow the gateway protocol definitions; adding fields is
//! backwards compatible, renumbering is not.

use prost::Message;
use std::collections::HashMap;

// -----------------------------------------------------------------------------
// ----- Registration ----------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct RegisterReq {
    /// Bit set of `EventMask` values.
    #[prost(uint32, tag = "1")]
    pub events: u32,
    /// How many server-side workers should process this connection.
    #[prost(uint32, tag = "2")]
    pub process_cmd_goroutine_num: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct RegisterResp {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(string, tag = "3")]
    pub conn_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct UnRegisterReq {
    #[prost(string, tag = "1")]
    pub conn_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct UnRegisterResp {}

// -----------------------------------------------------------------------------
// ----- Gateway events --------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct ConnOpen {
    #[prost(string, tag = "1")]
    pub uniq_id: String,
    #[prost(string, tag = "2")]
    pub raw_query: String,
    #[prost(string, repeated, tag = "3")]
    pub sub_protocol: Vec<String>,
    #[prost(string, tag = "4")]
    pub x_forwarded_for: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConnClose {
    #[prost(string, tag = "1")]
    pub uniq_id: String,
    #[prost(string, tag = "2")]
    pub custom_uniq_id: String,
    #[prost(string, repeated, tag = "3")]
    pub topics: Vec<String>,
    #[prost(string, tag = "4")]
    pub session: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Transfer {
    #[prost(string, tag = "1")]
    pub uniq_id: String,
    #[prost(string, tag = "2")]
    pub session: String,
    #[prost(string, repeated, tag = "3")]
    pub topics: Vec<String>,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
}

// -----------------------------------------------------------------------------
// ----- Fire-and-forget -------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct ConnInfoUpdate {
    #[prost(string, tag = "1")]
    pub uniq_id: String,
    #[prost(string, tag = "2")]
    pub new_session: String,
    #[prost(string, repeated, tag = "3")]
    pub new_topics: Vec<String>,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConnInfoDelete {
    #[prost(string, tag = "1")]
    pub uniq_id: String,
    #[prost(bool, tag = "2")]
    pub del_session: bool,
    #[prost(bool, tag = "3")]
    pub del_topic: bool,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Broadcast {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Multicast {
    #[prost(string, repeated, tag = "1")]
    pub uniq_ids: Vec<String>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SingleCast {
    #[prost(string, tag = "1")]
    pub uniq_id: String,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

/// `uniq_ids[i]` receives `data[i]`.
#[derive(Clone, PartialEq, Message)]
pub struct SingleCastBulk {
    #[prost(string, repeated, tag = "1")]
    pub uniq_ids: Vec<String>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub data: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TopicSubscribe {
    #[prost(string, tag = "1")]
    pub uniq_id: String,
    #[prost(string, repeated, tag = "2")]
    pub topics: Vec<String>,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TopicUnsubscribe {
    #[prost(string, tag = "1")]
    pub uniq_id: String,
    #[prost(string, repeated, tag = "2")]
    pub topics: Vec<String>,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TopicDelete {
    #[prost(string, repeated, tag = "1")]
    pub topics: Vec<String>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TopicPublish {
    #[prost(string, repeated, tag = "1")]
    pub topics: Vec<String>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

/// Either one topic for every data item, or `topics[i]` receives `data[i]`.
#[derive(Clone, PartialEq, Message)]
pub struct TopicPublishBulk {
    #[prost(string, repeated, tag = "1")]
    pub topics: Vec<String>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub data: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ForceOffline {
    #[prost(string, repeated, tag = "1")]
    pub uniq_ids: Vec<String>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ForceOfflineGuest {
    #[prost(string, repeated, tag = "1")]
    pub uniq_ids: Vec<String>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    /// Seconds the gateway waits before closing the connection.
    #[prost(int32, tag = "3")]
    pub delay: i32,
}

// -----------------------------------------------------------------------------
// ----- Request / response ----------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct CheckOnlineReq {
    #[prost(string, repeated, tag = "1")]
    pub uniq_ids: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CheckOnlineResp {
    #[prost(string, repeated, tag = "1")]
    pub uniq_ids: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UniqIdListResp {
    #[prost(uint32, tag = "1")]
    pub server_id: u32,
    #[prost(string, repeated, tag = "2")]
    pub uniq_ids: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UniqIdCountResp {
    #[prost(uint32, tag = "1")]
    pub server_id: u32,
    #[prost(int32, tag = "2")]
    pub count: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct TopicCountResp {
    #[prost(uint32, tag = "1")]
    pub server_id: u32,
    #[prost(int32, tag = "2")]
    pub count: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct TopicListResp {
    #[prost(uint32, tag = "1")]
    pub server_id: u32,
    #[prost(string, repeated, tag = "2")]
    pub topics: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TopicUniqIdListReq {
    #[prost(string, repeated, tag = "1")]
    pub topics: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TopicUniqIdListRespItem {
    #[prost(string, repeated, tag = "1")]
    pub uniq_ids: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TopicUniqIdListResp {
    #[prost(uint32, tag = "1")]
    pub server_id: u32,
    #[prost(map = "string, message", tag = "2")]
    pub items: HashMap<String, TopicUniqIdListRespItem>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TopicUniqIdCountReq {
    #[prost(string, repeated, tag = "1")]
    pub topics: Vec<String>,
    #[prost(bool, tag = "2")]
    pub count_all: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct TopicUniqIdCountResp {
    #[prost(uint32, tag = "1")]
    pub server_id: u32,
    #[prost(map = "string, int32", tag = "2")]
    pub items: HashMap<String, i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConnInfoReq {
    #[prost(string, repeated, tag = "1")]
    pub uniq_ids: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConnInfoRespItem {
    #[prost(string, repeated, tag = "1")]
    pub topics: Vec<String>,
    #[prost(string, tag = "2")]
    pub session: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConnInfoResp {
    #[prost(map = "string, message", tag = "1")]
    pub items: HashMap<String, ConnInfoRespItem>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MetricsRespItem {
    #[prost(int64, tag = "1")]
    pub count: i64,
    #[prost(double, tag = "2")]
    pub mean_rate: f64,
    #[prost(double, tag = "3")]
    pub mean_rate_max: f64,
    #[prost(double, tag = "4")]
    pub rate1: f64,
    #[prost(double, tag = "5")]
    pub rate1_max: f64,
    #[prost(double, tag = "6")]
    pub rate5: f64,
    #[prost(double, tag = "7")]
    pub rate5_max: f64,
    #[prost(double, tag = "8")]
    pub rate15: f64,
    #[prost(double, tag = "9")]
    pub rate15_max: f64,
}

#[derive(Clone, PartialEq, Message)]
pub struct MetricsResp {
    #[prost(uint32, tag = "1")]
    pub server_id: u32,
    #[prost(map = "string, message", tag = "2")]
    pub items: HashMap<String, MetricsRespItem>,
}

#[derive(Clone, PartialEq, Message)]
pub struct LimitUpdateItem {
    /// Worker ids sharing this limiter.
    #[prost(int32, repeated, tag = "1")]
    pub worker_ids: Vec<i32>,
    /// Maximum forwards per second for all of `worker_ids` together.
    #[prost(int32, tag = "2")]
    pub concurrency: i32,
}

/// An empty request only reads the current limits.
#[derive(Clone, PartialEq, Message)]
pub struct LimitReq {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<LimitUpdateItem>,
}

#[derive(Clone, PartialEq, Message)]
pub struct LimitRespItem {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, repeated, tag = "2")]
    pub worker_ids: Vec<i32>,
    #[prost(int32, tag = "3")]
    pub concurrency: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct LimitResp {
    #[prost(uint32, tag = "1")]
    pub server_id: u32,
    #[prost(message, repeated, tag = "2")]
    pub items: Vec<LimitRespItem>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConnOpenCustomUniqIdTokenResp {
    #[prost(string, tag = "1")]
    pub uniq_id: String,
    #[prost(string, tag = "2")]
    pub token: String,
}
