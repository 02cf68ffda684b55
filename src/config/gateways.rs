use bytes::Bytes;
use serde::Deserialize;
use std::{collections::HashSet, path::Path, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::fs;

use crate::net::TransportOptions;
use crate::wire::EventMask;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const DEFAULT_HEARTBEAT_MESSAGE: &str = "~6YOt5rW35piO~";
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POOL_MAX_CONNECTIONS: usize = 25;
const DEFAULT_POOL_WAIT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_PROCESS_CMD_GOROUTINE_NUM: u32 = 25;

const INFINITE: &str = "infinite";

/// Unique id of a gateway; every uniqId it hands out is owned by it.
pub type ServerId = u32;

// -----------------------------------------------------------------------------
// ----- GatewayEndpoint -------------------------------------------------------

/// Everything needed to talk to one gateway. Built once, then shared.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEndpoint {
    pub server_id: ServerId,
    pub addr: String,
    pub pool_capacity: usize,
    pub pool_wait_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub send_timeout: Option<Duration>,
    pub receive_timeout: Option<Duration>,
    pub heartbeat_interval: Duration,
    pub heartbeat_payload: Bytes,
    pub events: EventMask,
    pub desired_concurrency: u32,
}

// -----------------------------------------------------------------------------
// ----- GatewayEndpoint: Static -----------------------------------------------

impl GatewayEndpoint {
    /// Endpoint with the stock settings.
    pub fn new(server_id: ServerId, addr: impl Into<String>) -> Self {
        Self {
            server_id,
            addr: addr.into(),
            pool_capacity: DEFAULT_POOL_MAX_CONNECTIONS,
            pool_wait_timeout: Some(DEFAULT_POOL_WAIT_TIMEOUT),
            connect_timeout: Some(DEFAULT_IO_TIMEOUT),
            send_timeout: Some(DEFAULT_IO_TIMEOUT),
            receive_timeout: Some(DEFAULT_IO_TIMEOUT),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_payload: Bytes::from_static(DEFAULT_HEARTBEAT_MESSAGE.as_bytes()),
            events: EventMask::all(),
            desired_concurrency: DEFAULT_PROCESS_CMD_GOROUTINE_NUM,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayEndpoint: Builder ----------------------------------------------

impl GatewayEndpoint {
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_pool_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pool_wait_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, payload: impl Into<Bytes>) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_payload = payload.into();
        self
    }

    pub fn with_events(mut self, events: EventMask) -> Self {
        self.events = events;
        self
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayEndpoint: Public -----------------------------------------------

impl GatewayEndpoint {
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            addr: self.addr.clone(),
            connect_timeout: self.connect_timeout,
            send_timeout: self.send_timeout,
            receive_timeout: self.receive_timeout,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- GatewaysConfig --------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GatewaysConfig {
    endpoints: Vec<Arc<GatewayEndpoint>>,
}

// -----------------------------------------------------------------------------
// ----- GatewaysConfig: Static ------------------------------------------------

impl GatewaysConfig {
    pub async fn from_file(path: &Path) -> Result<GatewaysConfig, GatewaysError> {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|e| GatewaysError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<GatewaysConfig, GatewaysError> {
        let doc: GatewaysFile = toml::from_str(raw).map_err(|e| GatewaysError::Toml { source: e })?;

        if doc.gateways.is_empty() {
            return Err(GatewaysError::NoGateways);
        }

        let mut seen = HashSet::with_capacity(doc.gateways.len());
        let mut endpoints = Vec::with_capacity(doc.gateways.len());

        for entry in doc.gateways {
            if !seen.insert(entry.server_id) {
                return Err(GatewaysError::DuplicateServerId {
                    server_id: entry.server_id,
                });
            }

            let settings = entry.settings.or(&doc.defaults);
            let endpoint = settings.resolve(entry.server_id, entry.addr)?;
            endpoints.push(Arc::new(endpoint));
        }

        Ok(GatewaysConfig { endpoints })
    }
}

// -----------------------------------------------------------------------------
// ----- GatewaysConfig: Public ------------------------------------------------

impl GatewaysConfig {
    pub fn endpoints(&self) -> &[Arc<GatewayEndpoint>] {
        &self.endpoints
    }

    pub fn into_endpoints(self) -> Vec<Arc<GatewayEndpoint>> {
        self.endpoints
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct GatewaysFile {
    #[serde(default)]
    defaults: EndpointSettings,
    #[serde(default)]
    gateways: Vec<GatewayFileEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct GatewayFileEntry {
    server_id: ServerId,
    addr: String,
    #[serde(flatten)]
    settings: EndpointSettings,
}

/// Settings a `[[gateways]]` entry may override from `[defaults]`.
#[derive(Debug, Clone, Default, Deserialize)]
struct EndpointSettings {
    pool_max_connections: Option<usize>,
    pool_wait_timeout: Option<String>,
    connect_timeout: Option<String>,
    send_timeout: Option<String>,
    receive_timeout: Option<String>,
    heartbeat_interval: Option<String>,
    heartbeat_message: Option<String>,
    events: Option<Vec<String>>,
    process_cmd_goroutine_num: Option<u32>,
}

impl EndpointSettings {
    fn or(self, fallback: &EndpointSettings) -> EndpointSettings {
        EndpointSettings {
            pool_max_connections: self.pool_max_connections.or(fallback.pool_max_connections),
            pool_wait_timeout: self.pool_wait_timeout.or_else(|| fallback.pool_wait_timeout.clone()),
            connect_timeout: self.connect_timeout.or_else(|| fallback.connect_timeout.clone()),
            send_timeout: self.send_timeout.or_else(|| fallback.send_timeout.clone()),
            receive_timeout: self.receive_timeout.or_else(|| fallback.receive_timeout.clone()),
            heartbeat_interval: self
                .heartbeat_interval
                .or_else(|| fallback.heartbeat_interval.clone()),
            heartbeat_message: self
                .heartbeat_message
                .or_else(|| fallback.heartbeat_message.clone()),
            events: self.events.or_else(|| fallback.events.clone()),
            process_cmd_goroutine_num: self
                .process_cmd_goroutine_num
                .or(fallback.process_cmd_goroutine_num),
        }
    }

    fn resolve(self, server_id: ServerId, addr: String) -> Result<GatewayEndpoint, GatewaysError> {
        let mut endpoint = GatewayEndpoint::new(server_id, addr);

        if let Some(capacity) = self.pool_max_connections {
            if capacity == 0 {
                return Err(GatewaysError::InvalidValue {
                    key: "pool_max_connections",
                    reason: "must be at least 1".to_string(),
                });
            }
            endpoint.pool_capacity = capacity;
        }

        if let Some(raw) = self.pool_wait_timeout {
            endpoint.pool_wait_timeout = parse_timeout("pool_wait_timeout", &raw)?;
        }
        if let Some(raw) = self.connect_timeout {
            endpoint.connect_timeout = parse_timeout("connect_timeout", &raw)?;
        }
        if let Some(raw) = self.send_timeout {
            endpoint.send_timeout = parse_timeout("send_timeout", &raw)?;
        }
        if let Some(raw) = self.receive_timeout {
            endpoint.receive_timeout = parse_timeout("receive_timeout", &raw)?;
        }

        if let Some(raw) = self.heartbeat_interval {
            let interval = parse_timeout("heartbeat_interval", &raw)?
                .filter(|d| !d.is_zero())
                .ok_or_else(|| GatewaysError::InvalidValue {
                    key: "heartbeat_interval",
                    reason: "must be a finite, non-zero duration".to_string(),
                })?;
            endpoint.heartbeat_interval = interval;
        }

        if let Some(message) = self.heartbeat_message {
            endpoint.heartbeat_payload = Bytes::from(message.into_bytes());
        }

        if let Some(names) = self.events {
            let mut mask = EventMask::empty();
            for name in names {
                mask |= EventMask::parse_name(&name).ok_or(GatewaysError::UnknownEvent { name })?;
            }
            endpoint.events = mask;
        }

        if let Some(n) = self.process_cmd_goroutine_num {
            endpoint.desired_concurrency = n;
        }

        Ok(endpoint)
    }
}

fn parse_timeout(key: &'static str, raw: &str) -> Result<Option<Duration>, GatewaysError> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case(INFINITE) {
        return Ok(None);
    }

    humantime::parse_duration(raw)
        .map(Some)
        .map_err(|source| GatewaysError::InvalidDuration {
            key,
            value: raw.to_string(),
            source,
        })
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GatewaysError {
    #[error("read error for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },

    #[error("no [[gateways]] entries configured")]
    NoGateways,

    #[error("duplicate [[gateways]] entry for serverId {server_id}")]
    DuplicateServerId { server_id: ServerId },

    #[error("invalid duration for {key}: {value:?} ({source})")]
    InvalidDuration {
        key: &'static str,
        value: String,
        source: humantime::DurationError,
    },

    #[error("unknown event {name:?}; expected open, close or message")]
    UnknownEvent { name: String },

    #[error("invalid {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
