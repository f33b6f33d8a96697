//! Stage types: one observed lifecycle event of a request attempt.
//!
//! A [`Stage`] is built from a strongly typed [`StagePayload`] and flattened into a
//! generic [`StageRecord`] (name, time, values map) when it leaves the process.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// The fixed set of lifecycle points a request passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    GetConn,
    GotConn,
    PutIdleConn,
    GotFirstResponseByte,
    Got100Continue,
    Got1xxResponse,
    #[serde(rename = "DNSStart")]
    DnsStart,
    #[serde(rename = "DNSDone")]
    DnsDone,
    ConnectStart,
    ConnectDone,
    #[serde(rename = "TLSHandshakeStart")]
    TlsHandshakeStart,
    #[serde(rename = "TLSHandshakeDone")]
    TlsHandshakeDone,
    WriteHeaderField,
    WriteHeaders,
    Wait100Continue,
    WroteRequest,
}

impl StageKind {
    pub const ALL: [StageKind; 16] = [
        StageKind::GetConn,
        StageKind::GotConn,
        StageKind::PutIdleConn,
        StageKind::GotFirstResponseByte,
        StageKind::Got100Continue,
        StageKind::Got1xxResponse,
        StageKind::DnsStart,
        StageKind::DnsDone,
        StageKind::ConnectStart,
        StageKind::ConnectDone,
        StageKind::TlsHandshakeStart,
        StageKind::TlsHandshakeDone,
        StageKind::WriteHeaderField,
        StageKind::WriteHeaders,
        StageKind::Wait100Continue,
        StageKind::WroteRequest,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetConn => "GetConn",
            Self::GotConn => "GotConn",
            Self::PutIdleConn => "PutIdleConn",
            Self::GotFirstResponseByte => "GotFirstResponseByte",
            Self::Got100Continue => "Got100Continue",
            Self::Got1xxResponse => "Got1xxResponse",
            Self::DnsStart => "DNSStart",
            Self::DnsDone => "DNSDone",
            Self::ConnectStart => "ConnectStart",
            Self::ConnectDone => "ConnectDone",
            Self::TlsHandshakeStart => "TLSHandshakeStart",
            Self::TlsHandshakeDone => "TLSHandshakeDone",
            Self::WriteHeaderField => "WriteHeaderField",
            Self::WriteHeaders => "WriteHeaders",
            Self::Wait100Continue => "Wait100Continue",
            Self::WroteRequest => "WroteRequest",
        }
    }

    /// Look a kind up by its stage name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata about the connection handed to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnInfo {
    /// Connection came out of the idle pool
    pub reused: bool,
    /// Connection was sitting idle before this request
    pub was_idle: bool,
    /// How long it sat idle
    pub idle_time: Duration,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    /// TLS is layered on the socket
    pub tls: bool,
    /// Socket goes to a proxy rather than the origin
    pub proxied: bool,
}

impl ConnInfo {
    /// Info for a freshly dialed connection.
    pub fn fresh(local_addr: Option<SocketAddr>, remote_addr: Option<SocketAddr>, tls: bool, proxied: bool) -> Self {
        Self {
            reused: false,
            was_idle: false,
            idle_time: Duration::ZERO,
            local_addr,
            remote_addr,
            tls,
            proxied,
        }
    }
}

/// Negotiated TLS session parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsState {
    pub version: Option<String>,
    pub cipher_suite: Option<String>,
    pub negotiated_protocol: Option<String>,
    pub server_name: String,
    pub did_resume: bool,
    pub handshake_complete: bool,
    /// SHA-256 fingerprints (hex) of the presented chain, leaf first
    pub peer_certificates: Vec<String>,
}

/// Event-specific payload, one variant per [`StageKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum StagePayload {
    GetConn { host_port: String },
    GotConn(ConnInfo),
    PutIdleConn { error: Option<String> },
    GotFirstResponseByte,
    Got100Continue,
    Got1xxResponse { code: u16, header: BTreeMap<String, Vec<String>> },
    DnsStart { host: String },
    DnsDone { addrs: Vec<IpAddr>, error: Option<String> },
    ConnectStart { network: String, addr: String },
    ConnectDone { network: String, addr: String, error: Option<String> },
    TlsHandshakeStart,
    TlsHandshakeDone { state: Option<TlsState>, error: Option<String> },
    WriteHeaderField { key: String, value: Vec<String> },
    WriteHeaders,
    Wait100Continue,
    WroteRequest { error: Option<String> },
}

impl StagePayload {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::GetConn { .. } => StageKind::GetConn,
            Self::GotConn(_) => StageKind::GotConn,
            Self::PutIdleConn { .. } => StageKind::PutIdleConn,
            Self::GotFirstResponseByte => StageKind::GotFirstResponseByte,
            Self::Got100Continue => StageKind::Got100Continue,
            Self::Got1xxResponse { .. } => StageKind::Got1xxResponse,
            Self::DnsStart { .. } => StageKind::DnsStart,
            Self::DnsDone { .. } => StageKind::DnsDone,
            Self::ConnectStart { .. } => StageKind::ConnectStart,
            Self::ConnectDone { .. } => StageKind::ConnectDone,
            Self::TlsHandshakeStart => StageKind::TlsHandshakeStart,
            Self::TlsHandshakeDone { .. } => StageKind::TlsHandshakeDone,
            Self::WriteHeaderField { .. } => StageKind::WriteHeaderField,
            Self::WriteHeaders => StageKind::WriteHeaders,
            Self::Wait100Continue => StageKind::Wait100Continue,
            Self::WroteRequest { .. } => StageKind::WroteRequest,
        }
    }

    /// Flatten into the field-name to value mapping used by sinks.
    pub fn values(&self) -> Map<String, Value> {
        let value = match self {
            Self::GetConn { host_port } => json!({ "host_port": host_port }),
            Self::GotConn(info) => json!({
                "reused": info.reused,
                "was_idle": info.was_idle,
                "idle_time_ms": u64::try_from(info.idle_time.as_millis()).unwrap_or(u64::MAX),
                "local_addr": info.local_addr.map(|addr| addr.to_string()),
                "remote_addr": info.remote_addr.map(|addr| addr.to_string()),
                "tls": info.tls,
                "proxied": info.proxied,
            }),
            Self::PutIdleConn { error } | Self::WroteRequest { error } => json!({ "error": error }),
            Self::Got1xxResponse { code, header } => json!({ "code": code, "header": header }),
            Self::DnsStart { host } => json!({ "host": host }),
            Self::DnsDone { addrs, error } => json!({
                "addrs": addrs.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "error": error,
            }),
            Self::ConnectStart { network, addr } => json!({ "network": network, "addr": addr }),
            Self::ConnectDone { network, addr, error } => json!({
                "network": network,
                "addr": addr,
                "error": error,
            }),
            Self::TlsHandshakeDone { state, error } => json!({ "state": state, "error": error }),
            Self::WriteHeaderField { key, value } => json!({ "key": key, "value": value }),
            Self::GotFirstResponseByte
            | Self::Got100Continue
            | Self::TlsHandshakeStart
            | Self::WriteHeaders
            | Self::Wait100Continue => Value::Object(Map::new()),
        };

        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// One timestamped lifecycle event. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    timestamp: DateTime<Utc>,
    payload: StagePayload,
}

impl Stage {
    /// Build a stage stamped with the current wall-clock time.
    pub fn new(payload: StagePayload) -> Self {
        Self::at(payload, Utc::now())
    }

    pub fn at(payload: StagePayload, timestamp: DateTime<Utc>) -> Self {
        Self { timestamp, payload }
    }

    pub fn kind(&self) -> StageKind {
        self.payload.kind()
    }

    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &StagePayload {
        &self.payload
    }

    pub fn values(&self) -> Map<String, Value> {
        self.payload.values()
    }

    pub fn to_record(&self) -> StageRecord {
        StageRecord {
            name: self.name().to_string(),
            time: self.timestamp,
            values: self.values(),
        }
    }

    pub(crate) fn restamped(self, timestamp: DateTime<Utc>) -> Self {
        Self { timestamp, ..self }
    }
}

/// Generic, serializable form of a [`Stage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub values: Map<String, Value>,
}

impl StageRecord {
    pub fn kind(&self) -> Option<StageKind> {
        StageKind::parse(&self.name)
    }
}
