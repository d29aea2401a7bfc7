// src/error.rs
//! Domain error types shared by the protocol client, the ingestion loop and the
//! control surface. Store/startup plumbing uses `anyhow` instead.

use thiserror::Error;

/// Failures of the underlying message transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("connect to {url} timed out after {ms}ms")]
    Timeout { url: String, ms: u64 },

    #[error("send failed: {0}")]
    Send(String),

    #[error("channel closed")]
    Closed,
}

/// Malformed inbound frames or unencodable outbound frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,

    #[error("unknown operation: {0}")]
    UnknownOp(String),

    #[error("malformed INFO payload: {0}")]
    MalformedInfo(String),

    #[error("invalid subject: {0:?}")]
    InvalidSubject(String),
}

/// Result of `connect(serverList)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("no servers configured")]
    NoServers,

    #[error("all {} servers unreachable", .0.len())]
    AllServersUnreachable(Vec<TransportError>),

    #[error("connect attempt aborted")]
    Aborted,

    #[error("connection task has shut down")]
    Shutdown,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("payload serialization failed: {0}")]
    Serialize(String),
}

/// Rejected configuration. Raised before anything is persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be within {min}..={max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("natsSubject {0:?} must not contain whitespace")]
    InvalidSubject(String),
}

/// Errors returned by the control surface (`RelayService`).
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("monitoring is disabled")]
    MonitoringDisabled,

    #[error("surface {0:?} is not in the monitored lists")]
    SurfaceNotMonitored(String),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}
