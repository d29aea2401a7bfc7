// src/nats/mod.rs
//! Publish-only NATS client over a message-oriented transport.

pub mod backoff;
pub mod codec;
pub mod connection;
pub mod memory;
pub mod publisher;
pub mod transport;

pub use backoff::Backoff;
pub use connection::{
    ConnState, ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionStatus,
};
pub use publisher::Publisher;
pub use transport::{Connector, WsConnector};
