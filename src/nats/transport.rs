// src/nats/transport.rs
//! Message-oriented transport seam. The connection state machine only sees a
//! `Connector` that yields `Channel`s; the WebSocket implementation lives here
//! and an in-memory one in `nats::memory`.

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;

/// Normal closure. A close carrying this code never triggers a reconnect.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Inbound events of an open channel. `Closed` is always the last event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Text(String),
    Closed { code: Option<u16> },
}

#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// An open channel: a write half plus a stream of inbound events.
pub struct Channel {
    pub url: String,
    pub sink: Box<dyn FrameSink>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel to `url`. Timeouts are applied by the caller.
    async fn open(&self, url: &str) -> Result<Channel, TransportError>;
}

/// `nats://` and `nats-ws://` are rewritten to `ws://`; everything else is
/// passed through.
pub fn normalize_server_url(server: &str) -> String {
    let s = server.trim();
    if let Some(rest) = s.strip_prefix("nats-ws://") {
        format!("ws://{rest}")
    } else if let Some(rest) = s.strip_prefix("nats://") {
        format!("ws://{rest}")
    } else {
        s.to_string()
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport (`ws://` / `wss://`).
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Channel, TransportError> {
        let (ws, _resp) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let (sink, mut stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let reader_url = url.to_string();

        tokio::spawn(async move {
            let mut close_code = None;
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(t)) => {
                        if tx.send(ChannelEvent::Text(t)).is_err() {
                            return;
                        }
                    }
                    // nats-server's websocket listener sends binary frames
                    Ok(Message::Binary(b)) => {
                        let t = String::from_utf8_lossy(&b).into_owned();
                        if tx.send(ChannelEvent::Text(t)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        close_code = frame.map(|f| u16::from(f.code));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(target: "nats", url = %reader_url, error = %e, "ws read error");
                        break;
                    }
                }
            }
            let _ = tx.send(ChannelEvent::Closed { code: close_code });
        });

        Ok(Channel {
            url: url.to_string(),
            sink: Box::new(WsSink { sink }),
            events: rx,
        })
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}
