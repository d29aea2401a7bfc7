// src/nats/memory.rs
//! In-process transport used by tests and by embedders that want to observe
//! the exact frames the client writes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::transport::{Channel, ChannelEvent, Connector, FrameSink};
use crate::error::TransportError;

#[derive(Default)]
struct MemoryState {
    reachable: HashSet<String>,
    attempts: Vec<String>,
    peers: Vec<MemoryPeer>,
}

/// Connector whose reachability is toggled per URL.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector that accepts the given URLs.
    pub fn reachable<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let c = Self::new();
        for u in urls {
            c.set_reachable(u, true);
        }
        c
    }

    pub fn set_reachable(&self, url: impl Into<String>, reachable: bool) {
        let mut st = self.lock();
        let url = url.into();
        if reachable {
            st.reachable.insert(url);
        } else {
            st.reachable.remove(&url);
        }
    }

    /// Every URL `open` was called with, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.lock().attempts.clone()
    }

    /// Peer side of every channel opened so far.
    pub fn peers(&self) -> Vec<MemoryPeer> {
        self.lock().peers.clone()
    }

    pub fn last_peer(&self) -> Option<MemoryPeer> {
        self.lock().peers.last().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-update; the data is still usable.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<Channel, TransportError> {
        let mut st = self.lock();
        st.attempts.push(url.to_string());
        if !st.reachable.contains(url) {
            return Err(TransportError::Connect {
                url: url.to_string(),
                reason: "unreachable".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.to_string(),
            sent: Arc::new(Mutex::new(Vec::new())),
            closed_with: Arc::new(Mutex::new(None)),
            events: tx,
        };
        st.peers.push(peer.clone());

        Ok(Channel {
            url: url.to_string(),
            sink: Box::new(MemorySink { peer }),
            events: rx,
        })
    }
}

/// Server side of an in-memory channel.
#[derive(Clone)]
pub struct MemoryPeer {
    pub url: String,
    sent: Arc<Mutex<Vec<String>>>,
    closed_with: Arc<Mutex<Option<u16>>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl MemoryPeer {
    /// Frames the client wrote, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Close code the client used when it closed this channel, if it did.
    pub fn closed_with(&self) -> Option<u16> {
        *self.closed_with.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Deliver a server message to the client.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.events.send(ChannelEvent::Text(text.into()));
    }

    /// Simulate the server (or network) closing the channel.
    pub fn drop_connection(&self, code: Option<u16>) {
        let _ = self.events.send(ChannelEvent::Closed { code });
    }
}

struct MemorySink {
    peer: MemoryPeer,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.peer.closed_with().is_some() {
            return Err(TransportError::Closed);
        }
        self.peer
            .sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(text);
        Ok(())
    }

    async fn close(&mut self, code: u16, _reason: &str) -> Result<(), TransportError> {
        *self
            .peer
            .closed_with
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(code);
        Ok(())
    }
}
