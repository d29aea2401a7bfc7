// src/nats/connection.rs
//! Self-healing NATS connection.
//!
//! The connection is a single task that owns the transport and every piece of
//! connection state. Callers talk to it through a `ConnectionHandle` (commands
//! in, status/events out), so state has exactly one writer.
//!
//! States: `Disconnected` -> `Connecting` -> `Open` -> `Disconnected`.
//! An unexpected close while reconnect is enabled schedules an attempt after
//! `Backoff::delay(attempts)`. When `max_attempts` consecutive attempts fail the
//! task waits for the cool-down, resets `attempts` and starts over, forever,
//! until reconnect is disabled or `disconnect()` is called.
//!
//! A connect attempt runs as its own branch of the task's select loop, so
//! commands are still served while it is in flight: `publish` fails with
//! `NotConnected`, and `disconnect` or `disable_reconnect` drop the attempt.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::codec::{self, ConnectOptions, ServerOp};
use super::publisher::Publisher;
use super::transport::{normalize_server_url, Channel, ChannelEvent, Connector, NORMAL_CLOSURE};
use crate::error::{ConnectError, PublishError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnState {
    Disconnected,
    Connecting,
    Open,
}

/// Snapshot published after every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnState,
    pub connected: bool,
    pub reconnecting: bool,
    pub attempts: u32,
    pub max_attempts: u32,
    pub should_reconnect: bool,
}

/// Edge-triggered notifications: one `Opened` per transition into `Open`, one
/// `Closed` per transition out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened { url: String },
    Closed { code: Option<u16> },
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub backoff: Backoff,
    pub connect_timeout: Duration,
    pub identity: ConnectOptions,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            connect_timeout: Duration::from_secs(10),
            identity: ConnectOptions::default(),
        }
    }
}

pub(crate) enum Command {
    Connect {
        servers: Vec<String>,
        reply: oneshot::Sender<Result<String, ConnectError>>,
    },
    Publish {
        subject: String,
        payload: String,
        reply: oneshot::Sender<Result<(), PublishError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    SetReconnect(bool),
    RequestReconnect,
}

/// Owner-side handle. Held by exactly one orchestrator; hand out `Publisher`s
/// to code that only needs to publish.
pub struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionHandle {
    /// Spawn the connection task. It starts `Disconnected`; call `connect`.
    pub fn spawn(connector: Arc<dyn Connector>, cfg: ConnectionConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let initial = ConnectionStatus {
            state: ConnState::Disconnected,
            connected: false,
            reconnecting: false,
            attempts: 0,
            max_attempts: cfg.backoff.max_attempts,
            should_reconnect: true,
        };
        let (status_tx, status_rx) = watch::channel(initial);
        let (events_tx, _) = broadcast::channel(32);

        let driver = Driver {
            connector,
            cfg,
            commands: cmd_rx,
            status_tx,
            events_tx: events_tx.clone(),
            state: ConnState::Disconnected,
            channel: None,
            servers: Vec::new(),
            attempts: 0,
            reconnecting: false,
            should_reconnect: true,
            reconnect_at: None,
            cooldown_at: None,
            attempt: None,
        };
        tokio::spawn(driver.run());

        Self {
            commands: cmd_tx,
            status: status_rx,
            events: events_tx,
        }
    }

    /// Try each server once, in order. Returns the URL that opened.
    pub async fn connect(&self, servers: &[String]) -> Result<String, ConnectError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect {
            servers: servers.to_vec(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ConnectError::Shutdown)?
    }

    /// Idempotent manual disconnect; no reconnect is scheduled afterwards.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Disconnect { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn enable_reconnect(&self) {
        let _ = self.send(Command::SetReconnect(true)).await;
    }

    pub async fn disable_reconnect(&self) {
        let _ = self.send(Command::SetReconnect(false)).await;
    }

    /// Schedule a backoff attempt if not open and reconnect is enabled.
    pub async fn request_reconnect(&self) {
        let _ = self.send(Command::RequestReconnect).await;
    }

    pub async fn publish(&self, subject: &str, payload: String) -> Result<(), PublishError> {
        self.publisher().publish(subject, payload).await
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.commands.clone())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    async fn send(&self, cmd: Command) -> Result<(), ConnectError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| ConnectError::Shutdown)
    }
}

type Opened = Result<(String, Channel), Vec<TransportError>>;

/// Who is waiting on an in-flight attempt.
enum Origin {
    Connect(oneshot::Sender<Result<String, ConnectError>>),
    Reconnect,
}

struct Attempt {
    origin: Origin,
    fut: Pin<Box<dyn Future<Output = Opened> + Send>>,
}

enum Step {
    Command(Command),
    Channel(ChannelEvent),
    Attempt(Opened),
    ReconnectDue,
    CooldownDone,
    Shutdown,
}

struct Driver {
    connector: Arc<dyn Connector>,
    cfg: ConnectionConfig,
    commands: mpsc::Receiver<Command>,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: broadcast::Sender<ConnectionEvent>,

    state: ConnState,
    channel: Option<Channel>,
    servers: Vec<String>,
    attempts: u32,
    reconnecting: bool,
    should_reconnect: bool,
    reconnect_at: Option<Instant>,
    cooldown_at: Option<Instant>,
    attempt: Option<Attempt>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(c) => Step::Command(c),
                    None => Step::Shutdown,
                },
                ev = next_event(&mut self.channel) => Step::Channel(ev),
                res = next_attempt(&mut self.attempt) => Step::Attempt(res),
                _ = wait_until(self.reconnect_at) => Step::ReconnectDue,
                _ = wait_until(self.cooldown_at) => Step::CooldownDone,
            };

            match step {
                Step::Command(cmd) => self.on_command(cmd).await,
                Step::Channel(ev) => self.on_channel_event(ev).await,
                Step::Attempt(res) => self.on_attempt_done(res),
                Step::ReconnectDue => self.on_reconnect_due(),
                Step::CooldownDone => self.on_cooldown_done(),
                Step::Shutdown => {
                    self.abort_attempt("shutdown");
                    self.close_channel("shutdown").await;
                    debug!(target: "nats", "connection task stopped");
                    return;
                }
            }
            self.publish_status();
        }
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { servers, reply } => {
                self.should_reconnect = true;
                self.servers = servers;
                self.cancel_timers();
                self.abort_attempt("superseded by a new connect");
                self.close_channel("reconnecting with new server list").await;
                self.start_attempt(Origin::Connect(reply));
            }
            Command::Publish {
                subject,
                payload,
                reply,
            } => {
                let _ = reply.send(self.publish(&subject, &payload).await);
            }
            Command::Disconnect { reply } => {
                self.should_reconnect = false;
                self.cancel_timers();
                self.abort_attempt("manual disconnect");
                self.close_channel("manual disconnect").await;
                self.attempts = 0;
                info!(target: "nats", "disconnected manually");
                self.publish_status();
                let _ = reply.send(());
            }
            Command::SetReconnect(true) => {
                self.should_reconnect = true;
                debug!(target: "nats", "auto-reconnect enabled");
            }
            Command::SetReconnect(false) => {
                self.should_reconnect = false;
                self.cancel_timers();
                self.abort_attempt("auto-reconnect disabled");
                debug!(target: "nats", "auto-reconnect disabled");
            }
            Command::RequestReconnect => {
                if self.state != ConnState::Open && self.attempt.is_none() {
                    self.schedule_reconnect();
                }
            }
        }
    }

    async fn on_channel_event(&mut self, ev: ChannelEvent) {
        match ev {
            ChannelEvent::Text(text) => {
                for op in codec::decode(&text) {
                    match op {
                        Ok(ServerOp::Ping) => {
                            if let Some(ch) = self.channel.as_mut() {
                                if let Err(e) = ch.sink.send_text(codec::encode_pong()).await {
                                    warn!(target: "nats", error = %e, "failed to answer PING");
                                }
                            }
                        }
                        Ok(ServerOp::Info(info)) => {
                            debug!(target: "nats", server_id = ?info.get("server_id"), "INFO received");
                        }
                        Ok(ServerOp::Err(msg)) => {
                            warn!(target: "nats", %msg, "server reported -ERR");
                        }
                        Ok(ServerOp::Pong) | Ok(ServerOp::Ok) => {}
                        Err(e) => {
                            warn!(target: "nats", error = %e, "protocol error; frame dropped");
                        }
                    }
                }
            }
            ChannelEvent::Closed { code } => {
                let url = self.channel.take().map(|c| c.url).unwrap_or_default();
                self.leave_open(code);
                info!(target: "nats", %url, ?code, "connection closed");
                if self.should_reconnect && code != Some(NORMAL_CLOSURE) {
                    self.schedule_reconnect();
                }
            }
        }
    }

    fn on_reconnect_due(&mut self) {
        self.reconnect_at = None;
        if !self.should_reconnect {
            self.reconnecting = false;
            return;
        }
        self.start_attempt(Origin::Reconnect);
    }

    fn on_attempt_done(&mut self, res: Opened) {
        // the finished future must not be polled again
        let Some(attempt) = self.attempt.take() else {
            return;
        };
        match res {
            Ok((url, channel)) => {
                self.channel = Some(channel);
                self.state = ConnState::Open;
                self.attempts = 0;
                self.reconnecting = false;
                gauge!("relay_connected").set(1.0);
                let _ = self.events_tx.send(ConnectionEvent::Opened { url: url.clone() });
                info!(target: "nats", %url, "connection open");
                self.publish_status();
                match attempt.origin {
                    Origin::Connect(reply) => {
                        let _ = reply.send(Ok(url));
                    }
                    Origin::Reconnect => info!(target: "nats", %url, "reconnected"),
                }
            }
            Err(failures) => {
                self.state = ConnState::Disconnected;
                self.attempt_failed(attempt.origin, ConnectError::AllServersUnreachable(failures));
            }
        }
    }

    fn attempt_failed(&mut self, origin: Origin, err: ConnectError) {
        match origin {
            Origin::Connect(reply) => {
                self.publish_status();
                let _ = reply.send(Err(err));
            }
            Origin::Reconnect => {
                warn!(target: "nats", error = %err, attempt = self.attempts, "reconnect failed");
                self.reconnecting = false;
                if self.cfg.backoff.exhausted(self.attempts) {
                    warn!(
                        target: "nats",
                        max_attempts = self.cfg.backoff.max_attempts,
                        cooldown_ms = self.cfg.backoff.cooldown.as_millis() as u64,
                        "reconnect attempts exhausted; cooling down"
                    );
                    self.cooldown_at = Some(Instant::now() + self.cfg.backoff.cooldown);
                } else {
                    self.schedule_reconnect();
                }
            }
        }
    }

    fn on_cooldown_done(&mut self) {
        self.cooldown_at = None;
        if self.should_reconnect && self.state != ConnState::Open {
            info!(target: "nats", "cool-down over; restarting reconnect cycle");
            self.attempts = 0;
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        if !self.should_reconnect || self.reconnecting {
            return;
        }
        self.reconnecting = true;
        self.attempts += 1;
        let delay = self.cfg.backoff.delay(self.attempts);
        self.reconnect_at = Some(Instant::now() + delay);
        counter!("relay_reconnect_scheduled_total").increment(1);
        info!(
            target: "nats",
            delay_ms = delay.as_millis() as u64,
            attempt = self.attempts,
            max_attempts = self.cfg.backoff.max_attempts,
            "reconnect scheduled"
        );
    }

    fn cancel_timers(&mut self) {
        self.reconnect_at = None;
        self.cooldown_at = None;
        self.reconnecting = false;
    }

    /// Start one pass over the server list. The outcome arrives as
    /// `Step::Attempt`.
    fn start_attempt(&mut self, origin: Origin) {
        if self.servers.is_empty() {
            self.attempt_failed(origin, ConnectError::NoServers);
            return;
        }
        self.state = ConnState::Connecting;
        let fut = open_first(
            self.connector.clone(),
            self.servers.clone(),
            self.cfg.connect_timeout,
            codec::encode_connect(&self.cfg.identity),
        );
        self.attempt = Some(Attempt {
            origin,
            fut: Box::pin(fut),
        });
    }

    /// Drop the in-flight attempt, if any. A waiting `connect()` gets
    /// `ConnectError::Aborted`.
    fn abort_attempt(&mut self, reason: &'static str) {
        let Some(attempt) = self.attempt.take() else {
            return;
        };
        debug!(target: "nats", %reason, "connect attempt aborted");
        if self.state == ConnState::Connecting {
            self.state = ConnState::Disconnected;
        }
        if let Origin::Connect(reply) = attempt.origin {
            let _ = reply.send(Err(ConnectError::Aborted));
        }
    }

    async fn publish(&mut self, subject: &str, payload: &str) -> Result<(), PublishError> {
        let ch = match (self.state, self.channel.as_mut()) {
            (ConnState::Open, Some(ch)) => ch,
            _ => return Err(PublishError::NotConnected),
        };
        let frame = codec::encode_pub(subject, payload)?;
        ch.sink.send_text(frame).await?;
        debug!(target: "nats", %subject, bytes = payload.len(), "published");
        Ok(())
    }

    /// Close the current channel with normal closure, if any.
    async fn close_channel(&mut self, reason: &str) {
        if let Some(mut ch) = self.channel.take() {
            if let Err(e) = ch.sink.close(NORMAL_CLOSURE, reason).await {
                debug!(target: "nats", error = %e, "close frame not delivered");
            }
        }
        self.leave_open(Some(NORMAL_CLOSURE));
    }

    fn leave_open(&mut self, code: Option<u16>) {
        if self.state == ConnState::Open {
            gauge!("relay_connected").set(0.0);
            let _ = self.events_tx.send(ConnectionEvent::Closed { code });
        }
        self.state = ConnState::Disconnected;
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(ConnectionStatus {
            state: self.state,
            connected: self.state == ConnState::Open,
            reconnecting: self.reconnecting,
            attempts: self.attempts,
            max_attempts: self.cfg.backoff.max_attempts,
            should_reconnect: self.should_reconnect,
        });
    }
}

/// First channel that opens and accepts the handshake wins.
async fn open_first(
    connector: Arc<dyn Connector>,
    servers: Vec<String>,
    connect_timeout: Duration,
    hello: String,
) -> Opened {
    let mut failures = Vec::with_capacity(servers.len());
    for server in &servers {
        let url = normalize_server_url(server);
        debug!(target: "nats", %url, "connecting");

        let opened = match timeout(connect_timeout, connector.open(&url)).await {
            Ok(res) => res,
            Err(_) => Err(TransportError::Timeout {
                url: url.clone(),
                ms: connect_timeout.as_millis() as u64,
            }),
        };

        let mut channel = match opened {
            Ok(ch) => ch,
            Err(e) => {
                warn!(target: "nats", %url, error = %e, "server unreachable");
                failures.push(e);
                continue;
            }
        };

        if let Err(e) = channel.sink.send_text(hello.clone()).await {
            warn!(target: "nats", %url, error = %e, "handshake failed");
            let _ = channel.sink.close(NORMAL_CLOSURE, "handshake failed").await;
            failures.push(e);
            continue;
        }
        return Ok((url, channel));
    }
    Err(failures)
}

async fn next_attempt(attempt: &mut Option<Attempt>) -> Opened {
    match attempt {
        Some(a) => a.fut.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_event(channel: &mut Option<Channel>) -> ChannelEvent {
    match channel {
        Some(ch) => ch
            .events
            .recv()
            .await
            .unwrap_or(ChannelEvent::Closed { code: None }),
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
