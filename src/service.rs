// src/service.rs
//! Relay orchestrator. Owns the one connection of the process and the
//! per-surface monitors, and implements the control-surface operations the
//! HTTP layer exposes.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::store::ConfigStore;
use crate::config::Config;
use crate::envelope::RawItem;
use crate::error::ServiceError;
use crate::ingest::monitor::{MonitorDeps, MonitorSet, MonitorSettings};
use crate::ingest::source::FeedBuffer;
use crate::ingest::{MessageSink, PassReport};
use crate::nats::{ConnectionConfig, ConnectionHandle, Connector};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub enabled: bool,
    pub connected: bool,
    pub reconnecting: bool,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub should_reconnect: bool,
    pub active_surfaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceStatus {
    pub surface: String,
    pub buffered: usize,
    pub last_pass: Option<PassReport>,
}

pub struct RelayService {
    store: Arc<dyn ConfigStore>,
    conn: ConnectionHandle,
    config: RwLock<Config>,
    monitors: Mutex<MonitorSet>,
    // outlives monitors so items pushed before `start_monitoring` are kept
    feeds: Mutex<HashMap<String, FeedBuffer>>,
}

impl RelayService {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        connector: Arc<dyn Connector>,
        conn_cfg: ConnectionConfig,
    ) -> Self {
        Self {
            store,
            conn: ConnectionHandle::spawn(connector, conn_cfg),
            config: RwLock::new(Config::default()),
            monitors: Mutex::new(MonitorSet::new()),
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Load the stored config (or `seed` if nothing was saved yet) and, if it
    /// is enabled, bring the connection up.
    pub async fn bootstrap(&self, seed: Config) -> Result<()> {
        let cfg = match self.store.load_config().await? {
            Some(c) => c.normalized(),
            None => {
                info!("no stored config; using seed");
                seed
            }
        };
        if let Err(e) = cfg.validate() {
            warn!(error = %e, "stored config invalid; falling back to defaults");
            *self.config.write().await = Config::default();
            return Ok(());
        }
        let enabled = cfg.enabled;
        let servers = cfg.nats_servers.clone();
        *self.config.write().await = cfg;
        if enabled {
            self.activate(&servers).await;
        } else {
            self.conn.disable_reconnect().await;
        }
        Ok(())
    }

    pub async fn get_config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Validate, persist, then apply. Nothing is written when validation fails.
    pub async fn save_config(&self, cfg: Config) -> Result<Config, ServiceError> {
        let cfg = cfg.normalized();
        cfg.validate()?;
        self.store.save_config(&cfg).await?;

        let prev = std::mem::replace(&mut *self.config.write().await, cfg.clone());
        info!(enabled = cfg.enabled, subject = %cfg.nats_subject, "config saved");

        if cfg.enabled {
            if !prev.enabled || prev.nats_servers != cfg.nats_servers {
                self.activate(&cfg.nats_servers).await;
            }
            self.reconcile_monitors(&cfg).await;
        } else if prev.enabled {
            self.deactivate().await;
        }
        Ok(cfg)
    }

    pub async fn start_monitoring(&self, surface: &str) -> Result<(), ServiceError> {
        let cfg = self.get_config().await;
        if !cfg.enabled {
            return Err(ServiceError::MonitoringDisabled);
        }
        if !cfg.is_monitored(surface) {
            return Err(ServiceError::SurfaceNotMonitored(surface.to_string()));
        }

        let mut monitors = self.monitors.lock().await;
        if let Some(m) = monitors.get(surface) {
            m.request_scan();
            return Ok(());
        }

        let feed = self.feed(surface).await;
        let sink: Arc<dyn MessageSink> = Arc::new(self.conn.publisher());
        let deps = MonitorDeps {
            rendered: Some(feed.rendered()),
            source: Arc::new(feed),
            sink,
            store: self.store.clone(),
        };
        // waits for a just-stopped monitor of this surface to drain
        monitors
            .start(surface, deps, MonitorSettings::from(&cfg))
            .await?;
        Ok(())
    }

    /// Returns false when the surface was not being monitored.
    pub async fn stop_monitoring(&self, surface: &str) -> bool {
        self.monitors.lock().await.stop(surface)
    }

    /// Replace the visible snapshot of a surface. Returns the buffered count.
    pub async fn push_items(&self, surface: &str, items: Vec<RawItem>) -> usize {
        let feed = self.feed(surface).await;
        feed.replace(items);
        feed.len()
    }

    /// Publish an arbitrary JSON payload on the configured subject.
    pub async fn send_message(&self, payload: &serde_json::Value) -> Result<(), ServiceError> {
        let subject = self.config.read().await.nats_subject.clone();
        self.conn.publisher().publish_json(&subject, payload).await?;
        Ok(())
    }

    pub async fn get_status(&self) -> RelayStatus {
        let enabled = self.config.read().await.enabled;
        let st = self.conn.status();
        let active_surfaces = self.monitors.lock().await.surfaces();
        RelayStatus {
            enabled,
            connected: st.connected,
            reconnecting: st.reconnecting,
            reconnect_attempts: st.attempts,
            max_reconnect_attempts: st.max_attempts,
            should_reconnect: st.should_reconnect,
            active_surfaces,
        }
    }

    pub async fn surface_status(&self, surface: &str) -> Option<SurfaceStatus> {
        let last_pass = self
            .monitors
            .lock()
            .await
            .get(surface)
            .map(|m| m.last_report());
        let buffered = self.feeds.lock().await.get(surface).map(FeedBuffer::len);
        if last_pass.is_none() && buffered.is_none() {
            return None;
        }
        Some(SurfaceStatus {
            surface: surface.to_string(),
            buffered: buffered.unwrap_or(0),
            last_pass: last_pass.flatten(),
        })
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.conn
    }

    /// Stop every monitor and close the connection.
    pub async fn shutdown(&self) {
        self.monitors.lock().await.shutdown().await;
        self.conn.disconnect().await;
    }

    async fn activate(&self, servers: &[String]) {
        self.conn.enable_reconnect().await;
        match self.conn.connect(servers).await {
            Ok(url) => info!(%url, "relay connected"),
            Err(e) => {
                warn!(error = %e, "initial connect failed; falling back to reconnect");
                self.conn.request_reconnect().await;
            }
        }
    }

    async fn deactivate(&self) {
        self.conn.disable_reconnect().await;
        self.conn.disconnect().await;
        for surface in self.monitors.lock().await.stop_all() {
            info!(%surface, "monitor stopped; relay disabled");
        }
    }

    /// Push new settings to running monitors; stop the ones whose surface is
    /// no longer configured.
    async fn reconcile_monitors(&self, cfg: &Config) {
        let settings = MonitorSettings::from(cfg);
        let stopped = self.monitors.lock().await.retain(|surface, m| {
            let keep = cfg.is_monitored(surface);
            if keep {
                m.update(settings.clone());
            }
            keep
        });
        for surface in stopped {
            info!(%surface, "surface no longer configured; monitor stopped");
        }
    }

    async fn feed(&self, surface: &str) -> FeedBuffer {
        self.feeds
            .lock()
            .await
            .entry(surface.to_string())
            .or_default()
            .clone()
    }
}
