// src/ingest/monitor.rs
//! Per-surface task. Three things ask for a pass: the poll interval, the
//! debounced "content rendered" signal and explicit requests. All of them are
//! funnelled through one loop, so passes on a surface never overlap; triggers
//! that fire mid-pass collapse into at most one follow-up pass.
//!
//! `MonitorSet` keys the tasks by surface. Restarting a surface waits for the
//! stopped task to finish its pass and continues with its dedup state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::FutureExt;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::ItemSource;
use super::{MessageSink, PassReport, SurfaceIngest};
use crate::config::store::ConfigStore;
use crate::config::Config;

/// Delay between a render signal and the pass it triggers.
pub const RENDER_DEBOUNCE: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub subject: String,
    pub max_messages: usize,
    pub check_every: Duration,
    pub auto_refresh: bool,
    pub refresh_every: Duration,
}

impl From<&Config> for MonitorSettings {
    fn from(c: &Config) -> Self {
        Self {
            subject: c.nats_subject.clone(),
            max_messages: c.max_messages as usize,
            check_every: c.check_every(),
            auto_refresh: c.auto_refresh,
            refresh_every: c.refresh_every(),
        }
    }
}

/// Everything a monitor task needs besides its dedup state.
pub struct MonitorDeps {
    pub source: Arc<dyn ItemSource>,
    /// Render signal of the source, if it has one.
    pub rendered: Option<Arc<Notify>>,
    pub sink: Arc<dyn MessageSink>,
    pub store: Arc<dyn ConfigStore>,
}

pub struct MonitorHandle {
    surface: String,
    cancel: CancellationToken,
    settings: watch::Sender<MonitorSettings>,
    reports: watch::Receiver<Option<PassReport>>,
    scan_now: Arc<Notify>,
    task: Option<JoinHandle<SurfaceIngest>>,
}

impl MonitorHandle {
    /// Start monitoring. The first pass runs immediately.
    pub fn spawn(ingest: SurfaceIngest, deps: MonitorDeps, settings: MonitorSettings) -> Self {
        let surface = ingest.surface().to_string();
        let cancel = CancellationToken::new();
        let (settings_tx, settings_rx) = watch::channel(settings);
        let (report_tx, report_rx) = watch::channel(None);
        let scan_now = Arc::new(Notify::new());

        let task = MonitorTask {
            ingest,
            deps,
            settings: settings_rx,
            reports: report_tx,
            scan_now: scan_now.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(task.run());

        Self {
            surface,
            cancel,
            settings: settings_tx,
            reports: report_rx,
            scan_now,
            task: Some(task),
        }
    }

    pub fn surface(&self) -> &str {
        &self.surface
    }

    /// Cancel timers and the render watcher now. A pass that is already
    /// publishing finishes first.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Apply new settings without losing the seen-set.
    pub fn update(&self, settings: MonitorSettings) {
        self.settings.send_if_modified(|cur| {
            if *cur == settings {
                false
            } else {
                *cur = settings;
                true
            }
        });
    }

    /// Ask for a pass as soon as the current one (if any) is done.
    pub fn request_scan(&self) {
        self.scan_now.notify_one();
    }

    pub fn last_report(&self) -> Option<PassReport> {
        self.reports.borrow().clone()
    }

    pub fn reports(&self) -> watch::Receiver<Option<PassReport>> {
        self.reports.clone()
    }

    /// Stop and wait for the task to exit. Hands back the dedup state unless
    /// the task panicked.
    pub async fn shutdown(mut self) -> Option<SurfaceIngest> {
        self.stop();
        let task = self.task.take()?;
        match task.await {
            Ok(ingest) => Some(ingest),
            Err(e) => {
                warn!(target: "ingest", surface = %self.surface, error = %e, "monitor task failed");
                None
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Monitors by surface, plus stopped ones whose last pass may still be
/// publishing.
#[derive(Default)]
pub struct MonitorSet {
    running: HashMap<String, MonitorHandle>,
    draining: HashMap<String, MonitorHandle>,
}

impl MonitorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, surface: &str) -> Option<&MonitorHandle> {
        self.running.get(surface)
    }

    pub fn is_running(&self, surface: &str) -> bool {
        self.running.contains_key(surface)
    }

    /// Running surfaces, sorted.
    pub fn surfaces(&self) -> Vec<String> {
        let mut v: Vec<String> = self.running.keys().cloned().collect();
        v.sort();
        v
    }

    /// Start monitoring `surface`; no-op when it is already running.
    ///
    /// A stopped monitor of the same surface is awaited first and its seen-set
    /// and watermark carry over, so the two never publish concurrently. With
    /// no predecessor the watermark is loaded from `deps.store`.
    pub async fn start(
        &mut self,
        surface: &str,
        deps: MonitorDeps,
        settings: MonitorSettings,
    ) -> Result<()> {
        if self.is_running(surface) {
            return Ok(());
        }
        let previous = match self.draining.remove(surface) {
            Some(old) => old.shutdown().await,
            None => None,
        };
        let ingest = match previous {
            Some(ingest) => {
                debug!(target: "ingest", %surface, watermark = ingest.watermark(), "resuming after restart");
                ingest
            }
            None => SurfaceIngest::load(surface, deps.store.as_ref()).await?,
        };
        self.running
            .insert(surface.to_string(), MonitorHandle::spawn(ingest, deps, settings));
        Ok(())
    }

    /// Returns false when the surface was not running.
    pub fn stop(&mut self, surface: &str) -> bool {
        match self.running.remove(surface) {
            Some(m) => {
                m.stop();
                self.draining.insert(surface.to_string(), m);
                true
            }
            None => false,
        }
    }

    /// Stop every running monitor `keep` rejects. Returns the stopped surfaces.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &MonitorHandle) -> bool) -> Vec<String> {
        let gone: Vec<String> = self
            .running
            .iter()
            .filter(|(surface, m)| !keep(surface.as_str(), *m))
            .map(|(surface, _)| surface.clone())
            .collect();
        for surface in &gone {
            self.stop(surface);
        }
        gone
    }

    pub fn stop_all(&mut self) -> Vec<String> {
        self.retain(|_, _| false)
    }

    /// Stop everything and wait for every task, draining ones included.
    pub async fn shutdown(&mut self) {
        self.stop_all();
        for (_, m) in self.draining.drain() {
            m.shutdown().await;
        }
    }
}

enum Step {
    Stop,
    Settings,
    Scan(&'static str),
    Rendered,
    Refresh,
}

struct MonitorTask {
    ingest: SurfaceIngest,
    deps: MonitorDeps,
    settings: watch::Receiver<MonitorSettings>,
    reports: watch::Sender<Option<PassReport>>,
    scan_now: Arc<Notify>,
    cancel: CancellationToken,
}

impl MonitorTask {
    async fn run(mut self) -> SurfaceIngest {
        let mut current = self.settings.borrow_and_update().clone();
        let mut poll = poll_timer(current.check_every);
        let mut refresh = refresh_timer(&current);
        let mut debounce_at: Option<Instant> = None;

        info!(
            target: "ingest",
            surface = %self.ingest.surface(),
            watermark = self.ingest.watermark(),
            check_ms = current.check_every.as_millis() as u64,
            "monitoring started"
        );
        self.pass(&current, "start").await;
        let mut follow_up = self.take_pending(&mut poll);

        loop {
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Stop,
                changed = self.settings.changed() => match changed {
                    Ok(()) => Step::Settings,
                    Err(_) => Step::Stop,
                },
                _ = std::future::ready(()), if follow_up => Step::Scan("coalesced"),
                _ = self.scan_now.notified() => Step::Scan("request"),
                _ = wait_until(debounce_at) => Step::Scan("rendered"),
                _ = poll.tick() => Step::Scan("poll"),
                _ = notified(&self.deps.rendered) => Step::Rendered,
                _ = tick(&mut refresh) => Step::Refresh,
            };

            match step {
                Step::Stop => break,
                Step::Settings => {
                    let next = self.settings.borrow_and_update().clone();
                    if next.check_every != current.check_every {
                        poll = poll_timer(next.check_every);
                    }
                    if next.auto_refresh != current.auto_refresh
                        || next.refresh_every != current.refresh_every
                    {
                        refresh = refresh_timer(&next);
                    }
                    debug!(target: "ingest", surface = %self.ingest.surface(), ?next, "settings updated");
                    current = next;
                }
                Step::Rendered => {
                    if debounce_at.is_none() {
                        debounce_at = Some(Instant::now() + RENDER_DEBOUNCE);
                    }
                }
                Step::Scan(trigger) => {
                    // any pass covers a pending render signal
                    debounce_at = None;
                    self.pass(&current, trigger).await;
                    follow_up = self.take_pending(&mut poll);
                }
                Step::Refresh => {
                    info!(target: "ingest", surface = %self.ingest.surface(), "auto-refresh");
                    if let Err(e) = self.deps.source.refresh().await {
                        warn!(target: "ingest", surface = %self.ingest.surface(), error = ?e, "refresh failed");
                    }
                }
            }
        }

        info!(target: "ingest", surface = %self.ingest.surface(), "monitoring stopped");
        self.ingest
    }

    /// Consume the triggers that fired while a pass was running. True when
    /// at least one did.
    fn take_pending(&self, poll: &mut Interval) -> bool {
        let requested = self.scan_now.notified().now_or_never().is_some();
        let rendered = self
            .deps
            .rendered
            .as_ref()
            .is_some_and(|n| n.notified().now_or_never().is_some());
        let polled = poll.tick().now_or_never().is_some();
        requested | rendered | polled
    }

    async fn pass(&mut self, settings: &MonitorSettings, trigger: &'static str) {
        let res = self
            .ingest
            .run_pass(
                self.deps.source.as_ref(),
                self.deps.sink.as_ref(),
                &settings.subject,
                settings.max_messages,
                self.deps.store.as_ref(),
            )
            .await;
        match res {
            Ok(report) => {
                if report.kept > 0 {
                    info!(
                        target: "ingest",
                        surface = %self.ingest.surface(),
                        trigger,
                        kept = report.kept,
                        published = report.published,
                        failed = report.failed,
                        dropped = report.dropped,
                        watermark = report.watermark,
                        "pass complete"
                    );
                }
                self.reports.send_replace(Some(report));
            }
            Err(e) => {
                warn!(target: "ingest", surface = %self.ingest.surface(), trigger, error = ?e, "pass failed");
            }
        }
    }
}

fn poll_timer(every: Duration) -> Interval {
    let every = every.max(Duration::from_millis(1));
    let mut iv = interval_at(Instant::now() + every, every);
    iv.set_missed_tick_behavior(MissedTickBehavior::Skip);
    iv
}

fn refresh_timer(s: &MonitorSettings) -> Option<Interval> {
    s.auto_refresh.then(|| poll_timer(s.refresh_every))
}

async fn tick(iv: &mut Option<Interval>) {
    match iv {
        Some(iv) => {
            iv.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn notified(n: &Option<Arc<Notify>>) {
    match n {
        Some(n) => n.notified().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
