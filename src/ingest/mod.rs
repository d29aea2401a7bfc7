// src/ingest/mod.rs
//! Per-surface ingestion: scan, dedup against seen-ids + watermark, extract,
//! wrap and publish. `monitor` drives passes from timers and render signals.

pub mod dedup;
pub mod monitor;
pub mod source;

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::config::store::{self, ConfigStore};
use crate::envelope::OutboundMessage;
use crate::error::PublishError;
use crate::nats::Publisher;
use dedup::{select_fresh, SeenSet, Watermark};
use source::ItemSource;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_passes_total", "Ingestion passes completed.");
        describe_counter!(
            "relay_items_published_total",
            "Items handed to the connection successfully."
        );
        describe_counter!(
            "relay_items_failed_total",
            "Items whose publish failed (dropped, not retried)."
        );
        describe_counter!(
            "relay_items_dropped_total",
            "Fresh items beyond maxMessages in a burst."
        );
        describe_counter!("relay_scan_errors_total", "Surface scan failures.");
        describe_gauge!("relay_seen_ids", "Tracked ids in the last surface's seen-set.");
    });
}

/// Where envelopes go. `Publisher` is the production sink.
#[async_trait::async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, subject: &str, msg: &OutboundMessage) -> Result<(), PublishError>;
}

#[async_trait::async_trait]
impl MessageSink for Publisher {
    async fn deliver(&self, subject: &str, msg: &OutboundMessage) -> Result<(), PublishError> {
        self.publish_json(subject, msg).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Scanning,
    Publishing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub scanned: usize,
    pub stale: usize,
    pub kept: usize,
    pub published: usize,
    pub failed: usize,
    pub dropped: usize,
    pub watermark: i64,
    pub seen: usize,
}

/// Dedup state of one surface. Owned by that surface's monitor, never shared.
#[derive(Debug)]
pub struct SurfaceIngest {
    surface: String,
    seen: SeenSet,
    watermark: Watermark,
    phase: Phase,
}

impl SurfaceIngest {
    pub fn new(surface: impl Into<String>, watermark: i64) -> Self {
        Self {
            surface: surface.into(),
            seen: SeenSet::default(),
            watermark: Watermark::new(watermark),
            phase: Phase::Idle,
        }
    }

    /// Resume from the watermark persisted for `surface`.
    pub async fn load(surface: &str, store: &dyn ConfigStore) -> Result<Self> {
        let wm = store::load_watermark(store, surface).await?;
        Ok(Self::new(surface, wm))
    }

    pub fn surface(&self) -> &str {
        &self.surface
    }

    pub fn watermark(&self) -> i64 {
        self.watermark.get()
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// One pass. Publish failures are per item and never abort the pass; the
    /// watermark advances over every kept item regardless.
    pub async fn run_pass(
        &mut self,
        source: &dyn ItemSource,
        sink: &dyn MessageSink,
        subject: &str,
        max_messages: usize,
        store: &dyn ConfigStore,
    ) -> Result<PassReport> {
        ensure_metrics_described();

        self.phase = Phase::Scanning;
        let items = match source.scan().await {
            Ok(v) => v,
            Err(e) => {
                self.phase = Phase::Idle;
                counter!("relay_scan_errors_total").increment(1);
                return Err(e.context(format!("scanning {}", source.name())));
            }
        };

        let scanned = items.len();
        let sel = select_fresh(items, &self.seen, self.watermark, max_messages.max(1));
        let mut report = PassReport {
            scanned,
            stale: sel.stale,
            kept: sel.kept.len(),
            dropped: sel.dropped.len(),
            ..PassReport::default()
        };
        if !sel.dropped.is_empty() {
            tracing::debug!(
                target: "ingest",
                surface = %self.surface,
                dropped = sel.dropped.len(),
                "burst over maxMessages; oldest fresh items dropped"
            );
        }

        self.phase = Phase::Publishing;
        let newest = sel.kept.iter().map(|i| i.timestamp).max();
        for item in sel.kept {
            self.seen.insert(&item.id);
            let id = item.id.clone();
            let msg = OutboundMessage::from_item(item, &self.surface);
            match sink.deliver(subject, &msg).await {
                Ok(()) => report.published += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        target: "ingest",
                        surface = %self.surface,
                        item = %id,
                        error = %e,
                        "publish failed; item dropped"
                    );
                }
            }
        }

        if let Some(ts) = newest {
            if self.watermark.advance(ts) {
                if let Err(e) = store::save_watermark(store, &self.surface, ts).await {
                    tracing::warn!(target: "ingest", surface = %self.surface, error = ?e, "persisting watermark failed");
                }
            }
        }
        self.seen.gc();
        self.phase = Phase::Idle;

        report.watermark = self.watermark.get();
        report.seen = self.seen.len();

        counter!("relay_passes_total").increment(1);
        counter!("relay_items_published_total").increment(report.published as u64);
        counter!("relay_items_failed_total").increment(report.failed as u64);
        counter!("relay_items_dropped_total").increment(report.dropped as u64);
        gauge!("relay_seen_ids").set(report.seen as f64);

        Ok(report)
    }
}
