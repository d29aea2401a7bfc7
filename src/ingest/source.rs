// src/ingest/source.rs
use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::envelope::RawItem;

/// Where a surface's currently visible items come from.
#[async_trait::async_trait]
pub trait ItemSource: Send + Sync {
    /// Snapshot of the items visible right now.
    async fn scan(&self) -> Result<Vec<RawItem>>;

    /// Reload the surface. Sources that cannot reload ignore it.
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Snapshot pushed by the host that renders the surface. Every push raises
/// the "new content" signal the monitor debounces on.
#[derive(Clone, Default)]
pub struct FeedBuffer {
    items: Arc<Mutex<Vec<RawItem>>>,
    rendered: Arc<Notify>,
}

impl FeedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the visible snapshot.
    pub fn replace(&self, items: Vec<RawItem>) {
        *self.lock() = items;
        self.rendered.notify_one();
    }

    /// Append newly rendered items to the snapshot.
    pub fn append(&self, items: Vec<RawItem>) {
        self.lock().extend(items);
        self.rendered.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Signal raised when new content was pushed.
    pub fn rendered(&self) -> Arc<Notify> {
        self.rendered.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RawItem>> {
        self.items.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait::async_trait]
impl ItemSource for FeedBuffer {
    async fn scan(&self) -> Result<Vec<RawItem>> {
        Ok(self.lock().clone())
    }

    /// A reload empties the rendered list until the host pushes again.
    async fn refresh(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "feed-buffer"
    }
}

/// Fixed item list, handy for tests and fixtures.
pub struct StaticSource {
    pub items: Vec<RawItem>,
}

#[async_trait::async_trait]
impl ItemSource for StaticSource {
    async fn scan(&self) -> Result<Vec<RawItem>> {
        Ok(self.items.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}
