// src/ingest/dedup.rs
//! Seen-id set and high-watermark used to pick fresh items off a surface.

use std::collections::{HashSet, VecDeque};

use crate::envelope::RawItem;

pub const SEEN_CAP: usize = 1_000;
pub const SEEN_RETAIN: usize = 500;

/// Insertion-ordered set of item ids with a size cap enforced by `gc`.
#[derive(Debug, Clone)]
pub struct SeenSet {
    order: VecDeque<String>,
    ids: HashSet<String>,
    cap: usize,
    retain: usize,
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::with_limits(SEEN_CAP, SEEN_RETAIN)
    }
}

impl SeenSet {
    /// `retain` is clamped to `cap`.
    pub fn with_limits(cap: usize, retain: usize) -> Self {
        let cap = cap.max(1);
        Self {
            order: VecDeque::with_capacity(cap + 1),
            ids: HashSet::with_capacity(cap + 1),
            cap,
            retain: retain.min(cap),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns false if the id was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if !self.ids.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Once over the cap, keep only the `retain` most recently inserted ids.
    /// Returns how many were evicted.
    pub fn gc(&mut self) -> usize {
        if self.order.len() <= self.cap {
            return 0;
        }
        let excess = self.order.len() - self.retain;
        for id in self.order.drain(..excess) {
            self.ids.remove(&id);
        }
        excess
    }
}

/// Highest timestamp among selected items. Never moves backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark(i64);

impl Watermark {
    pub fn new(ts: i64) -> Self {
        Self(ts)
    }

    pub fn get(&self) -> i64 {
        self.0
    }

    /// Returns true if the watermark moved.
    pub fn advance(&mut self, ts: i64) -> bool {
        if ts > self.0 {
            self.0 = ts;
            true
        } else {
            false
        }
    }
}

/// Outcome of selecting fresh items from one scan.
#[derive(Debug, Default)]
pub struct Selection {
    /// Newest first, at most `max` entries.
    pub kept: Vec<RawItem>,
    /// Fresh items beyond the cap; never retried.
    pub dropped: Vec<RawItem>,
    /// Items ignored because seen, at or below the watermark, or blank.
    pub stale: usize,
}

/// Keep items that are relayable, unseen and strictly newer than the
/// watermark; newest first, capped to `max`. Does not mutate the filter.
pub fn select_fresh(
    items: Vec<RawItem>,
    seen: &SeenSet,
    watermark: Watermark,
    max: usize,
) -> Selection {
    let mut stale = 0usize;
    let mut fresh: Vec<RawItem> = Vec::with_capacity(items.len());
    let mut batch_ids: HashSet<String> = HashSet::new();

    for item in items {
        let keep = item.is_relayable()
            && !seen.contains(&item.id)
            && item.timestamp > watermark.get()
            // virtual lists can render the same item twice in one snapshot
            && batch_ids.insert(item.id.clone());
        if keep {
            fresh.push(item);
        } else {
            stale += 1;
        }
    }

    fresh.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let dropped = if fresh.len() > max {
        fresh.split_off(max)
    } else {
        Vec::new()
    };

    Selection {
        kept: fresh,
        dropped,
        stale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, ts: i64) -> RawItem {
        RawItem::new(id, format!("text {id}"), ts)
    }

    #[test]
    fn gc_keeps_most_recent_insertions() {
        let mut s = SeenSet::default();
        for i in 0..1_001 {
            s.insert(&i.to_string());
        }
        assert_eq!(s.gc(), 501);
        assert_eq!(s.len(), 500);
        assert!(!s.contains("500"));
        assert!(s.contains("501"));
        assert!(s.contains("1000"));
    }

    #[test]
    fn gc_is_noop_at_cap() {
        let mut s = SeenSet::with_limits(3, 1);
        for id in ["a", "b", "c"] {
            s.insert(id);
        }
        assert_eq!(s.gc(), 0);
        assert_eq!(s.len(), 3);
        s.insert("d");
        assert_eq!(s.gc(), 3);
        assert!(s.contains("d"));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut s = SeenSet::default();
        assert!(s.insert("x"));
        assert!(!s.insert("x"));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn watermark_is_monotonic() {
        let mut w = Watermark::new(10);
        assert!(!w.advance(5));
        assert!(!w.advance(10));
        assert!(w.advance(11));
        assert_eq!(w.get(), 11);
    }

    #[test]
    fn select_filters_sorts_and_caps() {
        let mut seen = SeenSet::default();
        seen.insert("seen");
        let items = vec![
            item("a", 110),
            item("seen", 500),
            item("old", 100),
            item("b", 130),
            item("c", 120),
            item("b", 130),
            RawItem::new("blank", " ", 999),
        ];
        let sel = select_fresh(items, &seen, Watermark::new(100), 2);
        let kept: Vec<&str> = sel.kept.iter().map(|i| i.id.as_str()).collect();
        let dropped: Vec<&str> = sel.dropped.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(kept, vec!["b", "c"]);
        assert_eq!(dropped, vec!["a"]);
        assert_eq!(sel.stale, 4);
    }
}
