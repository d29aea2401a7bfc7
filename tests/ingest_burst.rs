// tests/ingest_burst.rs
//
// Ingestion passes end to end: dedup, burst cap, watermark persistence, and
// what actually hits the wire through a real Publisher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use feed_relay::config::store::{self, MemoryStore};
use feed_relay::envelope::{OutboundMessage, RawItem};
use feed_relay::error::PublishError;
use feed_relay::ingest::source::FeedBuffer;
use feed_relay::ingest::{MessageSink, SurfaceIngest};
use feed_relay::nats::memory::MemoryConnector;
use feed_relay::nats::{ConnectionConfig, ConnectionHandle};

const LIST: &str = "https://x.com/i/lists/1";

#[derive(Default)]
struct Recorder {
    ids: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl MessageSink for Recorder {
    async fn deliver(&self, _subject: &str, msg: &OutboundMessage) -> Result<(), PublishError> {
        self.ids.lock().unwrap().push(msg.data.message_id.clone());
        Ok(())
    }
}

#[derive(Default)]
struct Counter(AtomicUsize);

#[async_trait::async_trait]
impl MessageSink for Counter {
    async fn deliver(&self, _subject: &str, _msg: &OutboundMessage) -> Result<(), PublishError> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn batch(range: std::ops::RangeInclusive<i64>) -> Vec<RawItem> {
    range
        .map(|i| RawItem::new(format!("id{i}"), format!("post number {i}"), 1_700_000_000_000 + i))
        .collect()
}

/// Split a `PUB` frame into (subject, declared length, payload).
fn parse_pub(frame: &str) -> (String, usize, String) {
    let (head, rest) = frame.split_once("\r\n").expect("header line");
    let mut parts = head.split(' ');
    assert_eq!(parts.next(), Some("PUB"));
    let subject = parts.next().unwrap().to_string();
    let len: usize = parts.next().unwrap().parse().unwrap();
    let payload = rest.strip_suffix("\r\n").expect("trailing CRLF").to_string();
    (subject, len, payload)
}

#[tokio::test]
async fn burst_of_eight_publishes_five_newest_and_drops_the_rest() {
    let mem = MemoryConnector::reachable(["ws://a:4222"]);
    let conn = ConnectionHandle::spawn(Arc::new(mem.clone()), ConnectionConfig::default());
    conn.connect(&["ws://a:4222".to_string()]).await.unwrap();
    let publisher = conn.publisher();

    let store = MemoryStore::new();
    let feed = FeedBuffer::new();
    feed.replace(batch(1..=8));
    let mut ingest = SurfaceIngest::new(LIST, 0);

    let r = ingest
        .run_pass(&feed, &publisher, "feed.burst", 5, &store)
        .await
        .unwrap();
    assert_eq!((r.kept, r.published, r.dropped), (5, 5, 3));

    let frames: Vec<String> = mem.last_peer().unwrap().sent().into_iter().skip(1).collect();
    let ids: Vec<String> = frames
        .iter()
        .map(|f| {
            let (subject, _, payload) = parse_pub(f);
            assert_eq!(subject, "feed.burst");
            let v: serde_json::Value = serde_json::from_str(&payload).unwrap();
            v["data"]["message_id"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(ids, vec!["id8", "id7", "id6", "id5", "id4"]);

    // the three oldest are below the watermark now and never come back
    let r = ingest
        .run_pass(&feed, &publisher, "feed.burst", 5, &store)
        .await
        .unwrap();
    assert_eq!(r.kept, 0);
    assert_eq!(r.stale, 8);

    feed.append(batch(9..=9));
    let r = ingest
        .run_pass(&feed, &publisher, "feed.burst", 5, &store)
        .await
        .unwrap();
    assert_eq!(r.published, 1);
    assert_eq!(mem.last_peer().unwrap().sent().len(), 1 + 6);
}

#[tokio::test]
async fn same_id_is_delivered_at_most_once() {
    let store = MemoryStore::new();
    let sink = Recorder::default();
    let feed = FeedBuffer::new();
    let mut ingest = SurfaceIngest::new(LIST, 0);

    feed.replace(vec![RawItem::new("a", "first render", 100)]);
    ingest.run_pass(&feed, &sink, "t", 5, &store).await.unwrap();

    // re-rendered with a newer timestamp: the seen-set still catches it
    feed.replace(vec![
        RawItem::new("a", "first render", 200),
        RawItem::new("b", "another", 150),
    ]);
    ingest.run_pass(&feed, &sink, "t", 5, &store).await.unwrap();

    assert_eq!(*sink.ids.lock().unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn watermark_is_monotonic_and_seen_set_stays_bounded() {
    let store = MemoryStore::new();
    let sink = Counter::default();
    let feed = FeedBuffer::new();
    let mut ingest = SurfaceIngest::new(LIST, 0);

    let mut last_wm = 0;
    for pass in 0..80i64 {
        let base = pass * 25;
        feed.replace(batch(base + 1..=base + 25));
        let r = ingest.run_pass(&feed, &sink, "t", 20, &store).await.unwrap();
        assert!(r.watermark >= last_wm, "watermark went backwards");
        assert!(r.seen <= 1_000, "seen-set grew to {}", r.seen);
        last_wm = r.watermark;
    }
    assert_eq!(sink.0.load(Ordering::Relaxed), 80 * 20);
    assert_eq!(last_wm, 1_700_000_000_000 + 80 * 25);
}

#[tokio::test]
async fn failed_publish_does_not_stop_the_pass() {
    // connection never opened: every publish fails with NotConnected
    let conn = ConnectionHandle::spawn(Arc::new(MemoryConnector::new()), ConnectionConfig::default());
    let publisher = conn.publisher();
    let store = MemoryStore::new();
    let feed = FeedBuffer::new();
    feed.replace(batch(1..=3));
    let mut ingest = SurfaceIngest::new(LIST, 0);

    let r = ingest.run_pass(&feed, &publisher, "t", 5, &store).await.unwrap();
    assert_eq!((r.kept, r.published, r.failed), (3, 0, 3));

    // a bare publish is not an ingestion step: it leaves dedup state alone
    let (seen, wm) = (ingest.seen().len(), ingest.watermark());
    assert_eq!(
        publisher.publish("t", "{}".into()).await,
        Err(PublishError::NotConnected)
    );
    assert_eq!((ingest.seen().len(), ingest.watermark()), (seen, wm));
}

#[tokio::test]
async fn watermark_survives_restart_and_is_per_surface() {
    let store = MemoryStore::new();
    let sink = Recorder::default();
    let feed = FeedBuffer::new();
    feed.replace(batch(1..=3));

    let mut first = SurfaceIngest::load(LIST, &store).await.unwrap();
    first.run_pass(&feed, &sink, "t", 5, &store).await.unwrap();

    // a fresh instance has an empty seen-set but resumes the watermark
    let mut resumed = SurfaceIngest::load(LIST, &store).await.unwrap();
    assert_eq!(resumed.watermark(), 1_700_000_000_003);
    let r = resumed.run_pass(&feed, &sink, "t", 5, &store).await.unwrap();
    assert_eq!(r.kept, 0);

    let other = SurfaceIngest::load("https://x.com/i/lists/2", &store).await.unwrap();
    assert_eq!(other.watermark(), 0);
    assert_eq!(
        store::load_watermark(&store, LIST).await.unwrap(),
        1_700_000_000_003
    );
}

#[tokio::test]
async fn blank_and_idless_items_are_skipped() {
    let store = MemoryStore::new();
    let sink = Recorder::default();
    let feed = FeedBuffer::new();
    feed.replace(vec![
        RawItem::new("", "no id", 10),
        RawItem::new("x", "   ", 11),
        RawItem::new("ok", "fine", 12),
    ]);
    let mut ingest = SurfaceIngest::new(LIST, 0);
    let r = ingest.run_pass(&feed, &sink, "t", 5, &store).await.unwrap();
    assert_eq!(r.kept, 1);
    assert_eq!(*sink.ids.lock().unwrap(), vec!["ok"]);
}
