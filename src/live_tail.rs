/// Live console tail
///
/// Subscribes to the server's push feed, classifies each line and appends it
/// to a bounded ring buffer. The buffer has exactly one writer (the feed
/// task, holding the non-`Clone` `LiveWriter`) and any number of readers.
///
/// Lines re-delivered by the backlog after a reconnect are not
/// de-duplicated.
use crate::line_classifier::LineClassifier;
use crate::model::{ClassifiedEvent, EventCategory, RawLine};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_LIVE_CAPACITY: usize = 1000;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// Ring buffer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveEntry {
    pub seq: u64,
    pub event: ClassifiedEvent,
}

/// Fixed-capacity ring with index-based eviction of the oldest entry.
#[derive(Debug)]
pub struct LiveBuffer {
    slots: Vec<Option<LiveEntry>>,
    head: usize,
    len: usize,
    next_seq: u64,
}

impl LiveBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sequence number the next appended entry will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Append an event, returning the evicted entry when full.
    pub fn push(&mut self, event: ClassifiedEvent) -> Option<LiveEntry> {
        let entry = LiveEntry {
            seq: self.next_seq,
            event,
        };
        self.next_seq += 1;

        let capacity = self.capacity();
        if self.len < capacity {
            let index = (self.head + self.len) % capacity;
            self.slots[index] = Some(entry);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(entry);
            self.head = (self.head + 1) % capacity;
            evicted
        }
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &LiveEntry> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |offset| self.slots[(self.head + offset) % capacity].as_ref())
    }

    /// Entries with `seq >= since`, oldest first.
    pub fn since(&self, since: u64) -> Vec<LiveEntry> {
        self.iter().filter(|entry| entry.seq >= since).cloned().collect()
    }
}

// ============================================================================
// Shared buffer: one writer, many readers
// ============================================================================

struct Shared {
    buffer: RwLock<LiveBuffer>,
    updates: watch::Sender<u64>,
}

/// Create a buffer of `capacity` and return its single writer and a reader
/// handle.
pub fn live_buffer(capacity: usize) -> (LiveWriter, LiveHandle) {
    let (updates, receiver) = watch::channel(0);
    let shared = Arc::new(Shared {
        buffer: RwLock::new(LiveBuffer::with_capacity(capacity)),
        updates,
    });
    (
        LiveWriter {
            shared: shared.clone(),
        },
        LiveHandle {
            shared,
            updates: receiver,
        },
    )
}

/// The only mutator of a live buffer.
pub struct LiveWriter {
    shared: Arc<Shared>,
}

impl LiveWriter {
    pub fn append(&mut self, event: ClassifiedEvent) {
        self.append_batch(std::iter::once(event));
    }

    /// Append events under one lock and notify readers once.
    pub fn append_batch(&mut self, events: impl IntoIterator<Item = ClassifiedEvent>) {
        let next_seq = {
            let mut buffer = self
                .shared
                .buffer
                .write()
                .unwrap_or_else(|p| p.into_inner());
            for event in events {
                buffer.push(event);
            }
            buffer.next_seq()
        };
        self.shared.updates.send_replace(next_seq);
    }
}

/// One read of the buffer: entries plus the sequence to resume from.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSlice {
    pub entries: Vec<LiveEntry>,
    pub next_seq: u64,
}

/// Read-only view of a live buffer.
#[derive(Clone)]
pub struct LiveHandle {
    shared: Arc<Shared>,
    updates: watch::Receiver<u64>,
}

impl LiveHandle {
    pub fn snapshot(&self) -> Vec<LiveEntry> {
        self.read_since(0).entries
    }

    pub fn read_since(&self, since: u64) -> LiveSlice {
        let buffer = self
            .shared
            .buffer
            .read()
            .unwrap_or_else(|p| p.into_inner());
        LiveSlice {
            entries: buffer.since(since),
            next_seq: buffer.next_seq(),
        }
    }

    pub fn len(&self) -> usize {
        self.shared
            .buffer
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until new entries are appended. Returns `false` once the writer
    /// is gone.
    pub async fn changed(&mut self) -> bool {
        self.updates.changed().await.is_ok()
    }

    /// Reader that remembers what it has already seen.
    pub fn reader(&self) -> LiveReader {
        LiveReader {
            handle: self.clone(),
            last_seq: 0,
        }
    }
}

/// Tracks "new entries since last read" for one consumer.
pub struct LiveReader {
    handle: LiveHandle,
    last_seq: u64,
}

impl LiveReader {
    pub fn read_new(&mut self) -> Vec<LiveEntry> {
        self.handle.updates.borrow_and_update();
        let slice = self.handle.read_since(self.last_seq);
        self.last_seq = slice.next_seq;
        slice.entries
    }

    pub async fn wait_new(&mut self) -> Option<Vec<LiveEntry>> {
        if !self.handle.changed().await {
            return None;
        }
        Some(self.read_new())
    }
}

// ============================================================================
// Feed protocol
// ============================================================================

/// Inbound feed messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedMessage {
    /// Backlog delivered right after (re)connecting
    History { lines: Vec<RawLine> },
    Line { line: RawLine },
}

#[derive(Debug, Serialize)]
struct SubscribeRequest {
    #[serde(rename = "type")]
    kind: &'static str,
    channel: &'static str,
}

impl SubscribeRequest {
    fn console() -> Self {
        Self {
            kind: "subscribe",
            channel: "console",
        }
    }
}

// ============================================================================
// Adapter
// ============================================================================

pub struct LiveTailAdapter {
    feed_url: String,
    reconnect_delay: Duration,
    classifier: Arc<LineClassifier>,
    writer: LiveWriter,
}

impl LiveTailAdapter {
    pub fn new(feed_url: impl Into<String>, writer: LiveWriter, classifier: Arc<LineClassifier>) -> Self {
        Self {
            feed_url: feed_url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            classifier,
            writer,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Classify and buffer one feed message; returns how many events were
    /// buffered. `other` lines are dropped before buffering.
    pub fn apply_message(&mut self, message: FeedMessage) -> usize {
        self.apply_message_at(message, Utc::now())
    }

    pub fn apply_message_at(&mut self, message: FeedMessage, now: DateTime<Utc>) -> usize {
        let lines = match message {
            FeedMessage::History { lines } => lines,
            FeedMessage::Line { line } => vec![line],
        };

        let events: Vec<ClassifiedEvent> = lines
            .iter()
            .map(|line| self.classifier.classify_at(line, now))
            .filter(|event| event.category != EventCategory::Other)
            .collect();

        let buffered = events.len();
        if buffered > 0 {
            self.writer.append_batch(events);
        }
        buffered
    }

    /// Parse a raw feed frame and apply it. Malformed frames are skipped.
    pub fn apply_text(&mut self, text: &str) -> usize {
        match serde_json::from_str::<FeedMessage>(text) {
            Ok(message) => self.apply_message(message),
            Err(err) => {
                debug!("Skipping unrecognized feed frame: {}", err);
                0
            }
        }
    }

    /// Keep the subscription alive until `shutdown` fires, reconnecting on a
    /// fixed delay after every drop.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Starting live tail for {}", self.feed_url);

        loop {
            let connected = tokio::select! {
                _ = shutdown.cancelled() => None,
                result = connect_async(self.feed_url.as_str()) => Some(result),
            };
            let Some(connected) = connected else {
                break;
            };

            match connected {
                Ok((mut socket, _response)) => {
                    info!("connected to console feed");
                    match serde_json::to_string(&SubscribeRequest::console()) {
                        Ok(subscribe) => {
                            if socket.send(Message::Text(subscribe)).await.is_err() {
                                warn!("failed to send console subscribe request");
                            }
                        }
                        Err(err) => warn!(?err, "failed to encode console subscribe request"),
                    }

                    loop {
                        let next = tokio::select! {
                            _ = shutdown.cancelled() => {
                                let _ = socket.close(None).await;
                                info!("live tail stopped");
                                return;
                            }
                            next = socket.next() => next,
                        };

                        match next {
                            Some(Ok(Message::Text(text))) => {
                                self.apply_text(&text);
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => continue,
                            Some(Err(err)) => {
                                warn!(?err, "console feed read error");
                                break;
                            }
                        }
                    }
                    warn!(
                        "console feed disconnected, retrying in {:?}",
                        self.reconnect_delay
                    );
                }
                Err(err) => {
                    warn!(?err, "failed connecting to console feed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.reconnect_delay) => {}
            }
        }

        info!("live tail stopped");
    }
}
