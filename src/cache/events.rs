//! Cache event journal.
//!
//! Every lifecycle transition of the cache is published here as a typed
//! event. UI collaborators drain the queue to learn what changed instead of
//! pattern-matching on dispatched actions.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use super::keys::{CacheKey, Tag};
use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const METRIC_EVENT_QUEUE_LEN: &str = "murmur_cache_event_queue_len";
const METRIC_EVENT_DROPPED: &str = "murmur_cache_event_dropped_total";

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub id: Uuid,
    pub epoch: Epoch,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    QueryStarted { key: CacheKey, request_id: u64 },
    QueryFulfilled { key: CacheKey, request_id: u64 },
    QueryRejected { key: CacheKey, request_id: u64, error: String },
    /// An out-of-order completion was discarded.
    StaleCompletionDiscarded { key: CacheKey, request_id: u64 },
    MutationFulfilled { endpoint: String },
    MutationRejected { endpoint: String, error: String },
    TagsInvalidated { tags: Vec<Tag>, affected: Vec<CacheKey> },
    EntryEvicted { key: CacheKey },
    PushMerged { key: CacheKey, ids: Vec<String> },
    PushDropped { key: CacheKey, reason: String },
    /// Full reset, e.g. on sign-out.
    Reset,
}

/// Bounded in-memory event queue. When full, the oldest event is dropped.
pub struct EventQueue {
    queue: Mutex<VecDeque<CacheEvent>>,
    epoch_counter: AtomicU64,
    limit: usize,
}

impl EventQueue {
    pub fn new_with_limit(limit: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
            limit: limit.max(1),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn publish(&self, kind: EventKind) {
        let event = CacheEvent::new(kind, self.next_epoch());
        debug!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = ?event.kind,
            "Cache event enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        if queue.len() >= self.limit
            && let Some(dropped) = queue.pop_front()
        {
            counter!(METRIC_EVENT_DROPPED).increment(1);
            warn!(
                event_epoch = dropped.epoch,
                limit = self.limit,
                "Cache event journal full; dropped oldest event"
            );
        }
        queue.push_back(event);
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let drained = queue.drain(..count).collect();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
        drained
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(0.0);
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new_with_limit(super::config::CacheConfig::default().event_queue_limit)
    }
}
