//! Cache entry store.
//!
//! Keyed table of query results. Each entry carries its lifecycle status,
//! subscriber count, eviction timer and the request bookkeeping used to
//! deduplicate requests and discard out-of-order completions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::task::AbortHandle;

use super::endpoint::EntryData;
use super::keys::{CacheKey, Tag};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// Resolves once the shared in-flight request has settled into the store.
pub(crate) type SharedRequest = Shared<BoxFuture<'static, ()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Uninitialized,
    Pending,
    Fulfilled,
    Rejected,
}

pub(crate) struct InFlight {
    pub(crate) request_id: u64,
    pub(crate) done: SharedRequest,
}

/// Result of applying a completed request to its entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Data or error was recorded; `status` is the entry's new status.
    Applied { status: QueryStatus },
    /// A newer request already settled; this result was discarded.
    Superseded,
}

pub struct CacheEntry {
    key: CacheKey,
    /// Distinguishes this entry from earlier entries with the same key.
    instance: u64,
    args: Value,
    status: QueryStatus,
    data: Option<Arc<EntryData>>,
    error: Option<String>,
    subscriber_count: usize,
    tags: HashSet<Tag>,
    latest_request_id: u64,
    settled_request_id: u64,
    /// Results of requests issued before this id predate an invalidation.
    stale_below: u64,
    fulfilled_at: Option<OffsetDateTime>,
    inflight: Option<InFlight>,
    eviction_timer: Option<AbortHandle>,
    eviction_epoch: u64,
}

impl CacheEntry {
    pub fn new(key: CacheKey, args: Value, instance: u64) -> Self {
        Self {
            key,
            instance,
            args,
            status: QueryStatus::Uninitialized,
            data: None,
            error: None,
            subscriber_count: 0,
            tags: HashSet::new(),
            latest_request_id: 0,
            settled_request_id: 0,
            stale_below: 0,
            fulfilled_at: None,
            inflight: None,
            eviction_timer: None,
            eviction_epoch: 0,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn status(&self) -> QueryStatus {
        self.status
    }

    pub fn data(&self) -> Option<&Arc<EntryData>> {
        self.data.as_ref()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count
    }

    pub fn settled_request_id(&self) -> u64 {
        self.settled_request_id
    }

    /// Whether the stored result predates the last invalidation.
    pub fn is_stale(&self) -> bool {
        self.status != QueryStatus::Uninitialized && self.settled_request_id < self.stale_below
    }

    /// Whether an in-flight request was issued after the last invalidation
    /// and can be shared by new callers.
    pub(crate) fn current_inflight(&self) -> Option<SharedRequest> {
        self.inflight
            .as_ref()
            .filter(|inflight| inflight.request_id >= self.stale_below)
            .map(|inflight| inflight.done.clone())
    }

    /// Whether a new caller must issue a request rather than reuse the entry.
    pub fn needs_fetch(&self) -> bool {
        match self.status {
            QueryStatus::Uninitialized | QueryStatus::Rejected => true,
            QueryStatus::Fulfilled => self.is_stale(),
            QueryStatus::Pending => self.current_inflight().is_none(),
        }
    }

    /// `* → Pending`. Existing data stays visible while the request runs.
    pub(crate) fn begin_request(&mut self, request_id: u64, done: SharedRequest) {
        self.status = QueryStatus::Pending;
        self.latest_request_id = request_id;
        self.inflight = Some(InFlight { request_id, done });
    }

    /// Apply a completed request.
    ///
    /// Completions older than the newest settled request are discarded. A
    /// completion that is not the latest issued request records its result
    /// but leaves the entry `Pending` for the newer one.
    pub fn complete(
        &mut self,
        request_id: u64,
        result: Result<(EntryData, HashSet<Tag>), String>,
    ) -> Completion {
        if request_id <= self.settled_request_id {
            return Completion::Superseded;
        }
        self.settled_request_id = request_id;
        let is_latest = request_id >= self.latest_request_id;

        let succeeded = match result {
            Ok((data, tags)) => {
                self.data = Some(Arc::new(data));
                self.tags = tags;
                self.error = None;
                self.fulfilled_at = Some(OffsetDateTime::now_utc());
                true
            }
            Err(message) => {
                self.error = Some(message);
                false
            }
        };

        if is_latest {
            self.inflight = None;
            self.status = if succeeded {
                QueryStatus::Fulfilled
            } else {
                QueryStatus::Rejected
            };
        }
        Completion::Applied {
            status: self.status,
        }
    }

    /// Mark the current result stale; requests issued from `next_request_id` on are fresh.
    pub fn invalidate(&mut self, next_request_id: u64) {
        if self.status != QueryStatus::Uninitialized {
            self.stale_below = self.stale_below.max(next_request_id);
        }
    }

    /// Register a subscriber and cancel any armed eviction timer.
    ///
    /// Returns true when this is the entry's first subscriber.
    pub fn add_subscriber(&mut self) -> bool {
        if let Some(timer) = self.eviction_timer.take() {
            timer.abort();
        }
        self.eviction_epoch += 1;
        self.subscriber_count += 1;
        self.subscriber_count == 1
    }

    /// Drop a subscriber; returns the remaining count.
    pub fn remove_subscriber(&mut self) -> usize {
        self.subscriber_count = self.subscriber_count.saturating_sub(1);
        self.subscriber_count
    }

    /// Start a new eviction epoch and return it. Only a timer carrying the
    /// current epoch may evict the entry.
    pub(crate) fn arm_eviction(&mut self, timer: Option<AbortHandle>) -> u64 {
        if let Some(previous) = self.eviction_timer.take() {
            previous.abort();
        }
        self.eviction_epoch += 1;
        self.eviction_timer = timer;
        self.eviction_epoch
    }

    pub(crate) fn set_eviction_timer(&mut self, timer: AbortHandle) {
        self.eviction_timer = Some(timer);
    }

    pub(crate) fn can_evict(&self, epoch: u64) -> bool {
        self.subscriber_count == 0 && self.eviction_epoch == epoch
    }

    /// Replace the cached data without touching request bookkeeping.
    pub(crate) fn replace_data(&mut self, data: Arc<EntryData>) {
        self.data = Some(data);
    }

    pub(crate) fn data_mut(&mut self) -> Option<&mut EntryData> {
        self.data.as_mut().map(Arc::make_mut)
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            key: self.key.clone(),
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            subscriber_count: self.subscriber_count,
            tags: self.tags.clone(),
            is_stale: self.is_stale(),
            fulfilled_at: self.fulfilled_at,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.eviction_timer.take() {
            timer.abort();
        }
    }
}

/// Point-in-time copy of an entry for consumers.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub key: CacheKey,
    pub status: QueryStatus,
    pub data: Option<Arc<EntryData>>,
    pub error: Option<String>,
    pub subscriber_count: usize,
    pub tags: HashSet<Tag>,
    pub is_stale: bool,
    pub fulfilled_at: Option<OffsetDateTime>,
}

impl EntrySnapshot {
    /// Snapshot of a key that has no entry.
    pub fn uninitialized(key: CacheKey) -> Self {
        Self {
            key,
            status: QueryStatus::Uninitialized,
            data: None,
            error: None,
            subscriber_count: 0,
            tags: HashSet::new(),
            is_stale: false,
            fulfilled_at: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Pending && self.data.is_none()
    }

    pub fn is_fetching(&self) -> bool {
        self.status == QueryStatus::Pending
    }
}

/// Process-wide table of cache entries.
#[derive(Default)]
pub struct EntryStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, key: &CacheKey) -> EntrySnapshot {
        rw_read(&self.entries, SOURCE, "snapshot")
            .get(key)
            .map(CacheEntry::snapshot)
            .unwrap_or_else(|| EntrySnapshot::uninitialized(key.clone()))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        rw_read(&self.entries, SOURCE, "contains").contains_key(key)
    }

    /// Run `f` on the entry for `key`, creating it first if needed.
    pub fn with_entry<R>(
        &self,
        key: &CacheKey,
        create: impl FnOnce() -> CacheEntry,
        f: impl FnOnce(&mut CacheEntry) -> R,
    ) -> R {
        let mut entries = rw_write(&self.entries, SOURCE, "with_entry");
        let entry = entries.entry(key.clone()).or_insert_with(create);
        f(entry)
    }

    /// Run `f` on an existing entry.
    pub fn with_existing<R>(
        &self,
        key: &CacheKey,
        f: impl FnOnce(&mut CacheEntry) -> R,
    ) -> Option<R> {
        rw_write(&self.entries, SOURCE, "with_existing")
            .get_mut(key)
            .map(f)
    }

    /// Run `f` over the entries for `keys` that exist, under one lock.
    pub fn with_each<'a, R>(
        &self,
        keys: impl IntoIterator<Item = &'a CacheKey>,
        mut f: impl FnMut(&mut CacheEntry) -> R,
    ) -> Vec<R> {
        let mut entries = rw_write(&self.entries, SOURCE, "with_each");
        keys.into_iter()
            .filter_map(|key| entries.get_mut(key).map(&mut f))
            .collect()
    }

    /// Remove the entry if `predicate` holds for it.
    ///
    /// `on_removed` runs before the store lock is released, so no other
    /// caller can recreate the entry until it returns.
    pub fn remove_if(
        &self,
        key: &CacheKey,
        predicate: impl FnOnce(&CacheEntry) -> bool,
        on_removed: impl FnOnce(&CacheEntry),
    ) -> Option<CacheEntry> {
        let mut entries = rw_write(&self.entries, SOURCE, "remove_if");
        if !entries.get(key).is_some_and(predicate) {
            return None;
        }
        let mut removed = entries.remove(key)?;
        removed.cancel_timer();
        on_removed(&removed);
        Some(removed)
    }

    /// Drop every entry, cancelling armed eviction timers. `on_cleared` runs
    /// under the store lock with the dropped keys.
    pub fn clear(&self, on_cleared: impl FnOnce(&[CacheKey])) -> Vec<CacheKey> {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        let dropped: Vec<CacheKey> = entries
            .drain()
            .map(|(key, mut entry)| {
                entry.cancel_timer();
                key
            })
            .collect();
        on_cleared(&dropped);
        dropped
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        rw_read(&self.entries, SOURCE, "keys").keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use futures::FutureExt;
    use serde_json::json;

    use super::*;
    use crate::cache::normalize::{EntityAdapter, Record};

    fn done() -> SharedRequest {
        async {}.boxed().shared()
    }

    fn entry() -> CacheEntry {
        CacheEntry::new(CacheKey::unit("getPosts"), Value::Null, 1)
    }

    fn posts(ids: &[&str]) -> EntryData {
        let records = ids
            .iter()
            .map(|id| Record::from_value(json!({ "id": id })).expect("record"));
        EntryData::Collection(EntityAdapter::new().normalize(records))
    }

    fn ok(ids: &[&str]) -> Result<(EntryData, HashSet<Tag>), String> {
        Ok((posts(ids), HashSet::from([Tag::any("Post")])))
    }

    #[test]
    fn new_entry_needs_a_fetch() {
        let entry = entry();
        assert_eq!(entry.status(), QueryStatus::Uninitialized);
        assert!(entry.needs_fetch());
        assert!(!entry.is_stale());
    }

    #[test]
    fn pending_entry_shares_its_request() {
        let mut entry = entry();
        entry.begin_request(1, done());
        assert_eq!(entry.status(), QueryStatus::Pending);
        assert!(!entry.needs_fetch());
        assert!(entry.current_inflight().is_some());
    }

    #[test]
    fn fulfilled_then_rejected_keeps_previous_data() {
        let mut entry = entry();
        entry.begin_request(1, done());
        entry.complete(1, ok(&["a"]));

        entry.begin_request(2, done());
        assert!(entry.data().is_some(), "stale-while-revalidate");
        let completion = entry.complete(2, Err("boom".to_string()));

        assert_eq!(
            completion,
            Completion::Applied {
                status: QueryStatus::Rejected
            }
        );
        let snapshot = entry.snapshot();
        assert_eq!(snapshot.error.as_deref(), Some("boom"));
        assert_eq!(snapshot.data.as_deref(), Some(&posts(&["a"])));
    }

    #[test]
    fn first_failure_leaves_data_empty() {
        let mut entry = entry();
        entry.begin_request(1, done());
        entry.complete(1, Err("down".to_string()));
        assert_eq!(entry.status(), QueryStatus::Rejected);
        assert!(entry.data().is_none());
        assert!(entry.needs_fetch());
    }

    #[test]
    fn older_completion_after_newer_is_discarded() {
        let mut entry = entry();
        entry.begin_request(1, done());
        entry.begin_request(2, done());

        entry.complete(2, ok(&["new"]));
        assert_eq!(entry.complete(1, ok(&["old"])), Completion::Superseded);

        assert_eq!(entry.status(), QueryStatus::Fulfilled);
        assert_eq!(entry.data().map(|d| d.ids()), Some(vec!["new".to_string()]));
    }

    #[test]
    fn older_completion_first_keeps_entry_pending() {
        let mut entry = entry();
        entry.begin_request(1, done());
        entry.begin_request(2, done());

        assert_eq!(
            entry.complete(1, ok(&["old"])),
            Completion::Applied {
                status: QueryStatus::Pending
            }
        );
        entry.complete(2, ok(&["new"]));
        assert_eq!(entry.status(), QueryStatus::Fulfilled);
        assert_eq!(entry.data().map(|d| d.ids()), Some(vec!["new".to_string()]));
    }

    #[test]
    fn invalidation_marks_result_stale_until_refetched() {
        let mut entry = entry();
        entry.begin_request(1, done());
        entry.complete(1, ok(&["a"]));

        entry.invalidate(2);
        assert!(entry.is_stale());
        assert!(entry.needs_fetch());

        entry.begin_request(2, done());
        entry.complete(2, ok(&["a"]));
        assert!(!entry.is_stale());
    }

    #[test]
    fn invalidation_while_pending_rejects_the_inflight_request() {
        let mut entry = entry();
        entry.begin_request(1, done());
        entry.complete(1, ok(&["a"]));
        entry.begin_request(2, done());

        entry.invalidate(3);
        assert!(entry.current_inflight().is_none());
        assert!(entry.needs_fetch());

        entry.complete(2, ok(&["a"]));
        assert!(entry.is_stale(), "result issued before the invalidation");
    }

    #[test]
    fn subscriber_accounting() {
        let mut entry = entry();
        assert!(entry.add_subscriber());
        assert!(!entry.add_subscriber());
        assert_eq!(entry.remove_subscriber(), 1);
        assert_eq!(entry.remove_subscriber(), 0);
        assert_eq!(entry.remove_subscriber(), 0);
    }

    #[test]
    fn eviction_epoch_is_invalidated_by_new_subscriber() {
        let mut entry = entry();
        let epoch = entry.arm_eviction(None);
        assert!(entry.can_evict(epoch));

        entry.add_subscriber();
        entry.remove_subscriber();
        assert!(!entry.can_evict(epoch), "timer from a previous epoch");
    }

    #[test]
    fn store_creates_and_removes_entries() {
        let store = EntryStore::new();
        let key = CacheKey::unit("getPosts");

        let count = store.with_entry(
            &key,
            || CacheEntry::new(key.clone(), Value::Null, 1),
            |entry| {
                entry.add_subscriber();
                entry.subscriber_count()
            },
        );
        assert_eq!(count, 1);
        assert!(store.contains(&key));

        assert!(store.remove_if(&key, |entry| entry.subscriber_count() == 0, |_| {}).is_none());
        store.with_existing(&key, |entry| entry.remove_subscriber());
        assert!(store.remove_if(&key, |entry| entry.subscriber_count() == 0, |_| {}).is_some());
        assert_eq!(store.snapshot(&key).status, QueryStatus::Uninitialized);
    }

    #[test]
    fn cleanup_hooks_run_under_the_store_lock() {
        let store = EntryStore::new();
        let key = CacheKey::unit("getPosts");
        store.with_entry(&key, || CacheEntry::new(key.clone(), Value::Null, 7), |_| ());

        let mut locked_during_removal = false;
        let removed = store.remove_if(
            &key,
            |_| true,
            |entry| {
                assert_eq!(entry.instance(), 7);
                locked_during_removal = store.entries.try_read().is_err();
            },
        );
        assert!(removed.is_some());
        assert!(locked_during_removal);

        store.with_entry(&key, || CacheEntry::new(key.clone(), Value::Null, 8), |_| ());
        let mut locked_during_clear = false;
        let dropped = store.clear(|keys| {
            assert_eq!(keys, [key.clone()]);
            locked_during_clear = store.entries.try_read().is_err();
        });
        assert_eq!(dropped.len(), 1);
        assert!(locked_during_clear);
        assert!(store.is_empty());
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let store = EntryStore::new();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.entries.write().expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        let key = CacheKey::unit("getPosts");
        store.with_entry(&key, || CacheEntry::new(key.clone(), Value::Null, 1), |_| ());
        assert_eq!(store.len(), 1);
    }
}
