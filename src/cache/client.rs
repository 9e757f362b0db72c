//! Request orchestrator.
//!
//! `QueryClient` is the only writer of the entry store. It deduplicates
//! queries per cache key, settles completions in request order, invalidates
//! tags after mutations and manages subscriptions, eviction timers and push
//! streams.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::FutureExt;
use metrics::{counter, histogram};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

use crate::application::transport::{ApiRequest, StreamConnector, Transport};

use super::config::CacheConfig;
use super::endpoint::{ApiDefinition, EndpointDefinition, EndpointKind, EntryData};
use super::error::CacheError;
use super::events::{EventKind, EventQueue};
use super::keys::{CacheKey, Tag};
use super::metadata::{MetadataProjector, NotificationMetadata};
use super::normalize::{Entity, Record};
use super::realtime::{PushSink, RealtimeEngine};
use super::registry::TagIndex;
use super::store::{CacheEntry, Completion, EntrySnapshot, EntryStore, SharedRequest};

const METRIC_CACHE_HIT: &str = "murmur_query_cache_hit_total";
const METRIC_CACHE_MISS: &str = "murmur_query_cache_miss_total";
const METRIC_DEDUP: &str = "murmur_query_dedup_total";
const METRIC_REQUEST: &str = "murmur_query_request_total";
const METRIC_REQUEST_MS: &str = "murmur_query_request_ms";
const METRIC_STALE_COMPLETION: &str = "murmur_query_stale_completion_total";
const METRIC_EVICT: &str = "murmur_query_evict_total";
const METRIC_MUTATION: &str = "murmur_mutation_total";
const METRIC_TAG_INVALIDATION: &str = "murmur_tag_invalidation_total";
const METRIC_PUSH_MERGED: &str = "murmur_push_merged_total";

/// Admission predicate evaluated against the current entry before a query
/// may issue a request.
pub type Condition = Arc<dyn Fn(&EntrySnapshot) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct QueryOptions {
    pub condition: Option<Condition>,
    /// Issue a new request even if a fresh result or a shared request exists.
    pub force_refetch: bool,
}

impl QueryOptions {
    pub fn with_condition(
        condition: impl Fn(&EntrySnapshot) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            condition: Some(Arc::new(condition)),
            force_refetch: false,
        }
    }

    pub fn force() -> Self {
        Self {
            condition: None,
            force_refetch: true,
        }
    }
}

/// How a query call was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource {
    /// Served from a fresh cached result.
    Cached,
    /// This call issued the request.
    Fetched,
    /// Joined a request already in flight.
    Deduplicated,
    /// The admission condition declined; nothing changed.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub snapshot: EntrySnapshot,
    pub source: QuerySource,
}

/// Previous data of an entry, returned by [`QueryClient::update_cached`].
#[derive(Debug, Clone)]
pub struct CachePatch {
    key: CacheKey,
    previous: Arc<EntryData>,
    settled_request_id: u64,
}

impl CachePatch {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

enum Admission {
    Hit,
    Join(SharedRequest),
    Issued(SharedRequest),
    NoRuntime,
}

pub struct QueryClientBuilder {
    config: CacheConfig,
    api: ApiDefinition,
    transport: Arc<dyn Transport>,
    realtime: Option<RealtimeEngine>,
}

impl QueryClientBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn realtime(mut self, connector: Arc<dyn StreamConnector>, url: impl Into<String>) -> Self {
        self.realtime = Some(RealtimeEngine::new(connector, url));
        self
    }

    pub fn build(self) -> QueryClient {
        let events = EventQueue::new_with_limit(self.config.event_queue_limit_non_zero());
        QueryClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                api: self.api,
                transport: self.transport,
                realtime: self.realtime,
                store: EntryStore::new(),
                tags: TagIndex::new(),
                metadata: MetadataProjector::new(),
                events,
                request_ids: AtomicU64::new(1),
                entry_instances: AtomicU64::new(1),
            }),
        }
    }
}

/// Handle to the query cache. Cheap to clone; all clones share one store.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("entries", &self.inner.store.len())
            .field("endpoints", &self.inner.api.len())
            .finish()
    }
}

impl QueryClient {
    pub fn builder(api: ApiDefinition, transport: Arc<dyn Transport>) -> QueryClientBuilder {
        QueryClientBuilder {
            config: CacheConfig::default(),
            api,
            transport,
            realtime: None,
        }
    }

    /// Memoized, deduplicated query.
    pub async fn query(&self, endpoint: &str, args: Value) -> Result<QueryResult, CacheError> {
        self.query_with(endpoint, args, QueryOptions::default())
            .await
    }

    /// Query bypassing the cache and any shared request.
    pub async fn refetch(&self, endpoint: &str, args: Value) -> Result<QueryResult, CacheError> {
        self.query_with(endpoint, args, QueryOptions::force()).await
    }

    #[instrument(skip(self, args, options), fields(cache_key))]
    pub async fn query_with(
        &self,
        endpoint: &str,
        args: Value,
        options: QueryOptions,
    ) -> Result<QueryResult, CacheError> {
        let inner = &self.inner;
        let definition = inner.api.expect_kind(endpoint, EndpointKind::Query)?;
        let key = definition.cache_key(&args);
        tracing::Span::current().record("cache_key", tracing::field::display(&key));

        if let Some(condition) = &options.condition {
            let current = inner.store.snapshot(&key);
            if !condition(&current) {
                debug!("Query skipped by admission condition");
                return Ok(QueryResult {
                    snapshot: current,
                    source: QuerySource::Skipped,
                });
            }
        }

        let admission = inner.store.with_entry(
            &key,
            || inner.new_entry(&key, &args),
            |entry| {
                if !options.force_refetch && !entry.needs_fetch() {
                    return match entry.current_inflight() {
                        Some(done) => Admission::Join(done),
                        None => Admission::Hit,
                    };
                }
                match inner.start_request(entry, Arc::clone(&definition)) {
                    Some(done) => Admission::Issued(done),
                    None => Admission::NoRuntime,
                }
            },
        );

        let source = match admission {
            Admission::Hit => {
                counter!(METRIC_CACHE_HIT, "endpoint" => definition.name).increment(1);
                QuerySource::Cached
            }
            Admission::Join(done) => {
                counter!(METRIC_DEDUP, "endpoint" => definition.name).increment(1);
                done.await;
                QuerySource::Deduplicated
            }
            Admission::Issued(done) => {
                counter!(METRIC_CACHE_MISS, "endpoint" => definition.name).increment(1);
                done.await;
                QuerySource::Fetched
            }
            Admission::NoRuntime => return Err(CacheError::NoRuntime),
        };

        Ok(QueryResult {
            snapshot: inner.store.snapshot(&key),
            source,
        })
    }

    /// Run a mutation. Mutations are never deduplicated; on success the tags
    /// the endpoint declares are invalidated.
    #[instrument(skip(self, args))]
    pub async fn mutate(&self, endpoint: &str, args: Value) -> Result<EntryData, CacheError> {
        let inner = &self.inner;
        let definition = inner.api.expect_kind(endpoint, EndpointKind::Mutation)?;
        let request = definition.build_request(&args)?;
        let mutation_id = inner.request_ids.fetch_add(1, Ordering::SeqCst);
        counter!(METRIC_MUTATION, "endpoint" => definition.name).increment(1);
        info!(mutation_id, request = %request, "Mutation issued");

        let outcome = match inner.transport.issue_request(request).await {
            Ok(value) => definition.shape.shape(definition.name, value),
            Err(err) => Err(err.into()),
        };
        let data = match outcome {
            Ok(data) => data,
            Err(err) => {
                warn!(mutation_id, error = %err, "Mutation rejected");
                inner.events.publish(EventKind::MutationRejected {
                    endpoint: definition.name.to_string(),
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        inner.events.publish(EventKind::MutationFulfilled {
            endpoint: definition.name.to_string(),
        });
        let tags = (definition.invalidates)(Some(&data), &args);
        inner.invalidate_tags(&tags);
        Ok(data)
    }

    /// Invalidate tags directly, as a successful mutation would.
    pub fn invalidate_tags(&self, tags: &[Tag]) -> Vec<CacheKey> {
        self.inner.invalidate_tags(tags)
    }

    /// Register interest in a query result.
    ///
    /// Creates the entry if needed, cancels a pending eviction, fetches when
    /// the entry is empty, rejected or stale, and opens the push stream for
    /// real-time endpoints on the first subscriber. Outside a runtime the
    /// subscription is registered but nothing is fetched or opened.
    pub fn subscribe(&self, endpoint: &str, args: Value) -> Result<Subscription, CacheError> {
        let inner = &self.inner;
        let definition = inner.api.expect_kind(endpoint, EndpointKind::Query)?;
        let key = definition.cache_key(&args);

        let first = inner.store.with_entry(
            &key,
            || inner.new_entry(&key, &args),
            |entry| {
                let first = entry.add_subscriber();
                if entry.needs_fetch() {
                    inner.start_request(entry, Arc::clone(&definition));
                }
                first
            },
        );
        debug!(cache_key = %key, first, "Subscribed");

        if first && definition.realtime {
            inner.attach_stream(&key);
        }

        Ok(Subscription {
            client: self.clone(),
            key,
            active: true,
        })
    }

    pub fn snapshot(&self, key: &CacheKey) -> EntrySnapshot {
        self.inner.store.snapshot(key)
    }

    /// Snapshot by endpoint name and argument.
    pub fn snapshot_of(&self, endpoint: &str, args: &Value) -> EntrySnapshot {
        self.snapshot(&CacheKey::new(endpoint, args))
    }

    /// Apply a caller-side change to an entry's cached data.
    ///
    /// Returns a patch to [`undo`](Self::undo) it, or `None` if the entry
    /// holds no data.
    pub fn update_cached(
        &self,
        key: &CacheKey,
        update: impl FnOnce(&mut EntryData),
    ) -> Option<CachePatch> {
        self.inner
            .store
            .with_existing(key, |entry| {
                let previous = Arc::clone(entry.data()?);
                let settled_request_id = entry.settled_request_id();
                update(entry.data_mut()?);
                Some(CachePatch {
                    key: key.clone(),
                    previous,
                    settled_request_id,
                })
            })
            .flatten()
    }

    /// Restore the data captured by `patch`, unless the entry was refetched since.
    pub fn undo(&self, patch: CachePatch) -> bool {
        let key = patch.key.clone();
        let restored = self
            .inner
            .store
            .with_existing(&key, |entry| {
                if entry.settled_request_id() != patch.settled_request_id {
                    return false;
                }
                entry.replace_data(patch.previous);
                true
            })
            .unwrap_or(false);
        debug!(cache_key = %key, restored, "Optimistic patch undone");
        restored
    }

    /// Merge a batch into a collection entry, as a push message would.
    pub fn merge_batch(&self, key: &CacheKey, batch: Vec<Record>) -> Result<Vec<String>, CacheError> {
        self.inner.merge_batch(key, batch)
    }

    /// Issue a one-off request and merge its records into `key`'s collection.
    pub async fn fetch_into(
        &self,
        key: &CacheKey,
        request: ApiRequest,
    ) -> Result<Vec<String>, CacheError> {
        let value = self.inner.transport.issue_request(request).await?;
        let batch = Record::list_from_value(value)
            .map_err(|source| CacheError::malformed(key.endpoint(), source))?;
        self.inner.merge_batch(key, batch)
    }

    pub fn mark_all_read(&self) {
        self.inner.metadata.mark_all_read();
    }

    pub fn unread_count(&self) -> usize {
        self.inner.metadata.unread_count()
    }

    pub fn notification_metadata(&self, id: &str) -> Option<NotificationMetadata> {
        self.inner.metadata.get(id)
    }

    pub fn metadata(&self) -> &MetadataProjector {
        &self.inner.metadata
    }

    pub fn events(&self) -> &EventQueue {
        &self.inner.events
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.inner.tags
    }

    pub fn is_stream_open(&self, key: &CacheKey) -> bool {
        self.inner
            .realtime
            .as_ref()
            .is_some_and(|realtime| realtime.is_open(key))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.store.contains(key)
    }

    pub fn entry_count(&self) -> usize {
        self.inner.store.len()
    }

    pub fn api(&self) -> &ApiDefinition {
        &self.inner.api
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Drop all cached state: entries, tag registrations, notification
    /// metadata and push streams. In-flight requests settle into nothing.
    pub fn reset(&self) {
        let inner = &self.inner;
        let mut closed = 0;
        let dropped = inner.store.clear(|_| {
            inner.tags.clear();
            closed = inner
                .realtime
                .as_ref()
                .map_or(0, |realtime| realtime.close_all());
        });
        inner.metadata.reset();
        inner.events.clear();
        inner.events.publish(EventKind::Reset);
        info!(entries = dropped.len(), streams = closed, "Query cache reset");
    }
}

/// Interest of one consumer in one cache entry. Dropping it unsubscribes.
pub struct Subscription {
    client: QueryClient,
    key: CacheKey,
    active: bool,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        self.client.snapshot(&self.key)
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::take(&mut self.active) {
            self.client.inner.unsubscribe(&self.key);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("active", &self.active)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

struct ClientInner {
    config: CacheConfig,
    api: ApiDefinition,
    transport: Arc<dyn Transport>,
    realtime: Option<RealtimeEngine>,
    store: EntryStore,
    tags: TagIndex,
    metadata: MetadataProjector,
    events: EventQueue,
    request_ids: AtomicU64,
    entry_instances: AtomicU64,
}

impl ClientInner {
    fn new_entry(&self, key: &CacheKey, args: &Value) -> CacheEntry {
        let instance = self.entry_instances.fetch_add(1, Ordering::SeqCst);
        CacheEntry::new(key.clone(), args.clone(), instance)
    }

    /// Issue a request for `entry` and move it to `Pending`.
    ///
    /// The request runs on its own task so that dropping every caller does
    /// not cancel it. Without a runtime nothing is issued and the entry is
    /// left as it was.
    fn start_request(
        self: &Arc<Self>,
        entry: &mut CacheEntry,
        definition: Arc<EndpointDefinition>,
    ) -> Option<SharedRequest> {
        let Ok(runtime) = Handle::try_current() else {
            warn!(cache_key = %entry.key(), "No async runtime; query request not issued");
            return None;
        };
        let request_id = self.request_ids.fetch_add(1, Ordering::SeqCst);
        let key = entry.key().clone();
        let args = entry.args().clone();
        let instance = entry.instance();

        let inner = Arc::clone(self);
        let task_key = key.clone();
        let task = runtime.spawn(async move {
            inner
                .run_request(definition, task_key, args, instance, request_id)
                .await;
        });
        let done = async move {
            if let Err(err) = task.await
                && !err.is_cancelled()
            {
                warn!(error = %err, "Query request task failed");
            }
        }
        .boxed()
        .shared();

        entry.begin_request(request_id, done.clone());
        info!(cache_key = %key, request_id, "Query request issued");
        self.events.publish(EventKind::QueryStarted { key, request_id });
        Some(done)
    }

    async fn run_request(
        &self,
        definition: Arc<EndpointDefinition>,
        key: CacheKey,
        args: Value,
        instance: u64,
        request_id: u64,
    ) {
        counter!(METRIC_REQUEST, "endpoint" => definition.name).increment(1);
        let started_at = Instant::now();
        let result = match definition.build_request(&args) {
            Ok(request) => match self.transport.issue_request(request).await {
                Ok(value) => definition.shape.shape(definition.name, value),
                Err(err) => Err(err.into()),
            },
            Err(err) => Err(err),
        };
        histogram!(METRIC_REQUEST_MS, "endpoint" => definition.name)
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        self.settle(&definition, &key, &args, instance, request_id, result);
    }

    fn settle(
        &self,
        definition: &EndpointDefinition,
        key: &CacheKey,
        args: &Value,
        instance: u64,
        request_id: u64,
        result: Result<EntryData, CacheError>,
    ) {
        let projected = match &result {
            Ok(data) if definition.projects_metadata => Some(data.ids()),
            _ => None,
        };
        let error = result.as_ref().err().map(ToString::to_string);
        let outcome = result
            .map(|data| {
                let tags: HashSet<Tag> = (definition.provides)(Some(&data), args)
                    .into_iter()
                    .collect();
                (data, tags)
            })
            .map_err(|err| err.to_string());

        let completion = self
            .store
            .with_existing(key, |entry| {
                if entry.instance() != instance {
                    return None;
                }
                let provided = outcome.as_ref().ok().map(|(_, tags)| tags.clone());
                let completion = entry.complete(request_id, outcome);
                if let (Completion::Applied { .. }, Some(tags)) = (completion, provided) {
                    self.tags.register(key, tags);
                }
                Some(completion)
            })
            .flatten();

        match (completion, error) {
            (None, _) => {
                debug!(cache_key = %key, request_id, "Completion dropped: entry was evicted or reset");
            }
            (Some(Completion::Superseded), _) => {
                counter!(METRIC_STALE_COMPLETION, "endpoint" => definition.name).increment(1);
                info!(cache_key = %key, request_id, "Discarded out-of-order completion");
                self.events.publish(EventKind::StaleCompletionDiscarded {
                    key: key.clone(),
                    request_id,
                });
            }
            (Some(Completion::Applied { status }), None) => {
                debug!(cache_key = %key, request_id, status = ?status, "Query fulfilled");
                if let Some(ids) = projected {
                    self.metadata.on_batch(ids.iter().map(String::as_str));
                }
                self.events.publish(EventKind::QueryFulfilled {
                    key: key.clone(),
                    request_id,
                });
            }
            (Some(Completion::Applied { status }), Some(error)) => {
                warn!(cache_key = %key, request_id, status = ?status, error = %error, "Query rejected");
                self.events.publish(EventKind::QueryRejected {
                    key: key.clone(),
                    request_id,
                    error,
                });
            }
        }
    }

    fn invalidate_tags(self: &Arc<Self>, tags: &[Tag]) -> Vec<CacheKey> {
        if tags.is_empty() {
            return Vec::new();
        }
        let mut affected: Vec<CacheKey> = self.tags.invalidate(tags).into_iter().collect();
        affected.sort();

        let next_request_id = self.request_ids.load(Ordering::SeqCst);
        let refetched = self
            .store
            .with_each(&affected, |entry| {
                entry.invalidate(next_request_id);
                if entry.subscriber_count() == 0 || !entry.needs_fetch() {
                    return false;
                }
                match self.api.get(entry.key().endpoint()) {
                    Ok(definition) => self.start_request(entry, definition).is_some(),
                    Err(err) => {
                        warn!(cache_key = %entry.key(), error = %err, "Cannot refetch invalidated entry");
                        false
                    }
                }
            })
            .into_iter()
            .filter(|refetched| *refetched)
            .count();

        counter!(METRIC_TAG_INVALIDATION).increment(1);
        info!(
            tags = ?tags,
            affected = affected.len(),
            refetched,
            "Tags invalidated"
        );
        self.events.publish(EventKind::TagsInvalidated {
            tags: tags.to_vec(),
            affected: affected.clone(),
        });
        affected
    }

    fn grace_period(&self, key: &CacheKey) -> Duration {
        self.api
            .get(key.endpoint())
            .ok()
            .and_then(|definition| definition.keep_unused_for)
            .unwrap_or_else(|| self.config.keep_unused_for())
    }

    fn unsubscribe(self: &Arc<Self>, key: &CacheKey) {
        let grace = self.grace_period(key);
        let evict_now = self.store.with_existing(key, |entry| {
            if entry.remove_subscriber() > 0 {
                return None;
            }
            let epoch = entry.arm_eviction(None);
            let Ok(runtime) = Handle::try_current() else {
                return Some(epoch);
            };
            let deadline = tokio::time::Instant::now() + grace;
            let weak = Arc::downgrade(self);
            let timer_key = key.clone();
            let timer = runtime.spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if let Some(inner) = weak.upgrade() {
                    inner.evict_if_unused(&timer_key, epoch);
                }
            });
            entry.set_eviction_timer(timer.abort_handle());
            debug!(cache_key = %key, grace_ms = grace.as_millis() as u64, "Eviction timer armed");
            None
        });

        if let Some(Some(epoch)) = evict_now {
            warn!(cache_key = %key, "No async runtime for eviction timer; evicting immediately");
            self.evict_if_unused(key, epoch);
        }
    }

    fn evict_if_unused(&self, key: &CacheKey, epoch: u64) -> bool {
        let removed = self.store.remove_if(
            key,
            |entry| entry.can_evict(epoch),
            |_| {
                self.tags.unregister(key);
                if let Some(realtime) = &self.realtime {
                    realtime.close(key);
                }
            },
        );
        if removed.is_none() {
            return false;
        }
        counter!(METRIC_EVICT, "endpoint" => key.endpoint().to_string()).increment(1);
        info!(cache_key = %key, "Cache entry evicted");
        self.events
            .publish(EventKind::EntryEvicted { key: key.clone() });
        true
    }

    fn attach_stream(self: &Arc<Self>, key: &CacheKey) {
        if !self.config.realtime_enabled {
            return;
        }
        let Some(realtime) = &self.realtime else {
            debug!(cache_key = %key, "Real-time endpoint subscribed without a stream connector");
            return;
        };
        let sink: Weak<dyn PushSink> = Arc::downgrade(self) as Weak<dyn PushSink>;
        realtime.open(key, sink);
    }

    fn merge_batch(&self, key: &CacheKey, batch: Vec<Record>) -> Result<Vec<String>, CacheError> {
        let definition = self.api.get(key.endpoint())?;
        let adapter = definition
            .shape
            .adapter()
            .ok_or_else(|| CacheError::NotACollection(key.clone()))?;
        let ids: Vec<String> = batch.iter().map(|record| record.id().to_string()).collect();

        self.store
            .with_existing(key, |entry| {
                if entry.data().is_none() {
                    entry.replace_data(Arc::new(EntryData::Collection(adapter.normalize(batch))));
                    return Ok(());
                }
                match entry.data_mut() {
                    Some(EntryData::Collection(collection)) => {
                        adapter.upsert_many(collection, batch);
                        Ok(())
                    }
                    _ => Err(CacheError::NotACollection(key.clone())),
                }
            })
            .ok_or_else(|| CacheError::MissingEntry(key.clone()))??;

        if definition.projects_metadata {
            self.metadata.on_batch(ids.iter().map(String::as_str));
        }
        counter!(METRIC_PUSH_MERGED, "endpoint" => definition.name).increment(1);
        debug!(cache_key = %key, merged = ids.len(), "Batch merged into cached collection");
        self.events.publish(EventKind::PushMerged {
            key: key.clone(),
            ids: ids.clone(),
        });
        Ok(ids)
    }
}

impl PushSink for ClientInner {
    fn deliver(&self, key: &CacheKey, batch: Vec<Record>) -> Result<Vec<String>, CacheError> {
        self.merge_batch(key, batch)
    }

    fn dropped(&self, key: &CacheKey, reason: String) {
        self.events.publish(EventKind::PushDropped {
            key: key.clone(),
            reason,
        });
    }
}

