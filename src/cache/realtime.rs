//! Real-time merge engine.
//!
//! Owns at most one push stream per cache entry. Inbound frames are parsed
//! into notification batches and handed to a [`PushSink`], which merges them
//! into the entry's collection and projects metadata.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::StreamExt;
use metrics::counter;
use murmur_api_types::{NOTIFICATIONS_MESSAGE_TYPE, ServerNotification, StreamEnvelope};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::application::transport::StreamConnector;

use super::error::CacheError;
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::normalize::Record;

const SOURCE: &str = "cache::realtime";
const METRIC_PUSH_DROPPED: &str = "murmur_push_dropped_total";

/// Receiver of parsed push batches.
pub trait PushSink: Send + Sync {
    fn deliver(&self, key: &CacheKey, batch: Vec<Record>) -> Result<Vec<String>, CacheError>;

    fn dropped(&self, key: &CacheKey, reason: String);
}

/// Parse one frame. `Ok(None)` means a well-formed message of another type.
pub fn parse_frame(frame: &str) -> Result<Option<Vec<Record>>, String> {
    let envelope: StreamEnvelope =
        serde_json::from_str(frame).map_err(|err| format!("invalid envelope: {err}"))?;
    if envelope.kind != NOTIFICATIONS_MESSAGE_TYPE {
        return Ok(None);
    }
    let notifications: Vec<ServerNotification> = serde_json::from_value(envelope.payload)
        .map_err(|err| format!("invalid notifications payload: {err}"))?;
    notifications
        .iter()
        .map(Record::from_typed)
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
        .map_err(|err| format!("invalid notification record: {err}"))
}

/// One open push stream.
pub struct StreamHandle {
    key: CacheKey,
    closed: Arc<AtomicBool>,
    task: Mutex<Option<AbortHandle>>,
}

impl StreamHandle {
    fn new(key: CacheKey) -> Self {
        Self {
            key,
            closed: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Guard for every use of the stream after it was opened.
    pub fn ensure_open(&self) -> Result<(), CacheError> {
        if self.is_closed() {
            return Err(CacheError::StreamClosed(self.key.clone()));
        }
        Ok(())
    }

    /// Close the stream. Only the first call has an effect; later calls are
    /// reported and return false.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            warn!(cache_key = %self.key, "Push stream close requested twice; ignoring");
            return false;
        }
        if let Some(task) = mutex_lock(&self.task, SOURCE, "close").take() {
            task.abort();
        }
        info!(cache_key = %self.key, "Push stream closed");
        true
    }
}

pub struct RealtimeEngine {
    connector: Arc<dyn StreamConnector>,
    url: String,
    streams: Mutex<HashMap<CacheKey, Arc<StreamHandle>>>,
}

impl RealtimeEngine {
    pub fn new(connector: Arc<dyn StreamConnector>, url: impl Into<String>) -> Self {
        Self {
            connector,
            url: url.into(),
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the stream for `key` unless one is already open.
    ///
    /// Returns false when a stream was already attached or no runtime is
    /// available to drive it.
    pub fn open(&self, key: &CacheKey, sink: Weak<dyn PushSink>) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            warn!(cache_key = %key, "No async runtime; push stream not opened");
            return false;
        };
        let mut streams = mutex_lock(&self.streams, SOURCE, "open");
        if streams.get(key).is_some_and(|handle| !handle.is_closed()) {
            return false;
        }

        let handle = Arc::new(StreamHandle::new(key.clone()));
        let task = runtime.spawn(run_stream(
            Arc::clone(&self.connector),
            self.url.clone(),
            Arc::clone(&handle),
            sink,
        ));
        *mutex_lock(&handle.task, SOURCE, "open.task") = Some(task.abort_handle());
        streams.insert(key.clone(), handle);
        info!(cache_key = %key, url = %self.url, "Push stream opened");
        true
    }

    pub fn is_open(&self, key: &CacheKey) -> bool {
        mutex_lock(&self.streams, SOURCE, "is_open")
            .get(key)
            .is_some_and(|handle| !handle.is_closed())
    }

    /// Close and forget the stream for `key`, if any.
    pub fn close(&self, key: &CacheKey) -> bool {
        let handle = mutex_lock(&self.streams, SOURCE, "close").remove(key);
        handle.is_some_and(|handle| handle.close())
    }

    pub fn close_all(&self) -> usize {
        let handles: Vec<_> = mutex_lock(&self.streams, SOURCE, "close_all")
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        handles.iter().filter(|handle| handle.close()).count()
    }

    pub fn open_count(&self) -> usize {
        mutex_lock(&self.streams, SOURCE, "open_count")
            .values()
            .filter(|handle| !handle.is_closed())
            .count()
    }
}

async fn run_stream(
    connector: Arc<dyn StreamConnector>,
    url: String,
    handle: Arc<StreamHandle>,
    sink: Weak<dyn PushSink>,
) {
    let mut stream = match connector.open_stream(&url).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(cache_key = %handle.key, error = %err, "Push stream failed to open");
            return;
        }
    };

    while let Some(frame) = stream.next().await {
        if let Err(err) = handle.ensure_open() {
            counter!(METRIC_PUSH_DROPPED, "reason" => "closed").increment(1);
            debug!(error = %err, "Dropped push message received after close");
            break;
        }
        let Some(target) = sink.upgrade() else {
            break;
        };

        match parse_frame(&frame) {
            Ok(Some(batch)) => {
                if let Err(err) = target.deliver(&handle.key, batch) {
                    counter!(METRIC_PUSH_DROPPED, "reason" => "merge").increment(1);
                    warn!(cache_key = %handle.key, error = %err, "Push batch could not be merged");
                    target.dropped(&handle.key, err.to_string());
                }
            }
            Ok(None) => {
                debug!(cache_key = %handle.key, "Ignored push message of unrelated type");
            }
            Err(reason) => {
                counter!(METRIC_PUSH_DROPPED, "reason" => "malformed").increment(1);
                warn!(cache_key = %handle.key, reason = %reason, "Dropped malformed push message");
                target.dropped(&handle.key, reason);
            }
        }
    }
    debug!(cache_key = %handle.key, "Push stream ended");
}
