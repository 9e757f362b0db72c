use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register units and help text for every metric the cache emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "murmur_query_cache_hit_total",
            Unit::Count,
            "Queries answered from a fresh cached result."
        );
        describe_counter!(
            "murmur_query_cache_miss_total",
            Unit::Count,
            "Queries that issued a new request."
        );
        describe_counter!(
            "murmur_query_dedup_total",
            Unit::Count,
            "Queries that joined a request already in flight."
        );
        describe_counter!(
            "murmur_query_request_total",
            Unit::Count,
            "Query requests sent to the transport."
        );
        describe_histogram!(
            "murmur_query_request_ms",
            Unit::Milliseconds,
            "Query request latency in milliseconds."
        );
        describe_counter!(
            "murmur_query_stale_completion_total",
            Unit::Count,
            "Out-of-order query completions that were discarded."
        );
        describe_counter!(
            "murmur_query_evict_total",
            Unit::Count,
            "Cache entries evicted after their grace period."
        );
        describe_counter!(
            "murmur_mutation_total",
            Unit::Count,
            "Mutations sent to the transport."
        );
        describe_counter!(
            "murmur_tag_invalidation_total",
            Unit::Count,
            "Tag invalidation passes."
        );
        describe_counter!(
            "murmur_push_merged_total",
            Unit::Count,
            "Push or poll batches merged into cached collections."
        );
        describe_counter!(
            "murmur_push_dropped_total",
            Unit::Count,
            "Push messages dropped as malformed, unmergeable or late."
        );
        describe_gauge!(
            "murmur_cache_event_queue_len",
            Unit::Count,
            "Current number of pending cache events in the queue."
        );
        describe_counter!(
            "murmur_cache_event_dropped_total",
            Unit::Count,
            "Total number of cache events dropped due to queue overflow."
        );
    });
}
