use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::DebuggingRecorder;
use murmur::application::api::{ADD_NEW_POST, GET_POSTS, build_api};
use murmur::application::notifications::NotificationsService;
use murmur::cache::{CacheConfig, QueryClient, QueryStatus, Record};
use murmur::infra::fake_api::FakeApi;
use serde_json::{Value, json};

async fn until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition was not reached in time");
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let api = Arc::new(FakeApi::default().with_latency(Duration::from_millis(5)));
    let client = QueryClient::builder(build_api(), api.clone())
        .config(CacheConfig {
            keep_unused_for_secs: 0,
            event_queue_limit: 1,
            ..CacheConfig::default()
        })
        .realtime(api.clone(), "ws://localhost/ws")
        .build();

    // Miss, dedup and hit
    let (first, second) = tokio::join!(
        client.query(GET_POSTS, Value::Null),
        client.query(GET_POSTS, Value::Null)
    );
    first.expect("first query");
    second.expect("second query");
    client.query(GET_POSTS, Value::Null).await.expect("cached");

    // Mutation plus tag invalidation
    client
        .mutate(
            ADD_NEW_POST,
            json!({ "title": "Metrics", "content": "body", "user": "0" }),
        )
        .await
        .expect("mutation");

    // Push merge and drop over the stream
    let notifications = NotificationsService::new(client.clone());
    let subscription = notifications.subscribe().expect("subscribe");
    until(|| subscription.snapshot().status == QueryStatus::Fulfilled).await;
    assert!(api.wait_for_listeners(1).await);
    api.push_raw("not a frame");
    api.push_notifications(1);
    until(|| notifications.unread_count() == 1).await;
    let polled = Record::from_value(json!({ "id": "local", "date": "0" })).expect("record");
    client
        .merge_batch(&NotificationsService::key(), vec![polled])
        .expect("merge");

    // Eviction with a zero grace period
    subscription.unsubscribe();
    until(|| !client.contains(&NotificationsService::key())).await;

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for expected in [
        "murmur_query_cache_miss_total",
        "murmur_query_dedup_total",
        "murmur_query_cache_hit_total",
        "murmur_query_request_total",
        "murmur_query_request_ms",
        "murmur_mutation_total",
        "murmur_tag_invalidation_total",
        "murmur_push_merged_total",
        "murmur_push_dropped_total",
        "murmur_query_evict_total",
        "murmur_cache_event_queue_len",
        "murmur_cache_event_dropped_total",
    ] {
        assert!(names.contains(expected), "missing metric key: {expected}");
    }
}
