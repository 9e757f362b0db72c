//! In-memory backend implementing both transport capabilities.
//!
//! Serves the posts / users / notifications API from process memory and
//! broadcasts notification batches to every open push stream. Used by the
//! demo binary and by the integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use murmur_api_types::{
    LoginRequest, LoginResponse, Post, PostAdd, PostUpdate, ReactionAdd, Reactions,
    ServerNotification, StreamEnvelope, User,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;
use time::macros::format_description;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::application::transport::{
    ApiRequest, MessageStream, Method, NetworkError, StreamConnector, Transport,
};
use crate::cache::lock::mutex_lock;

const SOURCE: &str = "infra::fake_api";
const PUSH_CAPACITY: usize = 64;
const PARSE_BASE: &str = "http://murmur.invalid";

/// Fixed-width UTC timestamp, so lexical order is chronological order.
pub fn timestamp(at: OffsetDateTime) -> String {
    let format =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");
    at.to_offset(time::UtcOffset::UTC)
        .format(format)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

fn truncate_to_millis(at: OffsetDateTime) -> OffsetDateTime {
    at - time::Duration::nanoseconds(i64::from(at.nanosecond() % 1_000_000))
}

struct BackendState {
    posts: Vec<Post>,
    users: Vec<User>,
    notifications: Vec<ServerNotification>,
    next_post_id: u64,
    next_notification_id: u64,
    last_stamp: OffsetDateTime,
    logged_in: Option<String>,
}

impl BackendState {
    fn seeded(now: OffsetDateTime) -> Self {
        let post = |id: &str, title: &str, content: &str, user: &str, minutes_ago: i64| Post {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            user: user.to_string(),
            date: timestamp(now - time::Duration::minutes(minutes_ago)),
            reactions: Reactions::default(),
        };
        let user = |id: &str, name: &str| User {
            id: id.to_string(),
            name: name.to_string(),
        };
        Self {
            posts: vec![
                post("1", "First Post!", "Hello!", "0", 10),
                post("2", "Second Post", "More text", "2", 5),
            ],
            users: vec![
                user("0", "Tianna Jenkins"),
                user("1", "Kevin Grant"),
                user("2", "Madison Price"),
            ],
            notifications: Vec::new(),
            next_post_id: 3,
            next_notification_id: 1,
            last_stamp: truncate_to_millis(now),
            logged_in: None,
        }
    }

    /// Timestamps strictly increasing at millisecond precision, the
    /// precision of [`timestamp`], and never behind the wall clock.
    fn next_stamp(&mut self) -> OffsetDateTime {
        let now = truncate_to_millis(OffsetDateTime::now_utc());
        let next = if now > self.last_stamp {
            now
        } else {
            self.last_stamp + time::Duration::milliseconds(1)
        };
        self.last_stamp = next;
        next
    }

    fn post_mut(&mut self, id: &str) -> Result<&mut Post, NetworkError> {
        self.posts
            .iter_mut()
            .find(|post| post.id == id)
            .ok_or_else(|| NetworkError::status(404, format!("post {id} not found")))
    }

    fn generate_notifications(&mut self, count: usize) -> Vec<ServerNotification> {
        let batch: Vec<ServerNotification> = (0..count)
            .map(|index| {
                let id = self.next_notification_id;
                self.next_notification_id += 1;
                let user = self.users[index % self.users.len().max(1)].clone();
                ServerNotification {
                    id: format!("n{id}"),
                    date: timestamp(self.next_stamp()),
                    message: format!("{} says hi (#{id})", user.name),
                    user: user.id,
                }
            })
            .collect();
        self.notifications.extend(batch.iter().cloned());
        batch
    }
}

pub struct FakeApi {
    base_url: String,
    state: Mutex<BackendState>,
    pushes: broadcast::Sender<String>,
    failures: Mutex<VecDeque<NetworkError>>,
    requests: Mutex<HashMap<String, usize>>,
    stream_opens: AtomicUsize,
    latency: Option<Duration>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self::new("/fakeApi")
    }
}

impl FakeApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let (pushes, _) = broadcast::channel(PUSH_CAPACITY);
        Self {
            base_url: base_url.into(),
            state: Mutex::new(BackendState::seeded(OffsetDateTime::now_utc())),
            pushes,
            failures: Mutex::new(VecDeque::new()),
            requests: Mutex::new(HashMap::new()),
            stream_opens: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next request with `error`. Queued failures are used in order.
    pub fn fail_next(&self, error: NetworkError) {
        mutex_lock(&self.failures, SOURCE, "fail_next").push_back(error);
    }

    /// How many requests were served for `method` and `path` (query string ignored).
    pub fn request_count(&self, method: Method, path: &str) -> usize {
        mutex_lock(&self.requests, SOURCE, "request_count")
            .get(&format!("{method} {path}"))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        mutex_lock(&self.requests, SOURCE, "total_requests")
            .values()
            .sum()
    }

    pub fn stream_opens(&self) -> usize {
        self.stream_opens.load(Ordering::SeqCst)
    }

    /// Number of push streams currently listening.
    pub fn listeners(&self) -> usize {
        self.pushes.receiver_count()
    }

    /// Wait until at least `count` push streams listen. Gives up after about
    /// a second of runtime time.
    pub async fn wait_for_listeners(&self, count: usize) -> bool {
        for _ in 0..1000 {
            if self.listeners() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        self.listeners() >= count
    }

    pub fn logged_in(&self) -> Option<String> {
        mutex_lock(&self.state, SOURCE, "logged_in").logged_in.clone()
    }

    /// Create `count` notifications and push them to every open stream.
    pub fn push_notifications(&self, count: usize) -> Vec<ServerNotification> {
        let batch = mutex_lock(&self.state, SOURCE, "push_notifications").generate_notifications(count);
        match StreamEnvelope::notifications(&batch) {
            Ok(envelope) => match serde_json::to_string(&envelope) {
                Ok(frame) => self.push_raw(frame),
                Err(err) => warn!(error = %err, "Failed to encode notification frame"),
            },
            Err(err) => warn!(error = %err, "Failed to encode notification batch"),
        }
        batch
    }

    /// Create `count` notifications visible only to polling.
    pub fn queue_notifications(&self, count: usize) -> Vec<ServerNotification> {
        mutex_lock(&self.state, SOURCE, "queue_notifications").generate_notifications(count)
    }

    /// Send a frame as-is to every open stream.
    pub fn push_raw(&self, frame: impl Into<String>) {
        match self.pushes.send(frame.into()) {
            Ok(listeners) => debug!(listeners, "Pushed frame"),
            Err(_) => debug!("Pushed frame without listeners"),
        }
    }

    fn record(&self, method: Method, path: &str) {
        *mutex_lock(&self.requests, SOURCE, "record")
            .entry(format!("{method} {path}"))
            .or_insert(0) += 1;
    }

    fn route(&self, request: &ApiRequest, url: &Url) -> Result<Value, NetworkError> {
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|segment| !segment.is_empty()).collect())
            .unwrap_or_default();
        let mut state = mutex_lock(&self.state, SOURCE, "route");

        match (request.method, segments.as_slice()) {
            (Method::Get, ["posts"]) => to_json(&state.posts),
            (Method::Get, ["posts", id]) => {
                let post = state.post_mut(id)?;
                to_json(&*post)
            }
            (Method::Post, ["posts"]) => {
                let add: PostAdd = body(request)?;
                let id = state.next_post_id;
                state.next_post_id += 1;
                let date = timestamp(state.next_stamp());
                let post = Post {
                    id: id.to_string(),
                    title: add.title,
                    content: add.content,
                    user: add.user,
                    date,
                    reactions: Reactions::default(),
                };
                state.posts.push(post.clone());
                to_json(&post)
            }
            (Method::Patch, ["posts", id]) => {
                let update: PostUpdate = body(request)?;
                let post = state.post_mut(id)?;
                if let Some(title) = update.title {
                    post.title = title;
                }
                if let Some(content) = update.content {
                    post.content = content;
                }
                to_json(&*post)
            }
            (Method::Post, ["posts", id, "reactions"]) => {
                let reaction: ReactionAdd = body(request)?;
                let post = state.post_mut(id)?;
                post.reactions.increment(reaction.reaction);
                to_json(&*post)
            }
            (Method::Get, ["users"]) => to_json(&state.users),
            (Method::Get, ["notifications"]) => {
                let since = url
                    .query_pairs()
                    .find(|(name, _)| name == "since")
                    .map(|(_, value)| value.into_owned())
                    .unwrap_or_default();
                let mut newer: Vec<&ServerNotification> = state
                    .notifications
                    .iter()
                    .filter(|notification| notification.date.as_str() > since.as_str())
                    .collect();
                newer.sort_by(|a, b| b.date.cmp(&a.date));
                to_json(&newer)
            }
            (Method::Post, ["login"]) => {
                let login: LoginRequest = body(request)?;
                state.logged_in = Some(login.username);
                to_json(&LoginResponse { success: true })
            }
            (Method::Post, ["logout"]) => {
                state.logged_in = None;
                to_json(&LoginResponse { success: true })
            }
            _ => Err(NetworkError::status(
                404,
                format!("no route for {} {}", request.method, url.path()),
            )),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Value, NetworkError> {
    serde_json::to_value(value).map_err(|err| NetworkError::status(500, err.to_string()))
}

fn body<T: DeserializeOwned>(request: &ApiRequest) -> Result<T, NetworkError> {
    let body = request.body.clone().unwrap_or(Value::Null);
    serde_json::from_value(body).map_err(|err| NetworkError::status(400, err.to_string()))
}

#[async_trait]
impl Transport for FakeApi {
    async fn issue_request(&self, request: ApiRequest) -> Result<Value, NetworkError> {
        let url = Url::parse(PARSE_BASE)
            .and_then(|base| base.join(&request.path))
            .map_err(|err| NetworkError::status(400, format!("invalid path: {err}")))?;
        self.record(request.method, url.path());
        debug!(base_url = %self.base_url, request = %request, "Fake API request");

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(failure) = mutex_lock(&self.failures, SOURCE, "issue_request").pop_front() {
            info!(request = %request, error = %failure, "Fake API failing request on demand");
            return Err(failure);
        }
        self.route(&request, &url)
    }
}

#[async_trait]
impl StreamConnector for FakeApi {
    async fn open_stream(&self, url: &str) -> Result<MessageStream, NetworkError> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        let receiver = self.pushes.subscribe();
        debug!(url, "Fake push stream opened");

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(frame) => return Some((frame, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Fake push stream lagged; frames skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn serves_seeded_posts_and_users() {
        let api = FakeApi::default();
        let posts = api
            .issue_request(ApiRequest::get("/posts"))
            .await
            .expect("posts");
        assert_eq!(posts.as_array().map(Vec::len), Some(2));

        let users = api
            .issue_request(ApiRequest::get("/users"))
            .await
            .expect("users");
        assert_eq!(users[0]["id"], "0");
        assert_eq!(api.request_count(Method::Get, "/posts"), 1);
    }

    #[tokio::test]
    async fn created_posts_are_newest() {
        let api = FakeApi::default();
        let created = api
            .issue_request(ApiRequest::post(
                "/posts",
                json!({ "title": "t", "content": "c", "user": "1" }),
            ))
            .await
            .expect("created");
        let posts: Vec<Post> = serde_json::from_value(
            api.issue_request(ApiRequest::get("/posts"))
                .await
                .expect("posts"),
        )
        .expect("typed");

        assert_eq!(created["id"], "3");
        assert!(posts.iter().all(|post| post.date.as_str() <= created["date"].as_str().unwrap_or("")));
    }

    #[tokio::test]
    async fn notifications_are_filtered_by_since() {
        let api = FakeApi::default();
        let first = api.queue_notifications(2);
        api.queue_notifications(1);

        let path = format!("/notifications?since={}", first[1].date);
        let newer = api
            .issue_request(ApiRequest::get(path))
            .await
            .expect("notifications");
        assert_eq!(newer.as_array().map(Vec::len), Some(1));
        assert_eq!(api.request_count(Method::Get, "/notifications"), 1);
    }

    #[test]
    fn back_to_back_stamps_differ_once_formatted() {
        let mut state = BackendState::seeded(OffsetDateTime::now_utc());
        let dates: Vec<String> = (0..50)
            .map(|_| timestamp(state.next_stamp()))
            .collect();

        assert!(dates.windows(2).all(|pair| pair[0] < pair[1]), "{dates:?}");
    }

    #[tokio::test]
    async fn every_queued_notification_is_newer_than_the_previous() {
        let api = FakeApi::default();
        let batch = api.queue_notifications(10);

        for (index, notification) in batch.iter().enumerate() {
            let path = format!("/notifications?since={}", notification.date);
            let newer = api
                .issue_request(ApiRequest::get(path))
                .await
                .expect("notifications");
            assert_eq!(
                newer.as_array().map(Vec::len),
                Some(batch.len() - index - 1),
                "since {}",
                notification.date
            );
        }
    }

    #[tokio::test]
    async fn queued_failures_are_returned_once() {
        let api = FakeApi::default();
        api.fail_next(NetworkError::status(503, "down"));

        assert!(api.issue_request(ApiRequest::get("/posts")).await.is_err());
        assert!(api.issue_request(ApiRequest::get("/posts")).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let api = FakeApi::default();
        let err = api
            .issue_request(ApiRequest::get("/nope"))
            .await
            .expect_err("no route");
        assert!(matches!(err, NetworkError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn pushed_batches_reach_open_streams() {
        let api = FakeApi::default();
        let mut stream = api.open_stream("ws://localhost/socket").await.expect("stream");
        let batch = api.push_notifications(2);

        let frame = stream.next().await.expect("frame");
        let envelope: StreamEnvelope = serde_json::from_str(&frame).expect("envelope");
        assert_eq!(envelope.kind, "notifications");
        assert_eq!(envelope.payload[1]["id"], batch[1].id.as_str());
        assert_eq!(api.stream_opens(), 1);
    }
}
