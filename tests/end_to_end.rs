use std::sync::Arc;
use std::time::Duration;

use murmur::application::api::build_api;
use murmur::application::error::AppError;
use murmur::application::notifications::NotificationsService;
use murmur::application::posts::PostsService;
use murmur::application::session::SessionService;
use murmur::application::transport::{Method, NetworkError};
use murmur::application::users::UsersService;
use murmur::cache::{QueryClient, QueryStatus};
use murmur::infra::fake_api::FakeApi;
use murmur_api_types::{PostAdd, PostUpdate, ReactionName};

struct App {
    api: Arc<FakeApi>,
    client: QueryClient,
    posts: PostsService,
    users: UsersService,
    notifications: NotificationsService,
    session: SessionService,
}

fn app() -> App {
    let api = Arc::new(FakeApi::default());
    let client = QueryClient::builder(build_api(), api.clone())
        .realtime(api.clone(), "ws://localhost/ws")
        .build();
    App {
        posts: PostsService::new(client.clone()),
        users: UsersService::new(client.clone()),
        notifications: NotificationsService::new(client.clone()),
        session: SessionService::new(client.clone()),
        api,
        client,
    }
}

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
async fn posts_notifications_and_read_state() {
    let app = app();

    let listed = app.posts.fetch_all().await.expect("fetch posts");
    let ids: Vec<&str> = listed.iter().map(|post| post.id.as_str()).collect();
    assert_eq!(ids, ["2", "1"]);

    let created = app
        .posts
        .add(PostAdd {
            title: "Third".to_string(),
            content: "Newest post".to_string(),
            user: "1".to_string(),
        })
        .await
        .expect("add post");
    let listed = app.posts.fetch_all().await.expect("refetch posts");
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].id, created.id);

    let subscription = app.notifications.subscribe().expect("subscribe");
    until(|| subscription.snapshot().status == QueryStatus::Fulfilled).await;
    assert!(app.api.wait_for_listeners(1).await);

    app.api.push_notifications(3);
    until(|| app.notifications.unread_count() == 3).await;

    app.notifications.mark_all_read();
    assert_eq!(app.notifications.unread_count(), 0);

    app.api.push_notifications(2);
    until(|| app.notifications.with_metadata().map(|all| all.len()).unwrap_or(0) == 5).await;
    assert_eq!(app.notifications.unread_count(), 2);
}

#[tokio::test]
async fn reaction_is_visible_before_confirmation() {
    let app = app();
    app.posts.fetch_all().await.expect("fetch posts");

    let confirmed = app
        .posts
        .add_reaction("1", ReactionName::Heart)
        .await
        .expect("reaction");

    assert_eq!(confirmed.reactions.heart, 1);
    let cached = app.posts.select_post("1").expect("decode").expect("cached");
    assert_eq!(cached.reactions.heart, 1);
}

#[tokio::test]
async fn rejected_reaction_restores_counters() {
    let app = app();
    app.posts.fetch_all().await.expect("fetch posts");
    app.api.fail_next(NetworkError::status(500, "no reactions today"));

    let err = app
        .posts
        .add_reaction("2", ReactionName::Rocket)
        .await
        .expect_err("reaction fails");

    assert!(err.is_network());
    let cached = app.posts.select_post("2").expect("decode").expect("cached");
    assert_eq!(cached.reactions.rocket, 0);
}

#[tokio::test]
async fn editing_refreshes_the_detail_view() {
    let app = app();
    let _detail = app.posts.subscribe_one("1").expect("subscribe");
    let before = app.posts.fetch_one("1").await.expect("fetch");
    assert_eq!(before.title, "First Post!");

    app.posts
        .edit(PostUpdate {
            id: "1".to_string(),
            title: Some("Renamed".to_string()),
            content: None,
        })
        .await
        .expect("edit");

    let after = app.posts.fetch_one("1").await.expect("refetch");
    assert_eq!(after.title, "Renamed");
    assert_eq!(app.api.request_count(Method::Get, "/posts/1"), 2);
}

#[tokio::test]
async fn invalid_input_never_reaches_the_server() {
    let app = app();

    let err = app
        .posts
        .add(PostAdd {
            title: "Title".to_string(),
            content: "   ".to_string(),
            user: "0".to_string(),
        })
        .await
        .expect_err("empty content");
    assert!(matches!(err, AppError::Validation(_)));

    let err = app
        .posts
        .edit(PostUpdate {
            id: "1".to_string(),
            ..PostUpdate::default()
        })
        .await
        .expect_err("empty update");
    assert!(matches!(err, AppError::Validation(_)));

    assert!(app.session.login(" ").await.is_err());
    assert_eq!(app.api.total_requests(), 0);
}

#[tokio::test]
async fn login_resolves_user_and_logout_clears_everything() {
    let app = app();
    app.session.login("2").await.expect("login");
    assert_eq!(app.api.logged_in().as_deref(), Some("2"));
    assert_eq!(app.session.current_user().expect("lookup"), None);

    let users = app.users.fetch_all().await.expect("users");
    assert_eq!(users.len(), 3);
    let user = app.session.current_user().expect("lookup").expect("known user");
    assert_eq!(user.name, "Madison Price");

    app.posts.fetch_all().await.expect("posts");
    let mine = app.posts.select_posts_by_user("2").expect("select");
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].title, "Second Post");

    app.session.logout().await.expect("logout");
    assert_eq!(app.api.logged_in(), None);
    assert_eq!(app.session.current_username(), None);
    assert_eq!(app.client.entry_count(), 0);
    assert!(app.posts.select_all().expect("select").is_empty());
    assert!(app.users.select_all_users().expect("select").is_empty());
}
