use std::{process, sync::Arc, time::Duration};

use murmur::{
    application::{
        api::build_api, error::AppError, notifications::NotificationsService,
        posts::PostsService, session::SessionService, users::UsersService,
    },
    cache::{CacheConfig, QueryClient},
    config,
    infra::{fake_api::FakeApi, telemetry},
};
use murmur_api_types::{PostAdd, ReactionName};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const WAIT_STEP: Duration = Duration::from_millis(10);
const WAIT_ATTEMPTS: usize = 200;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %report.summary(), source = report.source, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %report.summary(), source = report.source, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Demo(config::DemoArgs::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Demo(args) => run_demo(settings, args).await,
    }
}

async fn run_demo(settings: config::Settings, args: config::DemoArgs) -> Result<(), AppError> {
    let backend = Arc::new(FakeApi::new(settings.api.base_url.clone()));
    let client = QueryClient::builder(build_api(), backend.clone())
        .config(CacheConfig::from(&settings.cache))
        .realtime(backend.clone(), settings.api.stream_url.as_str())
        .build();

    let posts = PostsService::new(client.clone());
    let users = UsersService::new(client.clone());
    let notifications = NotificationsService::new(client.clone());
    let session = SessionService::new(client.clone());

    session.login(&args.username).await?;
    let _users = users.subscribe()?;

    let listed = posts.fetch_all().await?;
    info!(
        count = listed.len(),
        newest = listed.first().map(|post| post.title.as_str()).unwrap_or("-"),
        "Fetched posts"
    );

    let created = posts
        .add(PostAdd {
            title: "Hello from murmur".to_string(),
            content: "Posted through the query cache.".to_string(),
            user: args.username.clone(),
        })
        .await?;
    let listed = posts.fetch_all().await?;
    info!(
        count = listed.len(),
        newest = listed.first().map(|post| post.id.as_str()).unwrap_or("-"),
        created = %created.id,
        "Posts after adding one"
    );

    let reacted = posts.add_reaction(&created.id, ReactionName::Rocket).await?;
    info!(
        post_id = %reacted.id,
        rockets = reacted.reactions.get(ReactionName::Rocket),
        "Reaction confirmed"
    );

    let mine = posts.select_posts_by_user(&args.username)?;
    let author = session
        .current_user()?
        .map(|user| user.name)
        .unwrap_or_else(|| args.username.clone());
    info!(author = %author, posts = mine.len(), "Posts by the signed-in user");

    let subscription = notifications.subscribe()?;
    if !backend.wait_for_listeners(1).await {
        warn!("Push stream did not attach; pushed batches will only arrive by polling");
    }

    backend.push_notifications(args.batch_size);
    wait_until(|| notifications.unread_count() >= args.batch_size).await;
    info!(unread = notifications.unread_count(), "First push batch received");

    notifications.mark_all_read();
    info!(unread = notifications.unread_count(), "Marked all notifications read");

    backend.push_notifications(args.batch_size);
    wait_until(|| notifications.unread_count() >= args.batch_size).await;
    info!(unread = notifications.unread_count(), "Second push batch received");

    backend.queue_notifications(1);
    let polled = notifications.fetch_new().await?;
    info!(
        polled = polled.len(),
        unread = notifications.unread_count(),
        "Polled for newer notifications"
    );

    for item in notifications.with_metadata()? {
        info!(
            id = %item.notification.id,
            read = item.read,
            is_new = item.is_new,
            message = %item.notification.message,
            "Notification"
        );
    }

    let events = client.events().drain(usize::MAX);
    info!(events = events.len(), "Drained cache events");

    subscription.unsubscribe();
    session.logout().await?;
    info!(
        entries = client.entry_count(),
        unread = notifications.unread_count(),
        "Demo finished"
    );
    Ok(())
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..WAIT_ATTEMPTS {
        if condition() {
            return true;
        }
        tokio::time::sleep(WAIT_STEP).await;
    }
    let reached = condition();
    if !reached {
        warn!("Timed out waiting for the cache to settle");
    }
    reached
}
