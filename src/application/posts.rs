//! Posts: list and detail queries, mutations and selectors.

use murmur_api_types::{Post, PostAdd, PostUpdate, ReactionName, Reactions};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::application::api::{
    ADD_NEW_POST, ADD_REACTION, EDIT_POST, GET_POST, GET_POSTS, decode_list, decode_one,
    settled_data,
};
use crate::application::error::AppError;
use crate::cache::{
    CacheKey, CachePatch, EntityAdapter, EntryData, QueryClient, Record, Subscription,
};

#[derive(Clone)]
pub struct PostsService {
    client: QueryClient,
}

impl PostsService {
    pub fn new(client: QueryClient) -> Self {
        Self { client }
    }

    pub fn list_key() -> CacheKey {
        CacheKey::unit(GET_POSTS)
    }

    pub fn detail_key(id: &str) -> CacheKey {
        CacheKey::new(GET_POST, &json!(id))
    }

    /// All posts, newest first.
    pub async fn fetch_all(&self) -> Result<Vec<Post>, AppError> {
        let result = self.client.query(GET_POSTS, Value::Null).await?;
        let data = settled_data(&result.snapshot)?;
        decode_list(&data)
    }

    pub async fn fetch_one(&self, id: &str) -> Result<Post, AppError> {
        let result = self.client.query(GET_POST, json!(id)).await?;
        let data = settled_data(&result.snapshot)?;
        decode_one(&data)
    }

    pub fn subscribe_all(&self) -> Result<Subscription, AppError> {
        Ok(self.client.subscribe(GET_POSTS, Value::Null)?)
    }

    pub fn subscribe_one(&self, id: &str) -> Result<Subscription, AppError> {
        Ok(self.client.subscribe(GET_POST, json!(id))?)
    }

    pub async fn add(&self, post: PostAdd) -> Result<Post, AppError> {
        if post.content.trim().is_empty() {
            return Err(AppError::validation("post content must not be empty"));
        }
        let data = self.client.mutate(ADD_NEW_POST, json!(post)).await?;
        let created: Post = decode_one(&data)?;
        info!(post_id = %created.id, user = %created.user, "Post added");
        Ok(created)
    }

    pub async fn edit(&self, update: PostUpdate) -> Result<Post, AppError> {
        if update.title.is_none() && update.content.is_none() {
            return Err(AppError::validation("nothing to update"));
        }
        let data = self.client.mutate(EDIT_POST, json!(update)).await?;
        let edited: Post = decode_one(&data)?;
        info!(post_id = %edited.id, "Post edited");
        Ok(edited)
    }

    /// Add a reaction, showing it in cached posts before the server confirms.
    ///
    /// The cached counters are restored if the request fails.
    pub async fn add_reaction(&self, id: &str, reaction: ReactionName) -> Result<Post, AppError> {
        let patches: Vec<CachePatch> = [Self::list_key(), Self::detail_key(id)]
            .iter()
            .filter_map(|key| {
                self.client
                    .update_cached(key, |data| bump_reaction(data, id, reaction))
            })
            .collect();
        debug!(post_id = id, reaction = %reaction, patched = patches.len(), "Optimistic reaction applied");

        match self
            .client
            .mutate(ADD_REACTION, json!({ "id": id, "reaction": reaction }))
            .await
        {
            Ok(data) => decode_one(&data),
            Err(err) => {
                warn!(post_id = id, error = %err, "Reaction rejected; restoring cached counters");
                for patch in patches {
                    self.client.undo(patch);
                }
                Err(err.into())
            }
        }
    }

    /// Posts by one author from the cached list, newest first.
    pub fn select_posts_by_user(&self, user_id: &str) -> Result<Vec<Post>, AppError> {
        Ok(self
            .select_all()?
            .into_iter()
            .filter(|post| post.user == user_id)
            .collect())
    }

    /// Cached list, empty when nothing was fetched yet.
    pub fn select_all(&self) -> Result<Vec<Post>, AppError> {
        match self.client.snapshot(&Self::list_key()).data {
            Some(data) => decode_list(&data),
            None => Ok(Vec::new()),
        }
    }

    pub fn select_post(&self, id: &str) -> Result<Option<Post>, AppError> {
        let snapshot = self.client.snapshot(&Self::list_key());
        let Some(record) = snapshot
            .data
            .as_deref()
            .and_then(EntryData::as_collection)
            .and_then(|posts| posts.get(id))
        else {
            return Ok(None);
        };
        Ok(Some(record.to_typed()?))
    }
}

fn bump_reaction(data: &mut EntryData, id: &str, reaction: ReactionName) {
    match data {
        EntryData::Collection(posts) => {
            if let Some(patch) = posts.get(id).and_then(|post| bumped(post, reaction)) {
                EntityAdapter::new().update_one(posts, patch);
            }
        }
        EntryData::Entity(post) => {
            if let Some(patch) = bumped(post, reaction) {
                *post = patch;
            }
        }
        EntryData::Value(_) => {}
    }
}

fn bumped(post: &Record, reaction: ReactionName) -> Option<Record> {
    let mut reactions: Reactions = post
        .get("reactions")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default();
    reactions.increment(reaction);
    let mut patch = post.clone();
    patch.set("reactions", serde_json::to_value(reactions).ok()?);
    Some(patch)
}
