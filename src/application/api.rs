//! Endpoint table of the murmur API.
//!
//! Paths are relative to the configured base URL; the transport adds it.

use std::sync::Arc;

use murmur_api_types::{LoginRequest, PostAdd, PostUpdate, ReactionAdd};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::application::error::AppError;
use crate::application::transport::ApiRequest;
use crate::cache::{
    ApiDefinition, CacheError, EndpointDefinition, EntityAdapter, EntryData, EntrySnapshot,
    QueryStatus, Record, Tag, field_descending,
};

pub const GET_POSTS: &str = "getPosts";
pub const GET_POST: &str = "getPost";
pub const GET_USERS: &str = "getUsers";
pub const GET_NOTIFICATIONS: &str = "getNotifications";
pub const ADD_NEW_POST: &str = "addNewPost";
pub const EDIT_POST: &str = "editPost";
pub const ADD_REACTION: &str = "addReaction";
pub const LOGIN: &str = "login";
pub const LOGOUT: &str = "logout";

pub const POST_TAG: &str = "Post";
pub const USER_TAG: &str = "User";

/// Build the endpoint table used by every service.
pub fn build_api() -> ApiDefinition {
    ApiDefinition::new()
        .inject(
            EndpointDefinition::query(GET_POSTS, get_posts)
                .collection(by_date())
                .provides(post_list_tags),
        )
        .inject(
            EndpointDefinition::query(GET_POST, get_post)
                .entity()
                .provides(single_post_tags),
        )
        .inject(
            EndpointDefinition::query(GET_USERS, get_users)
                .collection(EntityAdapter::new())
                .provides(user_list_tags),
        )
        .inject(
            EndpointDefinition::query(GET_NOTIFICATIONS, get_notifications)
                .collection(by_date())
                .realtime()
                .projects_metadata(),
        )
        .inject(
            EndpointDefinition::mutation(ADD_NEW_POST, add_new_post)
                .entity()
                .invalidates(all_posts),
        )
        .inject(
            EndpointDefinition::mutation(EDIT_POST, edit_post)
                .entity()
                .invalidates(single_post_tags),
        )
        .inject(
            EndpointDefinition::mutation(ADD_REACTION, add_reaction)
                .entity()
                .invalidates(single_post_tags),
        )
        .inject(EndpointDefinition::mutation(LOGIN, login))
        .inject(EndpointDefinition::mutation(LOGOUT, logout))
}

fn by_date() -> EntityAdapter<Record> {
    EntityAdapter::sorted(field_descending("date"))
}

/// Accepts a bare id or an object with an `id` field.
fn id_arg<'a>(endpoint: &str, args: &'a Value) -> Result<&'a str, CacheError> {
    args.as_str()
        .or_else(|| args.get("id").and_then(Value::as_str))
        .ok_or_else(|| CacheError::invalid_args(endpoint, "expected a post id"))
}

fn typed_arg<T: DeserializeOwned>(endpoint: &str, args: &Value) -> Result<T, CacheError> {
    serde_json::from_value(args.clone())
        .map_err(|err| CacheError::invalid_args(endpoint, err.to_string()))
}

fn get_posts(_: &Value) -> Result<ApiRequest, CacheError> {
    Ok(ApiRequest::get("/posts"))
}

fn get_post(args: &Value) -> Result<ApiRequest, CacheError> {
    let id = id_arg(GET_POST, args)?;
    Ok(ApiRequest::get(format!("/posts/{id}")))
}

fn get_users(_: &Value) -> Result<ApiRequest, CacheError> {
    Ok(ApiRequest::get("/users"))
}

fn get_notifications(_: &Value) -> Result<ApiRequest, CacheError> {
    Ok(ApiRequest::get("/notifications"))
}

fn add_new_post(args: &Value) -> Result<ApiRequest, CacheError> {
    let post: PostAdd = typed_arg(ADD_NEW_POST, args)?;
    if post.title.trim().is_empty() {
        return Err(CacheError::invalid_args(ADD_NEW_POST, "title must not be empty"));
    }
    Ok(ApiRequest::post("/posts", json!(post)))
}

fn edit_post(args: &Value) -> Result<ApiRequest, CacheError> {
    let update: PostUpdate = typed_arg(EDIT_POST, args)?;
    Ok(ApiRequest::patch(format!("/posts/{}", update.id), json!(update)))
}

fn add_reaction(args: &Value) -> Result<ApiRequest, CacheError> {
    let id = id_arg(ADD_REACTION, args)?;
    let reaction: ReactionAdd = typed_arg(ADD_REACTION, args)?;
    Ok(ApiRequest::post(format!("/posts/{id}/reactions"), json!(reaction)))
}

fn login(args: &Value) -> Result<ApiRequest, CacheError> {
    let request: LoginRequest = typed_arg(LOGIN, args)?;
    Ok(ApiRequest::post("/login", json!(request)))
}

fn logout(_: &Value) -> Result<ApiRequest, CacheError> {
    Ok(ApiRequest::post("/logout", json!({})))
}

fn post_list_tags(data: Option<&EntryData>, _: &Value) -> Vec<Tag> {
    let mut tags = vec![Tag::any(POST_TAG)];
    if let Some(data) = data {
        tags.extend(data.ids().into_iter().map(|id| Tag::id(POST_TAG, id)));
    }
    tags
}

fn single_post_tags(_: Option<&EntryData>, args: &Value) -> Vec<Tag> {
    id_arg(POST_TAG, args)
        .map(|id| vec![Tag::id(POST_TAG, id)])
        .unwrap_or_default()
}

fn user_list_tags(_: Option<&EntryData>, _: &Value) -> Vec<Tag> {
    vec![Tag::any(USER_TAG)]
}

fn all_posts(_: Option<&EntryData>, _: &Value) -> Vec<Tag> {
    vec![Tag::any(POST_TAG)]
}

/// Cached data of a settled query, or the captured error of a rejected one.
pub(crate) fn settled_data(snapshot: &EntrySnapshot) -> Result<Arc<EntryData>, AppError> {
    if snapshot.status == QueryStatus::Rejected {
        return Err(AppError::Rejected {
            key: snapshot.key.clone(),
            message: snapshot.error.clone().unwrap_or_default(),
        });
    }
    snapshot.data.clone().ok_or(AppError::NotFound)
}

pub(crate) fn decode_list<T: DeserializeOwned>(data: &EntryData) -> Result<Vec<T>, AppError> {
    let collection = data
        .as_collection()
        .ok_or_else(|| AppError::unexpected("cached data is not a collection"))?;
    Ok(collection
        .iter()
        .map(Record::to_typed)
        .collect::<Result<Vec<T>, _>>()?)
}

pub(crate) fn decode_one<T: DeserializeOwned>(data: &EntryData) -> Result<T, AppError> {
    match data {
        EntryData::Entity(record) => Ok(record.to_typed()?),
        EntryData::Value(value) => serde_json::from_value(value.clone())
            .map_err(|err| AppError::unexpected(err.to_string())),
        EntryData::Collection(_) => Err(AppError::unexpected("cached data is a collection")),
    }
}

#[cfg(test)]
mod tests {
    use murmur_api_types::ReactionName;

    use super::*;
    use crate::application::transport::Method;
    use crate::cache::EndpointKind;

    #[test]
    fn every_endpoint_is_registered_with_its_kind() {
        let api = build_api();
        assert_eq!(api.len(), 9);
        for name in [GET_POSTS, GET_POST, GET_USERS, GET_NOTIFICATIONS] {
            assert_eq!(api.get(name).expect("registered").kind, EndpointKind::Query);
        }
        for name in [ADD_NEW_POST, EDIT_POST, ADD_REACTION, LOGIN, LOGOUT] {
            assert_eq!(api.get(name).expect("registered").kind, EndpointKind::Mutation);
        }
        assert!(api.get(GET_NOTIFICATIONS).expect("registered").realtime);
    }

    #[test]
    fn requests_are_built_from_arguments() {
        let api = build_api();

        let request = api
            .get(GET_POST)
            .and_then(|endpoint| endpoint.build_request(&json!("7")))
            .expect("request");
        assert_eq!(request, ApiRequest::get("/posts/7"));

        let request = api
            .get(ADD_REACTION)
            .and_then(|endpoint| {
                endpoint.build_request(&json!({ "id": "7", "reaction": ReactionName::Heart }))
            })
            .expect("request");
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/posts/7/reactions");
        assert_eq!(request.body, Some(json!({ "reaction": "heart" })));
    }

    #[test]
    fn invalid_arguments_are_rejected_before_any_request() {
        let api = build_api();
        let err = api
            .get(ADD_NEW_POST)
            .and_then(|endpoint| {
                endpoint.build_request(&json!({ "title": " ", "content": "x", "user": "0" }))
            })
            .expect_err("empty title");
        assert!(matches!(err, CacheError::InvalidArgs { .. }));

        let err = api
            .get(GET_POST)
            .and_then(|endpoint| endpoint.build_request(&json!(42)))
            .expect_err("numeric id");
        assert!(matches!(err, CacheError::InvalidArgs { .. }));
    }

    #[test]
    fn post_list_provides_wildcard_and_per_post_tags() {
        let data = EntryData::Collection(
            by_date().normalize(
                [json!({ "id": "1", "date": "a" }), json!({ "id": "2", "date": "b" })]
                    .into_iter()
                    .map(|value| Record::from_value(value).expect("record")),
            ),
        );
        let tags = post_list_tags(Some(&data), &Value::Null);
        assert_eq!(
            tags,
            vec![Tag::any(POST_TAG), Tag::id(POST_TAG, "2"), Tag::id(POST_TAG, "1")]
        );
        assert_eq!(
            single_post_tags(None, &json!({ "id": "2", "title": "x" })),
            vec![Tag::id(POST_TAG, "2")]
        );
    }
}
