//! Endpoint definitions.
//!
//! An endpoint describes how to build a request from its argument, how the
//! response is shaped before it is stored, and which tags it provides
//! (queries) or invalidates (mutations).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::application::transport::ApiRequest;

use super::error::CacheError;
use super::keys::{CacheKey, Tag};
use super::normalize::{EntityAdapter, NormalizedCollection, Record};

/// Cached payload of an entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryData {
    Collection(NormalizedCollection<Record>),
    Entity(Record),
    Value(Value),
}

impl EntryData {
    pub fn as_collection(&self) -> Option<&NormalizedCollection<Record>> {
        match self {
            Self::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Record> {
        match self {
            Self::Entity(record) => Some(record),
            _ => None,
        }
    }

    /// Entity ids carried by this payload, in order.
    pub fn ids(&self) -> Vec<String> {
        match self {
            Self::Collection(collection) => collection.ids().to_vec(),
            Self::Entity(record) => vec![super::normalize::Entity::id(record).to_string()],
            Self::Value(_) => Vec::new(),
        }
    }
}

/// How a raw JSON response is stored.
#[derive(Debug, Clone)]
pub enum ResponseShape {
    /// A JSON array normalized by the adapter.
    Collection(EntityAdapter<Record>),
    /// A single JSON object with an id.
    Entity,
    /// Stored as received.
    Raw,
}

impl ResponseShape {
    pub fn shape(&self, endpoint: &str, value: Value) -> Result<EntryData, CacheError> {
        match self {
            Self::Collection(adapter) => {
                let records = Record::list_from_value(value)
                    .map_err(|source| CacheError::malformed(endpoint, source))?;
                Ok(EntryData::Collection(adapter.normalize(records)))
            }
            Self::Entity => Record::from_value(value)
                .map(EntryData::Entity)
                .map_err(|source| CacheError::malformed(endpoint, source)),
            Self::Raw => Ok(EntryData::Value(value)),
        }
    }

    pub fn adapter(&self) -> Option<&EntityAdapter<Record>> {
        match self {
            Self::Collection(adapter) => Some(adapter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Query,
    Mutation,
}

pub type BuildRequest = fn(&Value) -> Result<ApiRequest, CacheError>;

/// Computes tags from the (shaped) result, if any, and the argument.
pub type TagsFn = fn(Option<&EntryData>, &Value) -> Vec<Tag>;

fn no_tags(_: Option<&EntryData>, _: &Value) -> Vec<Tag> {
    Vec::new()
}

#[derive(Debug, Clone)]
pub struct EndpointDefinition {
    pub name: &'static str,
    pub kind: EndpointKind,
    pub request: BuildRequest,
    pub shape: ResponseShape,
    pub provides: TagsFn,
    pub invalidates: TagsFn,
    /// Attach a push stream while the entry has subscribers.
    pub realtime: bool,
    /// Feed fulfilled ids into the metadata projector.
    pub projects_metadata: bool,
    /// Overrides the configured eviction grace period.
    pub keep_unused_for: Option<Duration>,
}

impl EndpointDefinition {
    pub fn query(name: &'static str, request: BuildRequest) -> Self {
        Self {
            name,
            kind: EndpointKind::Query,
            request,
            shape: ResponseShape::Raw,
            provides: no_tags,
            invalidates: no_tags,
            realtime: false,
            projects_metadata: false,
            keep_unused_for: None,
        }
    }

    pub fn mutation(name: &'static str, request: BuildRequest) -> Self {
        Self {
            kind: EndpointKind::Mutation,
            ..Self::query(name, request)
        }
    }

    pub fn collection(mut self, adapter: EntityAdapter<Record>) -> Self {
        self.shape = ResponseShape::Collection(adapter);
        self
    }

    pub fn entity(mut self) -> Self {
        self.shape = ResponseShape::Entity;
        self
    }

    pub fn provides(mut self, tags: TagsFn) -> Self {
        self.provides = tags;
        self
    }

    pub fn invalidates(mut self, tags: TagsFn) -> Self {
        self.invalidates = tags;
        self
    }

    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    pub fn projects_metadata(mut self) -> Self {
        self.projects_metadata = true;
        self
    }

    pub fn keep_unused_for(mut self, grace: Duration) -> Self {
        self.keep_unused_for = Some(grace);
        self
    }

    pub fn build_request(&self, args: &Value) -> Result<ApiRequest, CacheError> {
        (self.request)(args)
    }

    pub fn cache_key(&self, args: &Value) -> CacheKey {
        CacheKey::new(self.name, args)
    }
}

/// The set of endpoints a client knows about, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ApiDefinition {
    endpoints: HashMap<&'static str, Arc<EndpointDefinition>>,
}

impl ApiDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint, replacing any previous one with the same name.
    pub fn inject(mut self, endpoint: EndpointDefinition) -> Self {
        self.endpoints.insert(endpoint.name, Arc::new(endpoint));
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<EndpointDefinition>, CacheError> {
        self.endpoints
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownEndpoint(name.to_string()))
    }

    pub(crate) fn expect_kind(
        &self,
        name: &str,
        kind: EndpointKind,
    ) -> Result<Arc<EndpointDefinition>, CacheError> {
        let endpoint = self.get(name)?;
        if endpoint.kind != kind {
            return Err(CacheError::WrongEndpointKind {
                endpoint: name.to_string(),
                expected: match kind {
                    EndpointKind::Query => "query",
                    EndpointKind::Mutation => "mutation",
                },
            });
        }
        Ok(endpoint)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn list(_: &Value) -> Result<ApiRequest, CacheError> {
        Ok(ApiRequest::get("/things"))
    }

    #[test]
    fn collection_shape_rejects_non_arrays() {
        let shape = ResponseShape::Collection(EntityAdapter::new());
        let err = shape
            .shape("getThings", json!({ "id": "1" }))
            .expect_err("object is not a list");
        assert!(matches!(err, CacheError::MalformedResponse { .. }));
    }

    #[test]
    fn entity_shape_requires_an_id() {
        let err = ResponseShape::Entity
            .shape("getThing", json!({ "name": "x" }))
            .expect_err("missing id");
        assert!(matches!(err, CacheError::MalformedResponse { .. }));
    }

    #[test]
    fn api_lookup_checks_the_endpoint_kind() {
        let api = ApiDefinition::new().inject(EndpointDefinition::query("getThings", list));

        assert!(api.expect_kind("getThings", EndpointKind::Query).is_ok());
        assert!(matches!(
            api.expect_kind("getThings", EndpointKind::Mutation),
            Err(CacheError::WrongEndpointKind { .. })
        ));
        assert!(matches!(
            api.get("missing"),
            Err(CacheError::UnknownEndpoint(_))
        ));
    }

    #[test]
    fn entry_ids_follow_collection_order() {
        let shape = ResponseShape::Collection(EntityAdapter::new());
        let data = shape
            .shape("getThings", json!([{ "id": "b" }, { "id": "a" }]))
            .expect("valid list");
        assert_eq!(data.ids(), ["b", "a"]);
    }
}
