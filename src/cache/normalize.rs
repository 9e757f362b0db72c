//! Entity normalization.
//!
//! Converts entity lists into an id-indexed map plus an ordered id sequence and
//! keeps both halves consistent under inserts, merges and removals.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// A record addressable by a unique string id.
pub trait Entity: Clone {
    fn id(&self) -> &str;

    /// Shallow merge: copy every field present in `patch` over `self`.
    fn merge(&mut self, patch: Self);
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record has no string or numeric `id` field")]
    MissingId,
    #[error("record (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A flat JSON object with a guaranteed id, the unit of storage in the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    #[serde(skip)]
    id: String,
    fields: Map<String, Value>,
}

impl Record {
    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        let Value::Object(fields) = value else {
            return Err(RecordError::NotAnObject);
        };
        let id = match fields.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(RecordError::MissingId),
        };
        Ok(Self { id, fields })
    }

    /// Parse a JSON array into records, failing on the first invalid element.
    pub fn list_from_value(value: Value) -> Result<Vec<Self>, RecordError> {
        match value {
            Value::Array(items) => items.into_iter().map(Self::from_value).collect(),
            _ => Err(RecordError::NotAnObject),
        }
    }

    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, RecordError> {
        Self::from_value(serde_json::to_value(value)?)
    }

    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, RecordError> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Set a single field. The id field cannot be changed.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        if field != "id" {
            self.fields.insert(field, value);
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl Entity for Record {
    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&mut self, patch: Self) {
        for (field, value) in patch.fields {
            if field != "id" {
                self.fields.insert(field, value);
            }
        }
    }
}

/// Id-indexed entity map plus explicit ordering.
///
/// Every id in `ids` has exactly one entry in `entities` and vice versa. Only
/// [`EntityAdapter`] mutates a collection, always through a single `&mut`
/// borrow, so no reader can observe one half updated without the other.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCollection<T> {
    ids: Vec<String>,
    entities: HashMap<String, T>,
}

impl<T> Default for NormalizedCollection<T> {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            entities: HashMap::new(),
        }
    }
}

impl<T> NormalizedCollection<T> {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn entities(&self) -> &HashMap<String, T> {
        &self.entities
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Entities in `ids` order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.ids.iter().filter_map(|id| self.entities.get(id))
    }

    pub fn first(&self) -> Option<&T> {
        self.ids.first().and_then(|id| self.entities.get(id))
    }
}

pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Orders records by a string field, newest (lexically largest) first.
///
/// Records missing the field sort last.
pub fn field_descending(field: &'static str) -> Comparator<Record> {
    Arc::new(move |a: &Record, b: &Record| {
        match (a.str_field(field), b.str_field(field)) {
            (Some(a), Some(b)) => b.cmp(a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    })
}

/// Operations over [`NormalizedCollection`], optionally with a sort comparator.
///
/// With a comparator, ids are re-sorted after every bulk write. The sort is
/// stable, so ties keep their insertion order.
pub struct EntityAdapter<T> {
    sort_comparer: Option<Comparator<T>>,
}

impl<T> Clone for EntityAdapter<T> {
    fn clone(&self) -> Self {
        Self {
            sort_comparer: self.sort_comparer.clone(),
        }
    }
}

impl<T> fmt::Debug for EntityAdapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityAdapter")
            .field("sorted", &self.sort_comparer.is_some())
            .finish()
    }
}

impl<T: Entity> Default for EntityAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> EntityAdapter<T> {
    /// Adapter that keeps insertion order.
    pub fn new() -> Self {
        Self {
            sort_comparer: None,
        }
    }

    pub fn sorted(comparer: Comparator<T>) -> Self {
        Self {
            sort_comparer: Some(comparer),
        }
    }

    pub fn is_sorted(&self) -> bool {
        self.sort_comparer.is_some()
    }

    /// Build a collection from a list. Later duplicates replace earlier ones.
    pub fn normalize(&self, list: impl IntoIterator<Item = T>) -> NormalizedCollection<T> {
        let mut collection = NormalizedCollection::default();
        self.set_all(&mut collection, list);
        collection
    }

    /// Replace the whole content of `collection`.
    pub fn set_all(&self, collection: &mut NormalizedCollection<T>, list: impl IntoIterator<Item = T>) {
        collection.ids.clear();
        collection.entities.clear();
        for entity in list {
            Self::insert_or_replace(collection, entity);
        }
        self.sort(collection);
    }

    /// Insert entities whose id is not present yet; known ids are left untouched.
    ///
    /// Returns the ids that were inserted, in input order.
    pub fn add_many(
        &self,
        collection: &mut NormalizedCollection<T>,
        list: impl IntoIterator<Item = T>,
    ) -> Vec<String> {
        let mut added = Vec::new();
        for entity in list {
            if collection.entities.contains_key(entity.id()) {
                continue;
            }
            let id = entity.id().to_string();
            collection.ids.push(id.clone());
            collection.entities.insert(id.clone(), entity);
            added.push(id);
        }
        self.sort(collection);
        added
    }

    pub fn upsert_one(&self, collection: &mut NormalizedCollection<T>, entity: T) {
        self.upsert_many(collection, [entity]);
    }

    /// Insert new ids and shallow-merge into existing ones.
    pub fn upsert_many(
        &self,
        collection: &mut NormalizedCollection<T>,
        incoming: impl IntoIterator<Item = T>,
    ) {
        for entity in incoming {
            match collection.entities.get_mut(entity.id()) {
                Some(existing) => existing.merge(entity),
                None => {
                    let id = entity.id().to_string();
                    collection.ids.push(id.clone());
                    collection.entities.insert(id, entity);
                }
            }
        }
        self.sort(collection);
    }

    /// Shallow-merge `patch` into the entity with the same id, if present.
    pub fn update_one(&self, collection: &mut NormalizedCollection<T>, patch: T) -> bool {
        let Some(existing) = collection.entities.get_mut(patch.id()) else {
            return false;
        };
        existing.merge(patch);
        self.sort(collection);
        true
    }

    pub fn remove_one(&self, collection: &mut NormalizedCollection<T>, id: &str) -> bool {
        self.remove_many(collection, [id]) == 1
    }

    /// Remove ids from both halves in one step. Returns how many were present.
    pub fn remove_many<'a>(
        &self,
        collection: &mut NormalizedCollection<T>,
        ids: impl IntoIterator<Item = &'a str>,
    ) -> usize {
        let mut removed = HashSet::new();
        for id in ids {
            if collection.entities.remove(id).is_some() {
                removed.insert(id.to_string());
            }
        }
        if !removed.is_empty() {
            collection.ids.retain(|id| !removed.contains(id));
        }
        removed.len()
    }

    fn insert_or_replace(collection: &mut NormalizedCollection<T>, entity: T) {
        let id = entity.id().to_string();
        if collection.entities.insert(id.clone(), entity).is_none() {
            collection.ids.push(id);
        }
    }

    fn sort(&self, collection: &mut NormalizedCollection<T>) {
        let Some(comparer) = &self.sort_comparer else {
            return;
        };
        let entities = &collection.entities;
        collection.ids.sort_by(|a, b| match (entities.get(a), entities.get(b)) {
            (Some(a), Some(b)) => comparer(a, b),
            _ => Ordering::Equal,
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: Value) -> Record {
        Record::from_value(value).expect("valid record")
    }

    fn post(id: &str, date: &str) -> Record {
        record(json!({ "id": id, "title": format!("post {id}"), "date": date }))
    }

    fn assert_consistent<T>(collection: &NormalizedCollection<T>) {
        let ids: HashSet<&String> = collection.ids().iter().collect();
        let keys: HashSet<&String> = collection.entities().keys().collect();
        assert_eq!(ids.len(), collection.ids().len(), "ids must be unique");
        assert_eq!(ids, keys);
    }

    #[test]
    fn record_requires_an_id() {
        assert!(matches!(
            Record::from_value(json!({ "title": "x" })),
            Err(RecordError::MissingId)
        ));
        assert!(matches!(
            Record::from_value(json!([1, 2])),
            Err(RecordError::NotAnObject)
        ));
        assert_eq!(record(json!({ "id": 7 })).id(), "7");
    }

    #[test]
    fn normalize_collapses_duplicate_ids() {
        let adapter = EntityAdapter::new();
        let collection = adapter.normalize([
            post("a", "2024-01-01"),
            post("b", "2024-01-02"),
            post("a", "2024-01-03"),
        ]);

        assert_eq!(collection.ids(), ["a", "b"]);
        assert_consistent(&collection);
        assert_eq!(
            collection.get("a").and_then(|p| p.str_field("date")),
            Some("2024-01-03")
        );
    }

    #[test]
    fn comparator_sorts_and_ties_keep_insertion_order() {
        let adapter = EntityAdapter::sorted(field_descending("date"));
        let collection = adapter.normalize([
            post("old", "2024-01-01"),
            post("tie-1", "2024-01-05"),
            post("new", "2024-01-09"),
            post("tie-2", "2024-01-05"),
        ]);

        assert_eq!(collection.ids(), ["new", "tie-1", "tie-2", "old"]);
    }

    #[test]
    fn upsert_merges_existing_and_inserts_new() {
        let adapter = EntityAdapter::sorted(field_descending("date"));
        let mut collection = adapter.normalize([post("a", "2024-01-01")]);

        adapter.upsert_many(
            &mut collection,
            [
                record(json!({ "id": "a", "title": "edited" })),
                post("b", "2024-02-01"),
            ],
        );

        let a = collection.get("a").expect("a kept");
        assert_eq!(a.str_field("title"), Some("edited"));
        assert_eq!(a.str_field("date"), Some("2024-01-01"));
        assert_eq!(collection.ids(), ["b", "a"]);
        assert_consistent(&collection);
    }

    #[test]
    fn add_many_ignores_known_ids() {
        let adapter = EntityAdapter::new();
        let mut collection = adapter.normalize([post("a", "2024-01-01")]);

        let added = adapter.add_many(
            &mut collection,
            [record(json!({ "id": "a", "title": "ignored" })), post("b", "2024-01-02")],
        );

        assert_eq!(added, ["b"]);
        assert_eq!(
            collection.get("a").and_then(|p| p.str_field("title")),
            Some("post a")
        );
    }

    #[test]
    fn update_one_is_a_no_op_for_unknown_ids() {
        let adapter = EntityAdapter::new();
        let mut collection = adapter.normalize([post("a", "2024-01-01")]);

        assert!(!adapter.update_one(&mut collection, record(json!({ "id": "zzz", "title": "x" }))));
        assert!(adapter.update_one(&mut collection, record(json!({ "id": "a", "title": "x" }))));
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.get("a").and_then(|p| p.str_field("title")), Some("x"));
    }

    #[test]
    fn remove_many_clears_both_halves() {
        let adapter = EntityAdapter::new();
        let mut collection = adapter.normalize([
            post("a", "1"),
            post("b", "2"),
            post("c", "3"),
        ]);

        assert_eq!(adapter.remove_many(&mut collection, ["a", "c", "missing"]), 2);
        assert_eq!(collection.ids(), ["b"]);
        assert_consistent(&collection);

        assert!(adapter.remove_one(&mut collection, "b"));
        assert!(collection.is_empty());
        assert!(collection.entities().is_empty());
    }

    #[test]
    fn merge_never_changes_the_id() {
        let mut a = record(json!({ "id": "a", "title": "t" }));
        a.merge(Record { id: "a".to_string(), fields: Map::from_iter([("id".to_string(), json!("b"))]) });
        a.set("id", json!("c"));
        assert_eq!(a.id(), "a");
        assert_eq!(a.str_field("id"), Some("a"));
    }

    #[test]
    fn typed_round_trip_through_record() {
        let user = murmur_api_types::User {
            id: "0".to_string(),
            name: "Tianna".to_string(),
        };
        let record = Record::from_typed(&user).expect("record");
        assert_eq!(record.id(), "0");
        let back: murmur_api_types::User = record.to_typed().expect("typed");
        assert_eq!(back, user);
    }
}
