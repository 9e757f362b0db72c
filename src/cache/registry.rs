//! Tag index.
//!
//! Tracks which cache entries depend on which invalidation tags, in both
//! directions, so a mutation can find every entry it makes stale and an
//! evicted entry can drop its registrations.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::keys::{CacheKey, Tag};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

#[derive(Default)]
struct Mappings {
    tag_to_keys: HashMap<Tag, HashSet<CacheKey>>,
    key_to_tags: HashMap<CacheKey, HashSet<Tag>>,
}

impl Mappings {
    fn remove_key(&mut self, cache_key: &CacheKey) {
        let Some(tags) = self.key_to_tags.remove(cache_key) else {
            return;
        };
        for tag in tags {
            if let Some(keys) = self.tag_to_keys.get_mut(&tag) {
                keys.remove(cache_key);
                if keys.is_empty() {
                    self.tag_to_keys.remove(&tag);
                }
            }
        }
    }
}

/// Bidirectional tag ↔ cache key index.
///
/// Both directions live behind one lock so they are always updated together.
#[derive(Default)]
pub struct TagIndex {
    mappings: RwLock<Mappings>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the tags a cache entry provides, replacing its previous set.
    pub fn register(&self, cache_key: &CacheKey, tags: impl IntoIterator<Item = Tag>) {
        let mut mappings = rw_write(&self.mappings, SOURCE, "register");
        mappings.remove_key(cache_key);

        let tags: HashSet<Tag> = tags.into_iter().collect();
        if tags.is_empty() {
            return;
        }
        for tag in &tags {
            mappings
                .tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(cache_key.clone());
        }
        mappings.key_to_tags.insert(cache_key.clone(), tags);
    }

    /// Every cache key affected by invalidating `tags`.
    ///
    /// Registrations are kept: an invalidated entry still depends on the same
    /// tags until its refetch registers a new set.
    pub fn invalidate<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>) -> HashSet<CacheKey> {
        let mappings = rw_read(&self.mappings, SOURCE, "invalidate");
        let mut affected = HashSet::new();
        for tag in tags {
            if tag.is_wildcard() {
                for (registered, keys) in &mappings.tag_to_keys {
                    if tag.matches(registered) {
                        affected.extend(keys.iter().cloned());
                    }
                }
            } else if let Some(keys) = mappings.tag_to_keys.get(tag) {
                affected.extend(keys.iter().cloned());
            }
        }
        affected
    }

    pub fn tags_for_key(&self, cache_key: &CacheKey) -> HashSet<Tag> {
        rw_read(&self.mappings, SOURCE, "tags_for_key")
            .key_to_tags
            .get(cache_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every registration of an evicted entry.
    pub fn unregister(&self, cache_key: &CacheKey) {
        rw_write(&self.mappings, SOURCE, "unregister").remove_key(cache_key);
    }

    pub fn clear(&self) {
        let mut mappings = rw_write(&self.mappings, SOURCE, "clear");
        mappings.tag_to_keys.clear();
        mappings.key_to_tags.clear();
    }

    pub fn tag_count(&self) -> usize {
        rw_read(&self.mappings, SOURCE, "tag_count").tag_to_keys.len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.mappings, SOURCE, "key_count").key_to_tags.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn posts_key() -> CacheKey {
        CacheKey::unit("getPosts")
    }

    fn post_key(id: &str) -> CacheKey {
        CacheKey::new("getPost", &json!(id))
    }

    #[test]
    fn register_and_lookup() {
        let index = TagIndex::new();
        index.register(&post_key("1"), [Tag::id("Post", "1")]);

        let affected = index.invalidate(&[Tag::id("Post", "1")]);
        assert!(affected.contains(&post_key("1")));
        assert!(index.tags_for_key(&post_key("1")).contains(&Tag::id("Post", "1")));
    }

    #[test]
    fn wildcard_reaches_every_id_of_the_type() {
        let index = TagIndex::new();
        index.register(&posts_key(), [Tag::any("Post"), Tag::id("Post", "1")]);
        index.register(&post_key("2"), [Tag::id("Post", "2")]);
        index.register(&CacheKey::unit("getUsers"), [Tag::any("User")]);

        let affected = index.invalidate(&[Tag::any("Post")]);
        assert_eq!(affected.len(), 2);
        assert!(affected.contains(&posts_key()));
        assert!(affected.contains(&post_key("2")));
    }

    #[test]
    fn concrete_tag_skips_type_level_registrations() {
        let index = TagIndex::new();
        index.register(&posts_key(), [Tag::any("Post")]);
        index.register(&post_key("1"), [Tag::id("Post", "1")]);

        let affected = index.invalidate(&[Tag::id("Post", "1")]);
        assert_eq!(affected, HashSet::from([post_key("1")]));
    }

    #[test]
    fn register_replaces_previous_tags() {
        let index = TagIndex::new();
        index.register(&posts_key(), [Tag::id("Post", "1")]);
        index.register(&posts_key(), [Tag::id("Post", "2")]);

        assert!(index.invalidate(&[Tag::id("Post", "1")]).is_empty());
        assert_eq!(index.tag_count(), 1);
    }

    #[test]
    fn invalidate_keeps_registrations() {
        let index = TagIndex::new();
        index.register(&posts_key(), [Tag::any("Post")]);

        index.invalidate(&[Tag::any("Post")]);
        assert_eq!(index.key_count(), 1);
    }

    #[test]
    fn unregister_cleans_up_both_directions() {
        let index = TagIndex::new();
        index.register(&posts_key(), [Tag::any("Post"), Tag::id("Post", "1")]);
        index.register(&post_key("1"), [Tag::id("Post", "1")]);

        index.unregister(&posts_key());
        assert_eq!(index.key_count(), 1);
        assert_eq!(index.tag_count(), 1);
        assert_eq!(
            index.invalidate(&[Tag::any("Post")]),
            HashSet::from([post_key("1")])
        );
    }

    #[test]
    fn clear_removes_all_mappings() {
        let index = TagIndex::new();
        index.register(&posts_key(), [Tag::any("Post")]);
        index.clear();
        assert_eq!(index.key_count(), 0);
        assert_eq!(index.tag_count(), 0);
    }
}
