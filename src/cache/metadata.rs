//! Client-only notification metadata.
//!
//! Read / is-new state is keyed by notification id and lives independently of
//! the cached notification payloads: evicting or refetching the data never
//! touches it. Only an explicit reset (sign-out) clears it.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::metadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationMetadata {
    pub read: bool,
    pub is_new: bool,
}

impl NotificationMetadata {
    fn fresh() -> Self {
        Self {
            read: false,
            is_new: true,
        }
    }
}

#[derive(Default)]
pub struct MetadataProjector {
    entries: RwLock<HashMap<String, NotificationMetadata>>,
}

impl MetadataProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Project a newly arrived batch.
    ///
    /// Every known id has `is_new` recomputed as `!read`; ids seen for the
    /// first time get `{ read: false, is_new: true }`. Returns the ids that
    /// were new.
    pub fn on_batch<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut entries = rw_write(&self.entries, SOURCE, "on_batch");
        for metadata in entries.values_mut() {
            metadata.is_new = !metadata.read;
        }

        let mut inserted = Vec::new();
        for id in ids {
            if !entries.contains_key(id) {
                entries.insert(id.to_string(), NotificationMetadata::fresh());
                inserted.push(id.to_string());
            }
        }
        debug!(
            new = inserted.len(),
            known = entries.len(),
            "Projected notification batch"
        );
        inserted
    }

    /// Mark every known id read. `is_new` is left for the next batch to recompute.
    pub fn mark_all_read(&self) {
        let mut entries = rw_write(&self.entries, SOURCE, "mark_all_read");
        for metadata in entries.values_mut() {
            metadata.read = true;
        }
    }

    pub fn get(&self, id: &str) -> Option<NotificationMetadata> {
        rw_read(&self.entries, SOURCE, "get").get(id).copied()
    }

    pub fn unread_count(&self) -> usize {
        rw_read(&self.entries, SOURCE, "unread_count")
            .values()
            .filter(|metadata| !metadata.read)
            .count()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        rw_write(&self.entries, SOURCE, "reset").clear();
    }
}
