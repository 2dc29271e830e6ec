//! Bidirectional tag index.
//!
//! Cache keys are opaque digests, so invalidating "everything about users" needs an
//! explicit record of which keys were written under which tag. The response cache uses
//! it for resource tags, the query cache for table dependencies.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

#[derive(Default)]
struct IndexState {
    tag_to_keys: HashMap<String, HashSet<String>>,
    key_to_tags: HashMap<String, HashSet<String>>,
}

/// Tracks tag → keys and key → tags.
///
/// Taking a tag only forgets that tag. Other tags that listed the same keys keep those
/// references until they are taken themselves; deleting an already-absent key is a no-op
/// for the stores, so the stale references are harmless.
#[derive(Default)]
pub struct TagIndex {
    state: RwLock<IndexState>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key` under each of `tags`.
    pub fn register<I, S>(&self, key: &str, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tags = tags.into_iter().peekable();
        if tags.peek().is_none() {
            return;
        }

        let mut guard = rw_write(&self.state, SOURCE, "register");
        let state = &mut *guard;
        let key_tags = state.key_to_tags.entry(key.to_string()).or_default();
        for tag in tags {
            let tag = tag.as_ref();
            state
                .tag_to_keys
                .entry(tag.to_string())
                .or_default()
                .insert(key.to_string());
            key_tags.insert(tag.to_string());
        }
    }

    /// Keys currently listed under `tag`.
    pub fn keys_for_tag(&self, tag: &str) -> HashSet<String> {
        rw_read(&self.state, SOURCE, "keys_for_tag")
            .tag_to_keys
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    /// Tags `key` was registered under.
    pub fn tags_for_key(&self, key: &str) -> HashSet<String> {
        rw_read(&self.state, SOURCE, "tags_for_key")
            .key_to_tags
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove `key` from every tag that lists it.
    pub fn unregister_key(&self, key: &str) {
        let mut guard = rw_write(&self.state, SOURCE, "unregister_key");
        let state = &mut *guard;

        let Some(tags) = state.key_to_tags.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(keys) = state.tag_to_keys.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    state.tag_to_keys.remove(&tag);
                }
            }
        }
    }

    /// Remove the bucket for `tag`, returning the keys it held.
    pub fn take_tag(&self, tag: &str) -> HashSet<String> {
        let mut guard = rw_write(&self.state, SOURCE, "take_tag");
        let state = &mut *guard;

        let keys = state.tag_to_keys.remove(tag).unwrap_or_default();
        for key in &keys {
            if let Some(tags) = state.key_to_tags.get_mut(key) {
                tags.remove(tag);
                if tags.is_empty() {
                    state.key_to_tags.remove(key);
                }
            }
        }
        keys
    }

    /// Drop every key for which `keep` returns false. Returns the number dropped.
    pub fn retain_keys<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let mut guard = rw_write(&self.state, SOURCE, "retain_keys");
        let state = &mut *guard;

        let before = state.key_to_tags.len();
        state.key_to_tags.retain(|key, _| keep(key.as_str()));
        let key_to_tags = &state.key_to_tags;
        state.tag_to_keys.retain(|_, keys| {
            keys.retain(|key| key_to_tags.contains_key(key));
            !keys.is_empty()
        });
        before - state.key_to_tags.len()
    }

    pub fn clear(&self) {
        let mut state = rw_write(&self.state, SOURCE, "clear");
        state.tag_to_keys.clear();
        state.key_to_tags.clear();
    }

    /// Number of tags with at least one key.
    pub fn tag_count(&self) -> usize {
        rw_read(&self.state, SOURCE, "tag_count").tag_to_keys.len()
    }

    /// Number of keys registered under at least one tag.
    pub fn key_count(&self) -> usize {
        rw_read(&self.state, SOURCE, "key_count").key_to_tags.len()
    }
}
