//! Tags and the bidirectional tag index.
//!
//! A query result declares the tags it provides; a mutation declares the tags
//! it invalidates. The index answers "which cache keys depend on these tags".

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::key::CacheKey;

/// Identity part of a tag: one entity, or the whole collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TagId {
  /// Reserved sentinel for collection-level data.
  List,
  Id(String),
}

/// A logical dependency unit such as `Book:7` or `Book:LIST`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
  pub kind: String,
  pub id: TagId,
}

impl Tag {
  pub fn list(kind: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      id: TagId::List,
    }
  }

  pub fn id(kind: impl Into<String>, id: impl fmt::Display) -> Self {
    Self {
      kind: kind.into(),
      id: TagId::Id(id.to_string()),
    }
  }
}

impl fmt::Display for Tag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.id {
      TagId::List => write!(f, "{}:LIST", self.kind),
      TagId::Id(id) => write!(f, "{}:{}", self.kind, id),
    }
  }
}

/// Tracks tag → cache keys and cache key → tags.
#[derive(Debug, Default)]
pub struct TagIndex {
  tag_to_keys: HashMap<Tag, BTreeSet<CacheKey>>,
  key_to_tags: HashMap<CacheKey, BTreeSet<Tag>>,
}

impl TagIndex {
  #[cfg(test)]
  pub fn new() -> Self {
    Self::default()
  }

  /// Replace the tags provided by `key`, updating both directions.
  pub fn set_provided_tags(&mut self, key: &CacheKey, tags: &BTreeSet<Tag>) {
    let previous = self.key_to_tags.remove(key).unwrap_or_default();

    for stale in previous.difference(tags) {
      self.detach(stale, key);
    }
    for tag in tags {
      self
        .tag_to_keys
        .entry(tag.clone())
        .or_default()
        .insert(key.clone());
    }

    if !tags.is_empty() {
      self.key_to_tags.insert(key.clone(), tags.clone());
    }
  }

  /// Union of all keys providing any of `tags`.
  pub fn keys_for_tags<'a, I>(&self, tags: I) -> BTreeSet<CacheKey>
  where
    I: IntoIterator<Item = &'a Tag>,
  {
    tags
      .into_iter()
      .filter_map(|tag| self.tag_to_keys.get(tag))
      .flatten()
      .cloned()
      .collect()
  }

  pub fn tags_for_key(&self, key: &CacheKey) -> BTreeSet<Tag> {
    self.key_to_tags.get(key).cloned().unwrap_or_default()
  }

  /// Drop every mapping that mentions `key`.
  pub fn remove_key(&mut self, key: &CacheKey) {
    if let Some(tags) = self.key_to_tags.remove(key) {
      for tag in &tags {
        self.detach(tag, key);
      }
    }
  }

  /// Number of distinct tags provided by at least one key.
  pub fn tag_count(&self) -> usize {
    self.tag_to_keys.len()
  }

  /// Iterate over every (tag, key) pair in the tag → keys direction.
  #[cfg(test)]
  pub fn pairs(&self) -> impl Iterator<Item = (&Tag, &CacheKey)> {
    self
      .tag_to_keys
      .iter()
      .flat_map(|(tag, keys)| keys.iter().map(move |key| (tag, key)))
  }

  fn detach(&mut self, tag: &Tag, key: &CacheKey) {
    if let Some(keys) = self.tag_to_keys.get_mut(tag) {
      keys.remove(key);
      if keys.is_empty() {
        self.tag_to_keys.remove(tag);
      }
    }
  }
}
