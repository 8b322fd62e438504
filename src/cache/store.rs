//! Cache entries and the store that owns them.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use super::key::CacheKey;
use super::query::Fetcher;
use super::tags::{Tag, TagIndex};
use crate::error::ErrorInfo;

/// A normalized response, type-erased so one store can hold every endpoint.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Callback invoked with the new entry whenever its status or value changes.
pub type Listener = Arc<dyn Fn(&CacheEntry) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
  /// Created (for instance by a subscription) but never fetched
  #[default]
  Uninitialized,
  /// A fetch is in flight; `value` may still hold the previous result
  Pending,
  /// Last fetch succeeded
  Fulfilled,
  /// Last fetch failed
  Rejected,
}

/// One cached query result.
#[derive(Clone)]
pub struct CacheEntry {
  pub(super) key: CacheKey,
  pub(super) status: QueryStatus,
  pub(super) value: Option<CachedValue>,
  pub(super) error: Option<ErrorInfo>,
  pub(super) last_fetched_at: Option<DateTime<Utc>>,
  pub(super) provided_tags: BTreeSet<Tag>,
  pub(super) subscriber_count: usize,
  /// How to fetch this key again; set by the first query for it.
  pub(super) fetcher: Option<Fetcher>,
  /// Invalidated with no runtime to refetch on; the next query fetches.
  pub(super) invalidated: bool,
  pub(super) version: u64,
}

impl CacheEntry {
  fn new(key: CacheKey) -> Self {
    Self {
      key,
      status: QueryStatus::Uninitialized,
      value: None,
      error: None,
      last_fetched_at: None,
      provided_tags: BTreeSet::new(),
      subscriber_count: 0,
      fetcher: None,
      invalidated: false,
      version: 0,
    }
  }

  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  pub fn status(&self) -> QueryStatus {
    self.status
  }

  pub fn value(&self) -> Option<&CachedValue> {
    self.value.as_ref()
  }

  /// The cached value downcast to the endpoint's output type.
  pub fn value_as<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
    self.value.clone()?.downcast::<T>().ok()
  }

  pub fn error(&self) -> Option<&ErrorInfo> {
    self.error.as_ref()
  }

  pub fn last_fetched_at(&self) -> Option<DateTime<Utc>> {
    self.last_fetched_at
  }

  pub fn provided_tags(&self) -> &BTreeSet<Tag> {
    &self.provided_tags
  }

  pub fn subscriber_count(&self) -> usize {
    self.subscriber_count
  }

  /// Store-wide sequence number of the last status or value change.
  ///
  /// Listeners run outside the cache lock and may be called from several
  /// threads at once; a snapshot with a lower version than one already seen
  /// is outdated.
  pub fn version(&self) -> u64 {
    self.version
  }

  pub fn is_pending(&self) -> bool {
    self.status == QueryStatus::Pending
  }

  pub fn is_fulfilled(&self) -> bool {
    self.status == QueryStatus::Fulfilled
  }

  pub fn is_rejected(&self) -> bool {
    self.status == QueryStatus::Rejected
  }
}

impl fmt::Debug for CacheEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntry")
      .field("key", &self.key)
      .field("status", &self.status)
      .field("has_value", &self.value.is_some())
      .field("error", &self.error)
      .field("last_fetched_at", &self.last_fetched_at)
      .field("provided_tags", &self.provided_tags)
      .field("subscriber_count", &self.subscriber_count)
      .field("version", &self.version)
      .finish_non_exhaustive()
  }
}

/// Owns every cache entry and keeps the tag index in step with them.
///
/// The store is plain data; `CacheContext` serializes access to it and fires
/// the queued change notifications once its lock is released.
#[derive(Default)]
pub struct CacheStore {
  entries: HashMap<CacheKey, CacheEntry>,
  tags: TagIndex,
  listeners: HashMap<CacheKey, Vec<(ListenerId, Listener)>>,
  next_listener: u64,
  next_version: u64,
  notifications: Vec<(Listener, CacheEntry)>,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
    self.entries.get(key)
  }

  pub fn contains(&self, key: &CacheKey) -> bool {
    self.entries.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
    self.entries.values()
  }

  pub fn tag_count(&self) -> usize {
    self.tags.tag_count()
  }

  pub fn tags_for_key(&self, key: &CacheKey) -> BTreeSet<Tag> {
    self.tags.tags_for_key(key)
  }

  /// Apply `mutate` to the entry for `key`, creating it if absent.
  ///
  /// When the status or value changed the entry gets a new version and
  /// listeners are queued.
  pub fn upsert<F>(&mut self, key: &CacheKey, mutate: F) -> CacheEntry
  where
    F: FnOnce(&mut CacheEntry),
  {
    let entry = self
      .entries
      .entry(key.clone())
      .or_insert_with(|| CacheEntry::new(key.clone()));

    let previous_status = entry.status;
    let previous_value = entry.value.clone();
    mutate(entry);

    let changed = entry.status != previous_status || !same_value(&previous_value, &entry.value);
    if changed {
      self.next_version += 1;
      entry.version = self.next_version;
    }
    let snapshot = entry.clone();

    if changed {
      if let Some(listeners) = self.listeners.get(key) {
        for (_, listener) in listeners {
          self
            .notifications
            .push((Arc::clone(listener), snapshot.clone()));
        }
      }
    }

    snapshot
  }

  /// Delete the entry, its listeners and every tag index reference to it.
  pub fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
    self.tags.remove_key(key);
    self.listeners.remove(key);
    self.entries.remove(key)
  }

  /// Replace the tags `key` provides. No-op for unknown keys.
  pub fn set_provided_tags(&mut self, key: &CacheKey, tags: BTreeSet<Tag>) {
    if let Some(entry) = self.entries.get_mut(key) {
      self.tags.set_provided_tags(key, &tags);
      entry.provided_tags = tags;
    }
  }

  pub fn keys_for_tags<'a, I>(&self, tags: I) -> BTreeSet<CacheKey>
  where
    I: IntoIterator<Item = &'a Tag>,
  {
    self.tags.keys_for_tags(tags)
  }

  /// Register `listener` for `key`. It stays registered until `off_change`
  /// or until the entry is removed.
  pub fn on_change(&mut self, key: &CacheKey, listener: Listener) -> ListenerId {
    self.next_listener += 1;
    let id = ListenerId(self.next_listener);
    self
      .listeners
      .entry(key.clone())
      .or_default()
      .push((id, listener));
    id
  }

  pub fn off_change(&mut self, key: &CacheKey, id: ListenerId) {
    if let Some(listeners) = self.listeners.get_mut(key) {
      listeners.retain(|(existing, _)| *existing != id);
      if listeners.is_empty() {
        self.listeners.remove(key);
      }
    }
  }

  /// Drain notifications queued by `upsert`.
  pub fn take_notifications(&mut self) -> Vec<(Listener, CacheEntry)> {
    std::mem::take(&mut self.notifications)
  }

  /// Every provided tag is indexed and every indexed pair is provided.
  #[cfg(test)]
  pub fn is_symmetric(&self) -> bool {
    let forward = self.entries.values().all(|entry| {
      entry
        .provided_tags
        .iter()
        .all(|tag| self.tags.keys_for_tags([tag]).contains(&entry.key))
    });
    let backward = self.tags.pairs().all(|(tag, key)| {
      self
        .entries
        .get(key)
        .is_some_and(|entry| entry.provided_tags.contains(tag))
    });
    forward && backward
  }
}

fn same_value(a: &Option<CachedValue>, b: &Option<CachedValue>) -> bool {
  match (a, b) {
    (None, None) => true,
    (Some(a), Some(b)) => Arc::ptr_eq(a, b),
    _ => false,
  }
}
