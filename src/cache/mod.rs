//! Client-side query cache with tag-based invalidation.
//!
//! This module provides request deduplication and dependency tracking on top
//! of the API client:
//! - Results are memoized by [`CacheKey`] (endpoint name + canonical arguments)
//! - Concurrent queries for one key share a single in-flight fetch
//! - Results declare the [`Tag`]s they provide; mutations declare the tags they
//!   invalidate, and dependent entries are refetched in the background while
//!   the previous value stays readable
//! - Entries nobody subscribes to are evicted after a grace period
//!
//! All bookkeeping happens synchronously under one lock that is never held
//! across an `.await`; the only suspension points are transport calls.

mod key;
mod mutation;
mod query;
mod store;
mod subscription;
mod tags;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::api::ApiClient;

pub use key::{decode, encode, CacheKey};
pub use mutation::Invalidation;
pub use store::{CacheEntry, CachedValue, Listener, ListenerId, QueryStatus};
pub use subscription::Subscription;
pub use tags::{Tag, TagId};

use query::InFlight;
use store::CacheStore;
use subscription::PendingEviction;

const DEFAULT_KEEP_UNUSED_FOR: Duration = Duration::from_secs(60);

/// Cache tuning.
#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// How long an entry with no subscribers is kept before eviction.
  pub keep_unused_for: Duration,
  /// Age after which a fulfilled entry is refetched on the next query.
  /// `None` keeps entries fresh until a mutation invalidates them.
  pub stale_after: Option<Duration>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      keep_unused_for: DEFAULT_KEEP_UNUSED_FOR,
      stale_after: None,
    }
  }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
  fn from(settings: &crate::config::CacheSettings) -> Self {
    Self {
      keep_unused_for: Duration::from_secs(settings.keep_unused_for_secs),
      stale_after: settings.stale_after_secs.map(Duration::from_secs),
    }
  }
}

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
  pub entries: usize,
  pub tags: usize,
  pub in_flight: usize,
  pub pending_evictions: usize,
}

/// Everything guarded by the cache lock.
struct CacheState {
  store: CacheStore,
  in_flight: HashMap<CacheKey, InFlight>,
  evictions: HashMap<CacheKey, PendingEviction>,
  next_eviction_token: u64,
}

impl CacheState {
  fn new() -> Self {
    Self {
      store: CacheStore::new(),
      in_flight: HashMap::new(),
      evictions: HashMap::new(),
      next_eviction_token: 0,
    }
  }
}

struct Inner {
  state: Mutex<CacheState>,
  client: ApiClient,
  config: CacheConfig,
}

/// Handle to one cache. Cheap to clone; clones share the same entries.
///
/// Construct one per application (or per test) and pass it to whatever
/// issues queries and mutations.
#[derive(Clone)]
pub struct CacheContext {
  inner: Arc<Inner>,
}

impl CacheContext {
  pub fn new(client: ApiClient, config: CacheConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(CacheState::new()),
        client,
        config,
      }),
    }
  }

  pub fn client(&self) -> &ApiClient {
    &self.inner.client
  }

  pub fn config(&self) -> &CacheConfig {
    &self.inner.config
  }

  /// Snapshot of the entry for `key`, if cached.
  pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
    self.with_state(|state| state.store.get(key).cloned())
  }

  /// Snapshots of every cached entry, ordered by key.
  pub fn entries(&self) -> Vec<CacheEntry> {
    let mut entries = self.with_state(|state| state.store.entries().cloned().collect::<Vec<_>>());
    entries.sort_by(|a, b| a.key().cmp(b.key()));
    entries
  }

  /// Tags `key` currently provides, as recorded in the tag index.
  pub fn tags_for_key(&self, key: &CacheKey) -> BTreeSet<Tag> {
    self.with_state(|state| state.store.tags_for_key(key))
  }

  pub fn stats(&self) -> CacheStats {
    self.with_state(|state| CacheStats {
      entries: state.store.len(),
      tags: state.store.tag_count(),
      in_flight: state.in_flight.len(),
      pending_evictions: state.evictions.len(),
    })
  }

  /// Call `listener` whenever the status or value of `key` changes, until
  /// [`off_change`](Self::off_change) or until the entry is evicted.
  ///
  /// Listeners run after the cache lock is released, possibly on several
  /// threads at once, so deliveries can overlap; compare
  /// [`CacheEntry::version`] to discard an outdated snapshot.
  pub fn on_change(&self, key: &CacheKey, listener: Listener) -> ListenerId {
    self.with_state(|state| state.store.on_change(key, listener))
  }

  pub fn off_change(&self, key: &CacheKey, id: ListenerId) {
    self.with_state(|state| state.store.off_change(key, id));
  }

  /// Run `f` under the cache lock, then deliver queued change notifications
  /// with the lock released so listeners may call back into the cache.
  fn with_state<R>(&self, f: impl FnOnce(&mut CacheState) -> R) -> R {
    let (result, notifications) = {
      let mut state = self.lock();
      let result = f(&mut state);
      (result, state.store.take_notifications())
    };
    for (listener, entry) in notifications {
      listener(&entry);
    }
    result
  }

  fn lock(&self) -> MutexGuard<'_, CacheState> {
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}
