//! Subscriptions and eviction of unused entries.

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::debug;

use super::key::{self, CacheKey};
use super::store::{CacheEntry, ListenerId};
use super::{CacheContext, CacheState};
use crate::api::QueryEndpoint;
use crate::error::ErrorInfo;

/// A timer that evicts a key once it has gone unused for the grace period.
pub(super) struct PendingEviction {
  token: u64,
  handle: AbortHandle,
}

/// Keeps a cache entry alive and delivers its updates.
///
/// Dropping the subscription releases it; once an entry has no subscribers
/// it is evicted after [`CacheConfig::keep_unused_for`](super::CacheConfig).
pub struct Subscription {
  cache: CacheContext,
  key: CacheKey,
  listener: ListenerId,
  updates: watch::Receiver<CacheEntry>,
}

impl Subscription {
  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  /// The entry as it is now.
  pub fn current(&self) -> Option<CacheEntry> {
    self.cache.entry(&self.key)
  }

  /// Wait for the next status or value change after subscribing (or after
  /// the previous call). Intermediate states may be skipped if the caller is
  /// slow; the latest one is always delivered.
  pub async fn changed(&mut self) -> Option<CacheEntry> {
    self.updates.changed().await.ok()?;
    Some(self.updates.borrow_and_update().clone())
  }

  pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.cache.release_subscription(&self.key, self.listener);
  }
}

impl CacheContext {
  /// Subscribe to `key`, creating an uninitialized entry if needed. Does not
  /// fetch.
  pub fn subscribe(&self, key: &CacheKey) -> Subscription {
    let (listener, updates) = self.with_state(|state| {
      self.cancel_eviction(state, key);
      let entry = state.store.upsert(key, |entry| entry.subscriber_count += 1);
      let (tx, rx) = watch::channel(entry);
      let listener = state.store.on_change(
        key,
        Arc::new(move |entry: &CacheEntry| {
          // Deliveries from different threads can arrive out of order.
          tx.send_if_modified(|latest| {
            if entry.version <= latest.version {
              return false;
            }
            *latest = entry.clone();
            true
          });
        }),
      );
      (listener, rx)
    });

    debug!(%key, "subscribed");
    Subscription {
      cache: self.clone(),
      key: key.clone(),
      listener,
      updates,
    }
  }

  /// Subscribe to an endpoint query and run it.
  ///
  /// A failed fetch still yields the subscription; the error is on the entry.
  pub async fn subscribe_query<E: QueryEndpoint>(
    &self,
    args: E::Args,
  ) -> Result<Subscription, ErrorInfo> {
    let key = key::encode(E::NAME, &args)?;
    let subscription = self.subscribe(&key);
    if let Err(error) = self.query::<E>(args).await {
      debug!(%key, %error, "subscribed query failed");
    }
    Ok(subscription)
  }

  fn release_subscription(&self, key: &CacheKey, listener: ListenerId) {
    self.with_state(|state| {
      state.store.off_change(key, listener);
      if !state.store.contains(key) {
        return;
      }
      let entry = state.store.upsert(key, |entry| {
        entry.subscriber_count = entry.subscriber_count.saturating_sub(1);
      });
      debug!(%key, remaining = entry.subscriber_count, "unsubscribed");
      if entry.subscriber_count == 0 {
        self.schedule_eviction(state, key);
      }
    });
  }

  /// Arm the eviction timer for `key`, replacing any earlier one.
  ///
  /// Outside a tokio runtime there is nothing to run a timer on, so an idle
  /// entry is dropped immediately.
  pub(super) fn schedule_eviction(&self, state: &mut CacheState, key: &CacheKey) {
    self.cancel_eviction(state, key);

    let Ok(runtime) = Handle::try_current() else {
      if !state.in_flight.contains_key(key) {
        debug!(%key, "no runtime, evicting now");
        state.store.remove(key);
      }
      return;
    };

    state.next_eviction_token += 1;
    let token = state.next_eviction_token;
    let delay = self.config().keep_unused_for;
    let cache = Arc::downgrade(&self.inner);
    let task_key = key.clone();

    let task = runtime.spawn(async move {
      tokio::time::sleep(delay).await;
      if let Some(inner) = cache.upgrade() {
        CacheContext { inner }.evict_if_unused(&task_key, token);
      }
    });

    state.evictions.insert(
      key.clone(),
      PendingEviction {
        token,
        handle: task.abort_handle(),
      },
    );
  }

  pub(super) fn cancel_eviction(&self, state: &mut CacheState, key: &CacheKey) {
    if let Some(pending) = state.evictions.remove(key) {
      pending.handle.abort();
    }
  }

  fn evict_if_unused(&self, key: &CacheKey, token: u64) {
    self.with_state(|state| {
      // A newer timer (or a cancellation) owns this key now.
      if state.evictions.get(key).map(|p| p.token) != Some(token) {
        return;
      }
      state.evictions.remove(key);

      let idle = state
        .store
        .get(key)
        .is_some_and(|entry| entry.subscriber_count == 0);
      if idle && !state.in_flight.contains_key(key) {
        debug!(%key, "evicting unused entry");
        state.store.remove(key);
      }
    });
  }
}
