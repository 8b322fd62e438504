//! Query execution: cache hits, request coalescing, background fetches.
//!
//! # Example
//!
//! ```ignore
//! let cache = CacheContext::new(client, CacheConfig::default());
//!
//! // Both calls share one network request.
//! let (a, b) = tokio::join!(
//!     cache.query::<GetBookById>(7),
//!     cache.query::<GetBookById>(7),
//! );
//!
//! // Served from cache until a mutation invalidates `Book:7`.
//! let again = cache.query::<GetBookById>(7).await?;
//! ```

use chrono::Utc;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::key::{self, CacheKey};
use super::store::{CacheEntry, CachedValue, QueryStatus};
use super::tags::Tag;
use super::{CacheContext, CacheState};
use crate::api::QueryEndpoint;
use crate::error::ErrorInfo;

/// What a single fetch produced: the value (or error) and the tags it provides.
pub struct FetchOutcome {
  pub result: Result<CachedValue, ErrorInfo>,
  pub tags: BTreeSet<Tag>,
}

impl FetchOutcome {
  fn aborted(reason: &str) -> Self {
    Self {
      result: Err(ErrorInfo::Aborted(reason.to_string())),
      tags: BTreeSet::new(),
    }
  }
}

/// Factory for fetch futures; stored on the entry so invalidation can refetch
/// a key without knowing its endpoint type.
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, FetchOutcome> + Send + Sync>;

type SharedFetch = Shared<BoxFuture<'static, Result<CachedValue, ErrorInfo>>>;

/// The one outstanding fetch for a key.
pub(super) struct InFlight {
  fetch: SharedFetch,
  /// Set when the key was invalidated while this fetch was running; its
  /// result is then superseded by an immediate refetch (or eviction).
  pub(super) stale: bool,
}

enum Plan {
  Cached(CachedValue),
  Wait(SharedFetch),
  Failed(ErrorInfo),
}

impl CacheContext {
  /// Return the cached result for `args`, joining or starting a fetch if needed.
  pub async fn query<E: QueryEndpoint>(&self, args: E::Args) -> Result<Arc<E::Output>, ErrorInfo> {
    self.run_query::<E>(args, false).await
  }

  /// Fetch `args` again even if a fresh value is cached. Joins a fetch that is
  /// already in flight rather than starting a second one.
  pub async fn refetch<E: QueryEndpoint>(
    &self,
    args: E::Args,
  ) -> Result<Arc<E::Output>, ErrorInfo> {
    self.run_query::<E>(args, true).await
  }

  /// Read the entry for `args` without fetching.
  pub fn select<E: QueryEndpoint>(&self, args: &E::Args) -> Result<Option<CacheEntry>, ErrorInfo> {
    let key = key::encode(E::NAME, args)?;
    Ok(self.entry(&key))
  }

  async fn run_query<E: QueryEndpoint>(
    &self,
    args: E::Args,
    force: bool,
  ) -> Result<Arc<E::Output>, ErrorInfo> {
    let key = key::encode(E::NAME, &args)?;
    let fetcher = self.fetcher_for::<E>(args);

    // Registration completes before the first await, so a second caller
    // always sees this fetch in the in-flight table.
    let plan = self.with_state(|state| self.plan(state, &key, fetcher, force));

    let value = match plan {
      Plan::Cached(value) => value,
      Plan::Wait(fetch) => fetch.await?,
      Plan::Failed(error) => return Err(error),
    };

    value
      .downcast::<E::Output>()
      .map_err(|_| ErrorInfo::Shape(format!("cached value for {} has an unexpected type", key)))
  }

  fn plan(&self, state: &mut CacheState, key: &CacheKey, fetcher: Fetcher, force: bool) -> Plan {
    if let Some(in_flight) = state.in_flight.get(key) {
      debug!(%key, "joining in-flight fetch");
      return Plan::Wait(in_flight.fetch.clone());
    }

    if !force {
      if let Some(entry) = state.store.get(key) {
        if entry.status == QueryStatus::Fulfilled && !entry.invalidated && self.is_fresh(entry) {
          if let Some(value) = entry.value.clone() {
            debug!(%key, "cache hit");
            return Plan::Cached(value);
          }
        }
      }
    }

    match self.start_fetch(state, key, fetcher) {
      Some(fetch) => Plan::Wait(fetch),
      None => Plan::Failed(ErrorInfo::Aborted("no tokio runtime to fetch on".to_string())),
    }
  }

  fn is_fresh(&self, entry: &CacheEntry) -> bool {
    let (Some(stale_after), Some(fetched_at)) = (self.config().stale_after, entry.last_fetched_at)
    else {
      return true;
    };
    // A negative age (clock moved backwards) counts as fresh.
    (Utc::now() - fetched_at)
      .to_std()
      .map(|age| age < stale_after)
      .unwrap_or(true)
  }

  /// Mark `key` pending, spawn its fetch and register it as in flight.
  ///
  /// The fetch runs on its own task so it completes and is cached even if
  /// every caller stops waiting for it. Returns `None`, leaving the entry
  /// untouched, when called outside a tokio runtime.
  fn start_fetch(
    &self,
    state: &mut CacheState,
    key: &CacheKey,
    fetcher: Fetcher,
  ) -> Option<SharedFetch> {
    let runtime = Handle::try_current().ok()?;

    debug!(%key, "starting fetch");
    state.store.upsert(key, |entry| {
      entry.status = QueryStatus::Pending;
      entry.fetcher = Some(Arc::clone(&fetcher));
      entry.invalidated = false;
    });

    let ctx = self.clone();
    let task_key = key.clone();
    let task = runtime.spawn(async move {
      let outcome = AssertUnwindSafe(fetcher())
        .catch_unwind()
        .await
        .unwrap_or_else(|_| FetchOutcome::aborted("fetch panicked"));
      let result = outcome.result.clone();
      ctx.settle(&task_key, outcome);
      result
    });

    let fetch = task
      .map(|joined| joined.unwrap_or_else(|e| Err(ErrorInfo::Aborted(e.to_string()))))
      .boxed()
      .shared();

    state.in_flight.insert(
      key.clone(),
      InFlight {
        fetch: fetch.clone(),
        stale: false,
      },
    );
    Some(fetch)
  }

  /// Refetch `key` in the background. Outside a runtime the entry keeps its
  /// value and the next query for it fetches instead.
  pub(super) fn revalidate(&self, state: &mut CacheState, key: &CacheKey, fetcher: Fetcher) {
    if self.start_fetch(state, key, fetcher).is_none() {
      debug!(%key, "no runtime, refetching on next query");
      state.store.upsert(key, |entry| entry.invalidated = true);
    }
  }

  /// Record a finished fetch and decide what happens to the entry next.
  fn settle(&self, key: &CacheKey, outcome: FetchOutcome) {
    self.with_state(|state| {
      let stale = state.in_flight.remove(key).is_some_and(|f| f.stale);
      if !state.store.contains(key) {
        return;
      }

      let FetchOutcome { result, tags } = outcome;
      let now = Utc::now();
      let entry = match result {
        Ok(value) => state.store.upsert(key, |entry| {
          entry.status = QueryStatus::Fulfilled;
          entry.value = Some(value);
          entry.error = None;
          entry.last_fetched_at = Some(now);
        }),
        Err(error) => {
          warn!(%key, %error, "fetch failed");
          state.store.upsert(key, |entry| {
            entry.status = QueryStatus::Rejected;
            entry.value = None;
            entry.error = Some(error);
            entry.last_fetched_at = Some(now);
          })
        }
      };
      state.store.set_provided_tags(key, tags);

      let subscribed = entry.subscriber_count > 0;
      match (stale, subscribed, entry.fetcher) {
        (true, true, Some(fetcher)) => {
          debug!(%key, "result superseded by invalidation, refetching");
          self.revalidate(state, key, fetcher);
        }
        (true, false, _) => {
          debug!(%key, "result superseded by invalidation, evicting");
          self.cancel_eviction(state, key);
          state.store.remove(key);
        }
        (_, false, _) => self.schedule_eviction(state, key),
        _ => {}
      }
    });
  }

  fn fetcher_for<E: QueryEndpoint>(&self, args: E::Args) -> Fetcher {
    let client = self.client().clone();
    let args = Arc::new(args);

    Arc::new(move || {
      let client = client.clone();
      let args = Arc::clone(&args);
      async move {
        let result = client.query::<E>(&args).await;
        let tags = E::provides_tags(&args, result.as_ref().ok())
          .into_iter()
          .collect();
        FetchOutcome {
          result: result.map(|output| Arc::new(output) as CachedValue),
          tags,
        }
      }
      .boxed()
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::Method;
  use crate::cache::testing::{book_json, harness, harness_with, MockTransport};
  use crate::cache::CacheConfig;
  use crate::library::endpoints::{GetAuthorById, GetBookById, GetBooks};
  use crate::library::types::Book;
  use serde_json::json;
  use std::time::Duration;

  #[tokio::test]
  async fn concurrent_queries_share_one_fetch() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));

    let (a, b) = tokio::join!(
      cache.query::<GetBookById>(7),
      cache.query::<GetBookById>(7)
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.title, "Dune");
    assert_eq!(transport.calls(Method::Get, "/book/7"), 1);
  }

  #[tokio::test]
  async fn many_waiters_one_transport_call() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book", json!([]));
    transport.hold(Method::Get, "/book");

    let waiters: Vec<_> = (0..5)
      .map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move { cache.query::<GetBooks>(()).await })
      })
      .collect();
    tokio::task::yield_now().await;
    transport.release(Method::Get, "/book", 1);

    for waiter in waiters {
      assert!(waiter.await.unwrap().unwrap().is_empty());
    }
    assert_eq!(transport.calls(Method::Get, "/book"), 1);
  }

  #[tokio::test]
  async fn fulfilled_entry_is_served_from_cache() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));

    let first = cache.query::<GetBookById>(7).await.unwrap();
    let second = cache.query::<GetBookById>(7).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(transport.calls(Method::Get, "/book/7"), 1);
  }

  #[tokio::test]
  async fn different_args_fetch_separately() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));
    transport.respond(Method::Get, "/book/8", book_json(8, "Emma"));

    let seven = cache.query::<GetBookById>(7).await.unwrap();
    let eight = cache.query::<GetBookById>(8).await.unwrap();

    assert_eq!(seven.title, "Dune");
    assert_eq!(eight.title, "Emma");
  }

  #[tokio::test]
  async fn fulfilled_entry_records_value_and_tags() {
    let (cache, transport) = harness();
    transport.respond(
      Method::Get,
      "/book",
      json!({"data": [book_json(7, "Dune"), book_json(9, "Emma")]}),
    );

    cache.query::<GetBooks>(()).await.unwrap();

    let entry = cache.select::<GetBooks>(&()).unwrap().unwrap();
    assert_eq!(entry.status(), QueryStatus::Fulfilled);
    assert!(entry.last_fetched_at().is_some());
    assert_eq!(entry.value_as::<Vec<Book>>().unwrap().len(), 2);
    assert!(entry.provided_tags().contains(&Tag::id("Book", 9)));
    assert!(entry.provided_tags().contains(&Tag::list("Book")));
  }

  #[tokio::test]
  async fn failure_rejects_entry_and_reaches_every_caller() {
    let (cache, transport) = harness();
    transport.respond_status(Method::Get, "/authors/3", 500, json!("boom"));

    let (a, b) = tokio::join!(
      cache.query::<GetAuthorById>(3),
      cache.query::<GetAuthorById>(3)
    );

    let expected = ErrorInfo::Http {
      status: 500,
      body: "boom".to_string(),
    };
    assert_eq!(a.unwrap_err(), expected);
    assert_eq!(b.unwrap_err(), expected);

    let entry = cache.select::<GetAuthorById>(&3).unwrap().unwrap();
    assert_eq!(entry.status(), QueryStatus::Rejected);
    assert_eq!(entry.error(), Some(&expected));
    assert!(entry.provided_tags().contains(&Tag::id("Author", 3)));
  }

  #[tokio::test]
  async fn rejected_entry_is_fetched_again() {
    let (cache, transport) = harness();
    transport.fail(Method::Get, "/book/7", "connection refused");
    assert!(cache.query::<GetBookById>(7).await.is_err());

    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));
    let book = cache.query::<GetBookById>(7).await.unwrap();

    assert_eq!(book.title, "Dune");
    assert_eq!(transport.calls(Method::Get, "/book/7"), 2);
    let entry = cache.select::<GetBookById>(&7).unwrap().unwrap();
    assert!(entry.error().is_none());
  }

  #[tokio::test]
  async fn refetch_bypasses_fresh_entry() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));
    cache.query::<GetBookById>(7).await.unwrap();

    transport.respond(Method::Get, "/book/7", book_json(7, "Dune Messiah"));
    let book = cache.refetch::<GetBookById>(7).await.unwrap();

    assert_eq!(book.title, "Dune Messiah");
    assert_eq!(transport.calls(Method::Get, "/book/7"), 2);
  }

  #[tokio::test]
  async fn dropped_caller_does_not_cancel_fetch() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));
    transport.hold(Method::Get, "/book/7");

    let waiter = {
      let cache = cache.clone();
      tokio::spawn(async move { cache.query::<GetBookById>(7).await })
    };
    tokio::task::yield_now().await;
    waiter.abort();

    transport.release(Method::Get, "/book/7", 1);
    let book = cache.query::<GetBookById>(7).await.unwrap();

    assert_eq!(book.title, "Dune");
    assert_eq!(transport.calls(Method::Get, "/book/7"), 1);
  }

  #[tokio::test]
  async fn listeners_may_reenter_the_cache() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));
    let key = encode_key(7);

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let reader = cache.clone();
    cache.on_change(
      &key,
      Arc::new(move |entry: &CacheEntry| {
        // Reading back under the listener must not deadlock.
        let current = reader.entry(entry.key()).map(|e| e.status());
        sink.lock().unwrap().push(current);
      }),
    );

    cache.query::<GetBookById>(7).await.unwrap();

    assert_eq!(
      *seen.lock().unwrap(),
      vec![Some(QueryStatus::Pending), Some(QueryStatus::Fulfilled)]
    );
  }

  #[tokio::test]
  async fn stale_after_triggers_refetch() {
    let transport = Arc::new(MockTransport::new());
    let cache = harness_with(
      &transport,
      CacheConfig {
        keep_unused_for: Duration::from_secs(3600),
        stale_after: Some(Duration::ZERO),
      },
    );
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));

    cache.query::<GetBookById>(7).await.unwrap();
    cache.query::<GetBookById>(7).await.unwrap();

    assert_eq!(transport.calls(Method::Get, "/book/7"), 2);
  }

  #[test]
  fn query_outside_runtime_fails_without_fetching() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));

    let err = futures::executor::block_on(cache.query::<GetBookById>(7)).unwrap_err();

    assert!(matches!(err, ErrorInfo::Aborted(_)));
    assert_eq!(transport.calls(Method::Get, "/book/7"), 0);
    assert!(cache.select::<GetBookById>(&7).unwrap().is_none());
  }

  fn encode_key(id: u64) -> CacheKey {
    key::encode(GetBookById::NAME, &id).unwrap()
  }
}
