//! Mutations and tag-based invalidation.

use std::sync::Arc;
use tracing::{debug, info};

use super::key::CacheKey;
use super::tags::Tag;
use super::{CacheContext, CacheState};
use crate::api::MutationEndpoint;
use crate::error::ErrorInfo;

/// What an invalidation did to the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidation {
  /// Subscribed entries whose refetch was started (or will follow a fetch
  /// already in flight, or the next query when no runtime is running)
  pub refetched: Vec<CacheKey>,
  /// Unsubscribed entries that were dropped (or will be once their fetch
  /// settles)
  pub evicted: Vec<CacheKey>,
}

impl Invalidation {
  pub fn is_empty(&self) -> bool {
    self.refetched.is_empty() && self.evicted.is_empty()
  }
}

impl CacheContext {
  /// Perform a write. On success, every entry providing one of the
  /// mutation's invalidated tags is refetched or evicted. Failures leave the
  /// cache untouched.
  pub async fn mutate<M: MutationEndpoint>(&self, args: M::Args) -> Result<Arc<M::Output>, ErrorInfo> {
    let output = self.client().mutation::<M>(&args).await?;
    let tags = M::invalidates_tags(&args, &output);

    let invalidation = self.invalidate_tags(&tags);
    info!(
      mutation = M::NAME,
      refetched = invalidation.refetched.len(),
      evicted = invalidation.evicted.len(),
      "mutation applied"
    );

    Ok(Arc::new(output))
  }

  /// Invalidate every entry providing any of `tags`.
  ///
  /// Subscribed entries keep their current value and refetch in the
  /// background, or on their next query when called outside a tokio runtime.
  /// Unsubscribed entries are evicted. Entries with a fetch in flight are
  /// marked so that fetch's result is superseded.
  pub fn invalidate_tags(&self, tags: &[Tag]) -> Invalidation {
    self.with_state(|state| self.invalidate_locked(state, tags))
  }

  fn invalidate_locked(&self, state: &mut CacheState, tags: &[Tag]) -> Invalidation {
    let mut invalidation = Invalidation::default();

    for key in state.store.keys_for_tags(tags) {
      let Some(entry) = state.store.get(&key) else {
        continue;
      };
      let subscribed = entry.subscriber_count > 0;
      let fetcher = entry.fetcher.clone();

      if let Some(in_flight) = state.in_flight.get_mut(&key) {
        debug!(%key, "invalidated while fetching");
        in_flight.stale = true;
      } else if subscribed {
        match fetcher {
          Some(fetcher) => {
            debug!(%key, "refetching");
            self.cancel_eviction(state, &key);
            self.revalidate(state, &key, fetcher);
          }
          // Never queried, nothing to refetch.
          None => continue,
        }
      } else {
        debug!(%key, "evicting");
        self.cancel_eviction(state, &key);
        state.store.remove(&key);
      }

      if subscribed {
        invalidation.refetched.push(key);
      } else {
        invalidation.evicted.push(key);
      }
    }

    invalidation
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::Method;
  use crate::cache::testing::{author_json, book_json, harness, wait_idle};
  use crate::cache::QueryStatus;
  use crate::library::endpoints::{
    CreateBook, DeleteBook, GetAuthorById, GetBookById, GetBooks, UpdateArgs, UpdateBook,
  };
  use crate::library::types::{Book, CreateBookInput};
  use serde_json::json;

  fn input(title: &str) -> CreateBookInput {
    CreateBookInput {
      title: title.to_string(),
      description: None,
      isbn: None,
      publication_year: None,
      author_id: 3,
    }
  }

  #[tokio::test]
  async fn update_refetches_dependents_only() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book", json!([book_json(7, "Dune"), book_json(9, "Emma")]));
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));
    transport.respond(Method::Get, "/authors/3", author_json(3, "Herbert"));

    let _books = cache.subscribe_query::<GetBooks>(()).await.unwrap();
    let _book = cache.subscribe_query::<GetBookById>(7).await.unwrap();
    let _author = cache.subscribe_query::<GetAuthorById>(3).await.unwrap();

    transport.respond(Method::Put, "/book/7", book_json(7, "Dune (revised)"));
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune (revised)"));
    transport.respond(
      Method::Get,
      "/book",
      json!([book_json(7, "Dune (revised)"), book_json(9, "Emma")]),
    );

    cache
      .mutate::<UpdateBook>(UpdateArgs {
        id: 7,
        data: input("Dune (revised)"),
      })
      .await
      .unwrap();
    wait_idle(&cache).await;

    assert_eq!(transport.calls(Method::Get, "/book/7"), 2);
    assert_eq!(transport.calls(Method::Get, "/book"), 2);
    assert_eq!(transport.calls(Method::Get, "/authors/3"), 1);

    let book = cache.query::<GetBookById>(7).await.unwrap();
    assert_eq!(book.title, "Dune (revised)");
    let list = cache.query::<GetBooks>(()).await.unwrap();
    assert_eq!(list[0].title, "Dune (revised)");
  }

  #[tokio::test]
  async fn invalidation_matches_any_tag() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book", json!([book_json(7, "Dune")]));
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));
    transport.respond(Method::Get, "/book/9", book_json(9, "Emma"));

    let list = cache.subscribe_query::<GetBooks>(()).await.unwrap();
    let seven = cache.subscribe_query::<GetBookById>(7).await.unwrap();
    let nine = cache.subscribe_query::<GetBookById>(9).await.unwrap();

    let invalidation = cache.invalidate_tags(&[Tag::id("Book", 7)]);

    let mut refetched = invalidation.refetched.clone();
    refetched.sort();
    let mut expected = vec![list.key().clone(), seven.key().clone()];
    expected.sort();
    assert_eq!(refetched, expected);
    assert!(!invalidation.refetched.contains(nine.key()));
    assert!(invalidation.evicted.is_empty());
  }

  #[tokio::test]
  async fn invalidation_triggers_exactly_the_dependent_set() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book", json!([]));
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));
    transport.respond(Method::Get, "/book/9", book_json(9, "Emma"));

    let list = cache.subscribe_query::<GetBooks>(()).await.unwrap();
    let seven = cache.subscribe_query::<GetBookById>(7).await.unwrap();
    let nine = cache.subscribe_query::<GetBookById>(9).await.unwrap();
    assert_eq!(
      cache.tags_for_key(list.key()).into_iter().collect::<Vec<_>>(),
      vec![Tag::list("Book")]
    );

    cache.invalidate_tags(&[Tag::id("Book", 7), Tag::list("Book")]);
    wait_idle(&cache).await;

    assert_eq!(transport.calls(Method::Get, "/book"), 2);
    assert_eq!(transport.calls(Method::Get, "/book/7"), 2);
    assert_eq!(transport.calls(Method::Get, "/book/9"), 1);
    assert_eq!(nine.current().unwrap().status(), QueryStatus::Fulfilled);
    drop(seven);
  }

  #[tokio::test]
  async fn subscribed_entry_keeps_value_while_refetching() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));
    let sub = cache.subscribe_query::<GetBookById>(7).await.unwrap();

    transport.hold(Method::Get, "/book/7");
    cache.invalidate_tags(&[Tag::id("Book", 7)]);

    let entry = sub.current().unwrap();
    assert_eq!(entry.status(), QueryStatus::Pending);
    assert_eq!(entry.value_as::<Book>().unwrap().title, "Dune");

    transport.release(Method::Get, "/book/7", 1);
    wait_idle(&cache).await;
    assert_eq!(sub.current().unwrap().status(), QueryStatus::Fulfilled);
  }

  #[tokio::test]
  async fn failed_refetch_rejects_and_clears_value() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));
    let sub = cache.subscribe_query::<GetBookById>(7).await.unwrap();

    transport.respond_status(Method::Get, "/book/7", 404, json!("gone"));
    cache.invalidate_tags(&[Tag::id("Book", 7)]);
    wait_idle(&cache).await;

    let entry = sub.current().unwrap();
    assert_eq!(entry.status(), QueryStatus::Rejected);
    assert!(entry.value().is_none());
    assert!(matches!(entry.error(), Some(ErrorInfo::Http { status: 404, .. })));
  }

  #[tokio::test]
  async fn unsubscribed_entries_are_evicted() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));
    cache.query::<GetBookById>(7).await.unwrap();

    let invalidation = cache.invalidate_tags(&[Tag::id("Book", 7)]);

    assert_eq!(invalidation.evicted.len(), 1);
    assert!(cache.select::<GetBookById>(&7).unwrap().is_none());
    assert_eq!(transport.calls(Method::Get, "/book/7"), 1);
  }

  #[tokio::test]
  async fn failed_mutation_invalidates_nothing() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book", json!([]));
    let _list = cache.subscribe_query::<GetBooks>(()).await.unwrap();

    transport.respond_status(Method::Post, "/book", 400, json!({"message": "bad"}));
    let err = cache.mutate::<CreateBook>(input("")).await.unwrap_err();

    assert!(matches!(err, ErrorInfo::Http { status: 400, .. }));
    wait_idle(&cache).await;
    assert_eq!(transport.calls(Method::Get, "/book"), 1);
  }

  #[tokio::test]
  async fn delete_invalidates_item_and_list() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book", json!([book_json(7, "Dune")]));
    let _list = cache.subscribe_query::<GetBooks>(()).await.unwrap();

    transport.respond_status(Method::Delete, "/book/7", 204, json!(null));
    transport.respond(Method::Get, "/book", json!([]));
    let deleted = cache.mutate::<DeleteBook>(7).await.unwrap();
    wait_idle(&cache).await;

    assert!(deleted.success);
    assert!(cache.query::<GetBooks>(()).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn invalidation_during_fetch_supersedes_result() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));
    let sub = cache.subscribe_query::<GetBookById>(7).await.unwrap();

    transport.hold(Method::Get, "/book/7");
    let running = {
      let cache = cache.clone();
      tokio::spawn(async move { cache.refetch::<GetBookById>(7).await })
    };
    tokio::task::yield_now().await;

    let invalidation = cache.invalidate_tags(&[Tag::id("Book", 7)]);
    assert_eq!(invalidation.refetched, vec![sub.key().clone()]);

    transport.respond(Method::Get, "/book/7", book_json(7, "Dune Messiah"));
    transport.release(Method::Get, "/book/7", 2);
    running.await.unwrap().unwrap();
    wait_idle(&cache).await;

    assert_eq!(transport.calls(Method::Get, "/book/7"), 3);
    let current = sub.current().unwrap();
    assert_eq!(current.value_as::<Book>().unwrap().title, "Dune Messiah");
  }

  #[tokio::test]
  async fn unsubscribed_key_invalidated_during_fetch_is_dropped() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));
    cache.query::<GetBookById>(7).await.unwrap();

    transport.hold(Method::Get, "/book/7");
    let running = {
      let cache = cache.clone();
      tokio::spawn(async move { cache.refetch::<GetBookById>(7).await })
    };
    tokio::task::yield_now().await;

    let invalidation = cache.invalidate_tags(&[Tag::id("Book", 7)]);
    assert_eq!(invalidation.evicted.len(), 1);
    assert!(cache.select::<GetBookById>(&7).unwrap().is_some());

    transport.release(Method::Get, "/book/7", 1);
    assert_eq!(running.await.unwrap().unwrap().title, "Dune");
    assert!(cache.select::<GetBookById>(&7).unwrap().is_none());
    assert_eq!(transport.calls(Method::Get, "/book/7"), 2);
  }

  fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .unwrap()
  }

  #[test]
  fn invalidation_outside_runtime_defers_refetch() {
    let (cache, transport) = harness();
    transport.respond(Method::Get, "/book/7", book_json(7, "Dune"));
    let sub = runtime()
      .block_on(cache.subscribe_query::<GetBookById>(7))
      .unwrap();

    transport.respond(Method::Get, "/book/7", book_json(7, "Dune Messiah"));
    let invalidation = cache.invalidate_tags(&[Tag::id("Book", 7)]);

    assert_eq!(invalidation.refetched, vec![sub.key().clone()]);
    let entry = sub.current().unwrap();
    assert_eq!(entry.status(), QueryStatus::Fulfilled);
    assert_eq!(entry.value_as::<Book>().unwrap().title, "Dune");
    assert_eq!(transport.calls(Method::Get, "/book/7"), 1);

    let book = runtime().block_on(cache.query::<GetBookById>(7)).unwrap();
    assert_eq!(book.title, "Dune Messiah");
    assert_eq!(transport.calls(Method::Get, "/book/7"), 2);
  }

  #[test]
  fn empty_invalidation() {
    assert!(Invalidation::default().is_empty());
  }
}
