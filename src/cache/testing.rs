//! Scripted transport and helpers shared by the cache and client tests.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use super::{CacheConfig, CacheContext};
use crate::api::auth::SessionToken;
use crate::api::transport::{
  Method, TransportError, Transport, TransportRequest, TransportResponse,
};
use crate::api::ApiClient;

type Route = (Method, String);

#[derive(Clone)]
enum Reply {
  Status(u16, Value),
  Fail(String),
}

#[derive(Default)]
struct Script {
  replies: HashMap<Route, Reply>,
  calls: HashMap<Route, usize>,
  gates: HashMap<Route, Arc<Semaphore>>,
  last_headers: Option<Vec<(String, String)>>,
}

/// Answers requests from a per-route script and counts calls.
///
/// A held route blocks every request until [`MockTransport::release`] lets it
/// through; the reply is looked up after the gate opens.
#[derive(Default)]
pub struct MockTransport {
  script: Arc<Mutex<Script>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, method: Method, path: &str, data: Value) {
    self.respond_status(method, path, 200, data);
  }

  pub fn respond_status(&self, method: Method, path: &str, status: u16, data: Value) {
    self.script().replies.insert(route(method, path), Reply::Status(status, data));
  }

  pub fn fail(&self, method: Method, path: &str, message: &str) {
    self
      .script()
      .replies
      .insert(route(method, path), Reply::Fail(message.to_string()));
  }

  pub fn hold(&self, method: Method, path: &str) {
    self
      .script()
      .gates
      .insert(route(method, path), Arc::new(Semaphore::new(0)));
  }

  pub fn release(&self, method: Method, path: &str, requests: usize) {
    if let Some(gate) = self.script().gates.get(&route(method, path)) {
      gate.add_permits(requests);
    }
  }

  pub fn calls(&self, method: Method, path: &str) -> usize {
    self
      .script()
      .calls
      .get(&route(method, path))
      .copied()
      .unwrap_or(0)
  }

  pub fn last_headers(&self) -> Option<Vec<(String, String)>> {
    self.script().last_headers.clone()
  }

  fn script(&self) -> std::sync::MutexGuard<'_, Script> {
    self.script.lock().unwrap()
  }
}

impl Transport for MockTransport {
  fn send(
    &self,
    request: TransportRequest,
  ) -> BoxFuture<'static, Result<TransportResponse, TransportError>> {
    let script = Arc::clone(&self.script);
    let route = route(request.method, &request.path);

    let gate = {
      let mut script = script.lock().unwrap();
      *script.calls.entry(route.clone()).or_default() += 1;
      script.last_headers = Some(request.headers);
      script.gates.get(&route).cloned()
    };

    async move {
      if let Some(gate) = gate {
        gate.acquire().await.unwrap().forget();
      }
      let reply = script.lock().unwrap().replies.get(&route).cloned();
      match reply {
        Some(Reply::Status(status, data)) => Ok(TransportResponse { status, data }),
        Some(Reply::Fail(message)) => Err(TransportError(message)),
        None => Err(TransportError(format!(
          "no reply scripted for {} {}",
          route.0.as_str(),
          route.1
        ))),
      }
    }
    .boxed()
  }
}

fn route(method: Method, path: &str) -> Route {
  (method, path.to_string())
}

/// A cache over a fresh mock transport with default settings.
pub fn harness() -> (CacheContext, Arc<MockTransport>) {
  let transport = Arc::new(MockTransport::new());
  let cache = harness_with(&transport, CacheConfig::default());
  (cache, transport)
}

pub fn harness_with(transport: &Arc<MockTransport>, config: CacheConfig) -> CacheContext {
  let client = ApiClient::new(transport.clone(), Arc::new(SessionToken::new(None)));
  CacheContext::new(client, config)
}

/// A cache whose transport answers nothing; for tests that never fetch.
pub fn context() -> CacheContext {
  harness().0
}

/// Yield until no fetch is in flight.
pub async fn wait_idle(cache: &CacheContext) {
  for _ in 0..1000 {
    if cache.with_state(|state| state.in_flight.is_empty()) {
      return;
    }
    tokio::task::yield_now().await;
  }
  panic!("cache still fetching after 1000 yields");
}

pub fn book_json(id: u64, title: &str) -> Value {
  json!({"bookId": id, "title": title, "authorId": 3})
}

pub fn author_json(id: u64, name: &str) -> Value {
  json!({"authorId": id, "authorName": name, "genreId": 1})
}
