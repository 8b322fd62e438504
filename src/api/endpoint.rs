//! Endpoint declarations: what to send, how to read the answer, which tags it touches.

use serde::Serialize;
use serde_json::Value;

use super::transport::Method;
use crate::cache::Tag;
use crate::error::ErrorInfo;

/// Method, path and optional JSON body for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
}

impl Request {
  pub fn get(path: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      path: path.into(),
      body: None,
    }
  }

  pub fn post(path: impl Into<String>, body: Value) -> Self {
    Self {
      method: Method::Post,
      path: path.into(),
      body: Some(body),
    }
  }

  pub fn put(path: impl Into<String>, body: Value) -> Self {
    Self {
      method: Method::Put,
      path: path.into(),
      body: Some(body),
    }
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self {
      method: Method::Delete,
      path: path.into(),
      body: None,
    }
  }
}

/// A cached read.
pub trait QueryEndpoint: Send + Sync + 'static {
  /// Arguments; serialized into the cache key.
  type Args: Serialize + Send + Sync + 'static;
  type Output: Send + Sync + 'static;

  /// Endpoint name, the first half of every cache key for this endpoint.
  const NAME: &'static str;

  fn request(args: &Self::Args) -> Request;

  /// Map the wire body to the output type.
  fn normalize(data: Value) -> Result<Self::Output, ErrorInfo>;

  /// Tags the result depends on. `output` is `None` when the fetch failed.
  fn provides_tags(args: &Self::Args, output: Option<&Self::Output>) -> Vec<Tag>;
}

/// An uncached write.
pub trait MutationEndpoint: Send + Sync + 'static {
  type Args: Send + Sync + 'static;
  type Output: Send + Sync + 'static;

  const NAME: &'static str;

  /// Build the call. Fails when the arguments cannot be encoded as a body.
  fn request(args: &Self::Args) -> Result<Request, ErrorInfo>;

  fn normalize(data: Value) -> Result<Self::Output, ErrorInfo>;

  /// Tags whose dependents must be refreshed after a successful call.
  fn invalidates_tags(_args: &Self::Args, _output: &Self::Output) -> Vec<Tag> {
    Vec::new()
  }
}
