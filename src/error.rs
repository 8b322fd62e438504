//! Error types surfaced by the cache and API client.

/// Why a query or mutation failed.
///
/// Cloneable so one failed fetch can be handed to every caller that was
/// coalesced onto it, and kept on the rejected cache entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorInfo {
  /// The service could not be reached at all.
  #[error("network error: {0}")]
  Network(String),
  /// The service answered with a non-2xx status other than 401.
  #[error("HTTP {status}: {body}")]
  Http { status: u16, body: String },
  /// The service answered 401. Stored credentials have been cleared.
  #[error("not authenticated, log in again")]
  Auth,
  /// The response did not match the shape the endpoint expects.
  #[error("unexpected response shape: {0}")]
  Shape(String),
  /// The request arguments could not be encoded into a cache key.
  #[error("invalid arguments: {0}")]
  Args(String),
  /// The fetch task ended without producing a result.
  #[error("fetch aborted: {0}")]
  Aborted(String),
}

impl ErrorInfo {
  pub fn is_auth(&self) -> bool {
    matches!(self, ErrorInfo::Auth)
  }
}

impl From<serde_json::Error> for ErrorInfo {
  fn from(err: serde_json::Error) -> Self {
    ErrorInfo::Shape(err.to_string())
  }
}
