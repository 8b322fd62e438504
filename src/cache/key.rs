//! Cache keys derived from an endpoint name and its arguments.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::ErrorInfo;

/// Stable identity of a query: endpoint name plus canonical JSON arguments.
///
/// Rendered as `endpoint(args)`, e.g. `getBookById(7)` or `getBooks(null)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Encode an endpoint call into its cache key.
///
/// Object fields are sorted recursively, so two argument values that differ
/// only in field order share a key. Unit arguments encode as `null`.
pub fn encode<A>(endpoint: &str, args: &A) -> Result<CacheKey, ErrorInfo>
where
  A: Serialize + ?Sized,
{
  debug_assert!(
    !endpoint.contains('('),
    "endpoint names must not contain '('"
  );

  let value = serde_json::to_value(args).map_err(|e| ErrorInfo::Args(e.to_string()))?;
  let rendered =
    serde_json::to_string(&canonicalize(value)).map_err(|e| ErrorInfo::Args(e.to_string()))?;

  Ok(CacheKey(format!("{}({})", endpoint, rendered)))
}

/// Split a key back into endpoint name and argument value. Debugging aid.
pub fn decode(key: &CacheKey) -> Option<(String, Value)> {
  let open = key.0.find('(')?;
  let args = key.0[open + 1..].strip_suffix(')')?;
  let value = serde_json::from_str(args).ok()?;
  Some((key.0[..open].to_string(), value))
}

fn canonicalize(value: Value) -> Value {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<(String, Value)> = map.into_iter().collect();
      entries.sort_by(|a, b| a.0.cmp(&b.0));
      let sorted: Map<String, Value> = entries
        .into_iter()
        .map(|(k, v)| (k, canonicalize(v)))
        .collect();
      Value::Object(sorted)
    }
    Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
    other => other,
  }
}
