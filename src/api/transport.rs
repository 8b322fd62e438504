//! The network seam: one request in, one status + JSON body out.

use color_eyre::eyre::eyre;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::config::ApiConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

#[derive(Debug, Clone)]
pub struct TransportRequest {
  pub method: Method,
  /// Path relative to the service base URL, e.g. `/book/7`
  pub path: String,
  pub body: Option<Value>,
  pub headers: Vec<(String, String)>,
}

/// Any HTTP answer, successful or not. Status classification is the caller's job.
#[derive(Debug, Clone)]
pub struct TransportResponse {
  pub status: u16,
  /// Parsed JSON body; `Null` for empty bodies, a JSON string for non-JSON text
  pub data: Value,
}

/// The service could not be reached or the body could not be read.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

pub trait Transport: Send + Sync {
  fn send(&self, request: TransportRequest)
    -> BoxFuture<'static, Result<TransportResponse, TransportError>>;
}

/// Transport backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: String,
}

impl HttpTransport {
  pub fn new(config: &ApiConfig) -> color_eyre::Result<Self> {
    Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url: config.base_url.trim_end_matches('/').to_string(),
    })
  }

  fn url_for(&self, path: &str) -> Result<Url, TransportError> {
    let joined = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
    Url::parse(&joined).map_err(|e| TransportError(format!("invalid URL {}: {}", joined, e)))
  }
}

impl Transport for HttpTransport {
  fn send(
    &self,
    request: TransportRequest,
  ) -> BoxFuture<'static, Result<TransportResponse, TransportError>> {
    let client = self.client.clone();
    let url = self.url_for(&request.path);

    async move {
      let url = url?;
      let mut builder = client.request(request.method.into(), url);
      for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
      }
      if let Some(body) = &request.body {
        builder = builder.json(body);
      }

      let response = builder
        .send()
        .await
        .map_err(|e| TransportError(e.to_string()))?;
      let status = response.status().as_u16();
      let bytes = response
        .bytes()
        .await
        .map_err(|e| TransportError(e.to_string()))?;

      Ok(TransportResponse {
        status,
        data: parse_body(&bytes),
      })
    }
    .boxed()
  }
}

fn parse_body(bytes: &[u8]) -> Value {
  if bytes.iter().all(u8::is_ascii_whitespace) {
    return Value::Null;
  }
  serde_json::from_slice(bytes)
    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
