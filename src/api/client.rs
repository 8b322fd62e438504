use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::auth::TokenProvider;
use super::endpoint::{MutationEndpoint, QueryEndpoint, Request};
use super::transport::{Transport, TransportRequest};
use crate::error::ErrorInfo;

/// Sends endpoint requests with credentials and classifies the answers.
#[derive(Clone)]
pub struct ApiClient {
  transport: Arc<dyn Transport>,
  tokens: Arc<dyn TokenProvider>,
}

impl ApiClient {
  pub fn new(transport: Arc<dyn Transport>, tokens: Arc<dyn TokenProvider>) -> Self {
    Self { transport, tokens }
  }

  pub fn tokens(&self) -> &Arc<dyn TokenProvider> {
    &self.tokens
  }

  /// Perform a read and normalize the answer.
  pub async fn query<E: QueryEndpoint>(&self, args: &E::Args) -> Result<E::Output, ErrorInfo> {
    let data = self.send(E::NAME, E::request(args)).await?;
    E::normalize(data)
  }

  /// Perform a write and normalize the answer.
  pub async fn mutation<M: MutationEndpoint>(
    &self,
    args: &M::Args,
  ) -> Result<M::Output, ErrorInfo> {
    let data = self.send(M::NAME, M::request(args)?).await?;
    M::normalize(data)
  }

  async fn send(&self, endpoint: &str, request: Request) -> Result<Value, ErrorInfo> {
    let mut headers = Vec::new();
    if let Some(token) = self.tokens.token() {
      headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
    }

    debug!(endpoint, method = request.method.as_str(), path = %request.path, "sending request");

    let response = self
      .transport
      .send(TransportRequest {
        method: request.method,
        path: request.path,
        body: request.body,
        headers,
      })
      .await
      .map_err(|e| ErrorInfo::Network(e.to_string()))?;

    match response.status {
      200..=299 => Ok(response.data),
      401 => {
        warn!(endpoint, "request unauthorized, clearing stored token");
        self.tokens.clear();
        Err(ErrorInfo::Auth)
      }
      status => Err(ErrorInfo::Http {
        status,
        body: render_body(response.data),
      }),
    }
  }
}

fn render_body(data: Value) -> String {
  match data {
    Value::Null => String::new(),
    Value::String(text) => text,
    other => other.to_string(),
  }
}
