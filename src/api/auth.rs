//! Access to the bearer token. Storage belongs to the caller.

use std::sync::RwLock;

/// Supplies the token for the `Authorization` header and forgets it on 401.
pub trait TokenProvider: Send + Sync {
  fn token(&self) -> Option<String>;
  fn clear(&self);
}

/// In-memory token for the current session.
#[derive(Debug, Default)]
pub struct SessionToken {
  token: RwLock<Option<String>>,
}

impl SessionToken {
  pub fn new(token: Option<String>) -> Self {
    Self {
      token: RwLock::new(token),
    }
  }

  pub fn set(&self, token: String) {
    *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token);
  }
}

impl TokenProvider for SessionToken {
  fn token(&self) -> Option<String> {
    self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
  }

  fn clear(&self) {
    self.token.write().unwrap_or_else(|e| e.into_inner()).take();
  }
}
