//! Serde-deserializable types matching the library service's responses.
//!
//! The service answers in camelCase, some deployments in snake_case, and
//! sometimes wraps payloads in a `{"data": ...}` envelope. These types absorb
//! all of that so the domain types in `types.rs` stay clean.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::types::{
  Author, Book, BookAuthor, BookOwner, Deleted, Genre, OwnerUser, Session, User,
};
use crate::error::ErrorInfo;

/// Strip a `{"data": ...}` envelope if present.
pub fn unwrap_envelope(value: Value) -> Value {
  match value {
    Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(Value::Null),
    other => other,
  }
}

/// Decode a single (possibly enveloped) item.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ErrorInfo> {
  serde_json::from_value(unwrap_envelope(value)).map_err(|e| ErrorInfo::Shape(e.to_string()))
}

/// Decode a (possibly enveloped) array, failing on the first malformed item.
pub fn decode_list<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, ErrorInfo> {
  match unwrap_envelope(value) {
    Value::Array(items) => items.into_iter().map(decode::<T>).collect(),
    other => Err(ErrorInfo::Shape(format!("expected an array, got {}", kind(&other)))),
  }
}

/// Decode a (possibly enveloped) array, dropping items that do not decode.
pub fn decode_list_lenient<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, ErrorInfo> {
  match unwrap_envelope(value) {
    Value::Array(items) => Ok(
      items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
          Ok(decoded) => Some(decoded),
          Err(e) => {
            warn!(error = %e, "dropping malformed list item");
            None
          }
        })
        .collect(),
    ),
    other => Err(ErrorInfo::Shape(format!("expected an array, got {}", kind(&other)))),
  }
}

fn kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}

// ============================================================================
// Books
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiBookAuthor {
  #[serde(alias = "author_id")]
  pub author_id: u64,
  #[serde(alias = "author_name")]
  pub author_name: String,
  #[serde(default, alias = "genre_id")]
  pub genre_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiOwnerUser {
  #[serde(alias = "user_id")]
  pub user_id: u64,
  #[serde(default, alias = "full_name")]
  pub full_name: String,
  #[serde(default)]
  pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiBookOwner {
  #[serde(alias = "book_owner_id")]
  pub book_owner_id: u64,
  #[serde(alias = "owner_id")]
  pub owner_id: u64,
  pub user: Option<ApiOwnerUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiBook {
  #[serde(alias = "book_id")]
  pub book_id: u64,
  pub title: String,
  pub description: Option<String>,
  pub isbn: Option<String>,
  #[serde(alias = "publication_year")]
  pub publication_year: Option<i32>,
  #[serde(alias = "author_id")]
  pub author_id: u64,
  #[serde(alias = "created_at")]
  pub created_at: Option<String>,
  #[serde(alias = "updated_at")]
  pub updated_at: Option<String>,
  pub author: Option<ApiBookAuthor>,
  #[serde(default)]
  pub owners: Vec<ApiBookOwner>,
}

impl From<ApiBook> for Book {
  fn from(api: ApiBook) -> Self {
    Self {
      book_id: api.book_id,
      title: api.title,
      description: api.description,
      isbn: api.isbn,
      publication_year: api.publication_year,
      author_id: api.author_id,
      created_at: api.created_at,
      updated_at: api.updated_at,
      author: api.author.map(|a| BookAuthor {
        author_id: a.author_id,
        author_name: a.author_name,
        genre_id: a.genre_id,
      }),
      owners: api
        .owners
        .into_iter()
        .map(|o| BookOwner {
          book_owner_id: o.book_owner_id,
          owner_id: o.owner_id,
          user: o.user.map(|u| OwnerUser {
            user_id: u.user_id,
            full_name: u.full_name,
            email: u.email,
          }),
        })
        .collect(),
    }
  }
}

// ============================================================================
// Authors, genres, users
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAuthor {
  #[serde(alias = "author_id")]
  pub author_id: u64,
  #[serde(alias = "author_name")]
  pub author_name: String,
  #[serde(alias = "genre_id")]
  pub genre_id: u64,
  #[serde(alias = "created_at")]
  pub created_at: Option<String>,
  #[serde(alias = "updated_at")]
  pub updated_at: Option<String>,
}

impl From<ApiAuthor> for Author {
  fn from(api: ApiAuthor) -> Self {
    Self {
      author_id: api.author_id,
      author_name: api.author_name,
      genre_id: api.genre_id,
      created_at: api.created_at,
      updated_at: api.updated_at,
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGenre {
  #[serde(alias = "genre_id")]
  pub genre_id: u64,
  #[serde(alias = "genre_name")]
  pub genre_name: String,
  #[serde(default, alias = "genre_code")]
  pub genre_code: String,
  #[serde(alias = "created_at")]
  pub created_at: Option<String>,
  #[serde(alias = "updated_at")]
  pub updated_at: Option<String>,
}

impl From<ApiGenre> for Genre {
  fn from(api: ApiGenre) -> Self {
    Self {
      genre_id: api.genre_id,
      genre_name: api.genre_name,
      genre_code: api.genre_code,
      created_at: api.created_at,
      updated_at: api.updated_at,
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUser {
  #[serde(alias = "user_id")]
  pub user_id: u64,
  #[serde(alias = "full_name")]
  pub full_name: String,
  pub email: String,
  #[serde(default)]
  pub role: String,
  #[serde(alias = "created_at")]
  pub created_at: Option<String>,
  #[serde(alias = "updated_at")]
  pub updated_at: Option<String>,
}

impl From<ApiUser> for User {
  fn from(api: ApiUser) -> Self {
    Self {
      user_id: api.user_id,
      full_name: api.full_name,
      email: api.email,
      role: api.role,
      created_at: api.created_at,
      updated_at: api.updated_at,
    }
  }
}

// ============================================================================
// Delete and auth responses
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiDeleted {
  #[serde(default = "default_success")]
  pub success: bool,
}

fn default_success() -> bool {
  true
}

/// Delete answers `{success}`, an empty 204, or echoes the deleted record.
pub fn decode_deleted(value: Value) -> Result<Deleted, ErrorInfo> {
  match unwrap_envelope(value) {
    Value::Null => Ok(Deleted { success: true }),
    Value::Object(map) => {
      let api: ApiDeleted = serde_json::from_value(Value::Object(map))
        .map_err(|e| ErrorInfo::Shape(e.to_string()))?;
      Ok(Deleted {
        success: api.success,
      })
    }
    other => Err(ErrorInfo::Shape(format!(
      "expected a delete confirmation, got {}",
      kind(&other)
    ))),
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiSession {
  pub token: String,
  pub user: Option<ApiUser>,
}

impl From<ApiSession> for Session {
  fn from(api: ApiSession) -> Self {
    Self {
      token: api.token,
      user: api.user.map(User::from),
    }
  }
}
