use serde::{Deserialize, Serialize};
use std::fmt;

/// Author summary embedded in a book response
#[derive(Debug, Clone, PartialEq)]
pub struct BookAuthor {
  pub author_id: u64,
  pub author_name: String,
  pub genre_id: u64,
}

/// Owner record embedded in a book response
#[derive(Debug, Clone, PartialEq)]
pub struct BookOwner {
  pub book_owner_id: u64,
  pub owner_id: u64,
  pub user: Option<OwnerUser>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OwnerUser {
  pub user_id: u64,
  pub full_name: String,
  pub email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Book {
  pub book_id: u64,
  pub title: String,
  pub description: Option<String>,
  pub isbn: Option<String>,
  pub publication_year: Option<i32>,
  pub author_id: u64,
  pub created_at: Option<String>,
  pub updated_at: Option<String>,
  pub author: Option<BookAuthor>,
  pub owners: Vec<BookOwner>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Author {
  pub author_id: u64,
  pub author_name: String,
  pub genre_id: u64,
  pub created_at: Option<String>,
  pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Genre {
  pub genre_id: u64,
  pub genre_name: String,
  pub genre_code: String,
  pub created_at: Option<String>,
  pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
  pub user_id: u64,
  pub full_name: String,
  pub email: String,
  /// e.g. "admin", "member", "author"
  pub role: String,
  pub created_at: Option<String>,
  pub updated_at: Option<String>,
}

/// Result of a delete call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deleted {
  pub success: bool,
}

/// Token and profile returned by a successful login
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
  pub token: String,
  pub user: Option<User>,
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookInput {
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub isbn: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none", alias = "publication_year")]
  pub publication_year: Option<i32>,
  #[serde(alias = "author_id")]
  pub author_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAuthorInput {
  #[serde(alias = "author_name")]
  pub author_name: String,
  #[serde(alias = "genre_id")]
  pub genre_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAuthorInput {
  #[serde(default, skip_serializing_if = "Option::is_none", alias = "author_name")]
  pub author_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none", alias = "genre_id")]
  pub genre_id: Option<u64>,
}

/// Create and update body for genres; every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenreInput {
  #[serde(default, skip_serializing_if = "Option::is_none", alias = "genre_name")]
  pub genre_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none", alias = "genre_code")]
  pub genre_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserInput {
  #[serde(alias = "full_name")]
  pub full_name: String,
  pub email: String,
  pub password: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserInput {
  #[serde(default, skip_serializing_if = "Option::is_none", alias = "full_name")]
  pub full_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub password: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginInput {
  pub email: String,
  pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
  pub full_name: String,
  pub email: String,
  pub password: String,
}

// ============================================================================
// One-line renderings for the shell
// ============================================================================

impl fmt::Display for Book {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{:<5} {}", self.book_id, self.title)?;
    if let Some(year) = self.publication_year {
      write!(f, " ({})", year)?;
    }
    match &self.author {
      Some(author) => write!(f, " by {}", author.author_name),
      None => write!(f, " [author #{}]", self.author_id),
    }
  }
}

impl fmt::Display for Author {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "#{:<5} {} [genre #{}]",
      self.author_id, self.author_name, self.genre_id
    )
  }
}

impl fmt::Display for Genre {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{:<5} {} ({})", self.genre_id, self.genre_name, self.genre_code)
  }
}

impl fmt::Display for User {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "#{:<5} {} <{}> {}",
      self.user_id, self.full_name, self.email, self.role
    )
  }
}

impl fmt::Display for Deleted {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.success {
      f.write_str("deleted")
    } else {
      f.write_str("not deleted")
    }
  }
}
