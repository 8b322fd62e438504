//! Endpoint declarations for the library service.
//!
//! Every resource gets the same five endpoints (list, get, create, update,
//! delete), declared once generically over [`Resource`]. Tag policy:
//! - list queries provide every item's id tag plus the `LIST` tag
//! - single-item queries provide their id tag
//! - create invalidates `LIST`; update and delete invalidate the id and `LIST`

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;

use super::types::{
  Author, Book, CreateAuthorInput, CreateBookInput, CreateUserInput, Deleted, Genre, GenreInput,
  LoginInput, RegisterInput, Session, UpdateAuthorInput, UpdateUserInput, User,
};
use super::wire::{self, ApiAuthor, ApiBook, ApiGenre, ApiSession, ApiUser};
use crate::api::{MutationEndpoint, QueryEndpoint, Request};
use crate::cache::Tag;
use crate::error::ErrorInfo;

/// Endpoint names, the prefix of every cache key for the endpoint.
pub struct EndpointNames {
  pub list: &'static str,
  pub get: &'static str,
  pub create: &'static str,
  pub update: &'static str,
  pub delete: &'static str,
}

/// A CRUD resource exposed under one collection path.
pub trait Resource: Send + Sync + 'static {
  /// Tag kind, e.g. `Book`
  const KIND: &'static str;
  /// Collection path, e.g. `/book`
  const PATH: &'static str;
  const NAMES: EndpointNames;

  type Entity: Send + Sync + 'static;
  type Create: Serialize + DeserializeOwned + Send + Sync + 'static;
  type Update: Serialize + DeserializeOwned + Send + Sync + 'static;

  fn id(entity: &Self::Entity) -> u64;

  fn normalize_one(data: Value) -> Result<Self::Entity, ErrorInfo>;

  fn normalize_list(data: Value) -> Result<Vec<Self::Entity>, ErrorInfo>;
}

/// Body for an update call, addressed by id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateArgs<U> {
  pub id: u64,
  pub data: U,
}

pub struct List<R>(PhantomData<R>);
pub struct GetById<R>(PhantomData<R>);
pub struct Create<R>(PhantomData<R>);
pub struct Update<R>(PhantomData<R>);
pub struct Delete<R>(PhantomData<R>);

fn item_path<R: Resource>(id: u64) -> String {
  format!("{}/{}", R::PATH, id)
}

fn to_body<T: Serialize>(value: &T) -> Result<Value, ErrorInfo> {
  serde_json::to_value(value).map_err(|e| ErrorInfo::Args(e.to_string()))
}

impl<R: Resource> QueryEndpoint for List<R> {
  type Args = ();
  type Output = Vec<R::Entity>;

  const NAME: &'static str = R::NAMES.list;

  fn request(_args: &()) -> Request {
    Request::get(R::PATH)
  }

  fn normalize(data: Value) -> Result<Self::Output, ErrorInfo> {
    R::normalize_list(data)
  }

  fn provides_tags(_args: &(), output: Option<&Self::Output>) -> Vec<Tag> {
    let mut tags: Vec<Tag> = output
      .into_iter()
      .flatten()
      .map(|entity| Tag::id(R::KIND, R::id(entity)))
      .collect();
    tags.push(Tag::list(R::KIND));
    tags
  }
}

impl<R: Resource> QueryEndpoint for GetById<R> {
  type Args = u64;
  type Output = R::Entity;

  const NAME: &'static str = R::NAMES.get;

  fn request(id: &u64) -> Request {
    Request::get(item_path::<R>(*id))
  }

  fn normalize(data: Value) -> Result<Self::Output, ErrorInfo> {
    R::normalize_one(data)
  }

  fn provides_tags(id: &u64, _output: Option<&Self::Output>) -> Vec<Tag> {
    vec![Tag::id(R::KIND, id)]
  }
}

impl<R: Resource> MutationEndpoint for Create<R> {
  type Args = R::Create;
  type Output = R::Entity;

  const NAME: &'static str = R::NAMES.create;

  fn request(input: &R::Create) -> Result<Request, ErrorInfo> {
    Ok(Request::post(R::PATH, to_body(input)?))
  }

  fn normalize(data: Value) -> Result<Self::Output, ErrorInfo> {
    R::normalize_one(data)
  }

  fn invalidates_tags(_input: &R::Create, _output: &Self::Output) -> Vec<Tag> {
    vec![Tag::list(R::KIND)]
  }
}

impl<R: Resource> MutationEndpoint for Update<R> {
  type Args = UpdateArgs<R::Update>;
  type Output = R::Entity;

  const NAME: &'static str = R::NAMES.update;

  fn request(args: &Self::Args) -> Result<Request, ErrorInfo> {
    Ok(Request::put(item_path::<R>(args.id), to_body(&args.data)?))
  }

  fn normalize(data: Value) -> Result<Self::Output, ErrorInfo> {
    R::normalize_one(data)
  }

  fn invalidates_tags(args: &Self::Args, _output: &Self::Output) -> Vec<Tag> {
    vec![Tag::id(R::KIND, args.id), Tag::list(R::KIND)]
  }
}

impl<R: Resource> MutationEndpoint for Delete<R> {
  type Args = u64;
  type Output = Deleted;

  const NAME: &'static str = R::NAMES.delete;

  fn request(id: &u64) -> Result<Request, ErrorInfo> {
    Ok(Request::delete(item_path::<R>(*id)))
  }

  fn normalize(data: Value) -> Result<Deleted, ErrorInfo> {
    wire::decode_deleted(data)
  }

  fn invalidates_tags(id: &u64, _output: &Deleted) -> Vec<Tag> {
    vec![Tag::id(R::KIND, id), Tag::list(R::KIND)]
  }
}

// ============================================================================
// Resources
// ============================================================================

pub struct Books;

impl Resource for Books {
  const KIND: &'static str = "Book";
  const PATH: &'static str = "/book";
  const NAMES: EndpointNames = EndpointNames {
    list: "getBooks",
    get: "getBookById",
    create: "createBook",
    update: "updateBook",
    delete: "deleteBook",
  };

  type Entity = Book;
  type Create = CreateBookInput;
  type Update = CreateBookInput;

  fn id(book: &Book) -> u64 {
    book.book_id
  }

  fn normalize_one(data: Value) -> Result<Book, ErrorInfo> {
    wire::decode::<ApiBook>(data).map(Book::from)
  }

  fn normalize_list(data: Value) -> Result<Vec<Book>, ErrorInfo> {
    Ok(wire::decode_list::<ApiBook>(data)?.into_iter().map(Book::from).collect())
  }
}

pub struct Authors;

impl Resource for Authors {
  const KIND: &'static str = "Author";
  const PATH: &'static str = "/authors";
  const NAMES: EndpointNames = EndpointNames {
    list: "getAllAuthors",
    get: "getAuthorById",
    create: "createAuthor",
    update: "updateAuthor",
    delete: "deleteAuthor",
  };

  type Entity = Author;
  type Create = CreateAuthorInput;
  type Update = UpdateAuthorInput;

  fn id(author: &Author) -> u64 {
    author.author_id
  }

  fn normalize_one(data: Value) -> Result<Author, ErrorInfo> {
    wire::decode::<ApiAuthor>(data).map(Author::from)
  }

  fn normalize_list(data: Value) -> Result<Vec<Author>, ErrorInfo> {
    Ok(wire::decode_list::<ApiAuthor>(data)?.into_iter().map(Author::from).collect())
  }
}

pub struct Genres;

impl Resource for Genres {
  const KIND: &'static str = "Genre";
  const PATH: &'static str = "/genres";
  const NAMES: EndpointNames = EndpointNames {
    list: "getAllGenres",
    get: "getGenreById",
    create: "createGenre",
    update: "updateGenre",
    delete: "deleteGenre",
  };

  type Entity = Genre;
  type Create = GenreInput;
  type Update = GenreInput;

  fn id(genre: &Genre) -> u64 {
    genre.genre_id
  }

  fn normalize_one(data: Value) -> Result<Genre, ErrorInfo> {
    wire::decode::<ApiGenre>(data).map(Genre::from)
  }

  /// Malformed genres are dropped rather than failing the whole list.
  fn normalize_list(data: Value) -> Result<Vec<Genre>, ErrorInfo> {
    Ok(
      wire::decode_list_lenient::<ApiGenre>(data)?
        .into_iter()
        .map(Genre::from)
        .collect(),
    )
  }
}

pub struct Users;

impl Resource for Users {
  const KIND: &'static str = "User";
  const PATH: &'static str = "/users";
  const NAMES: EndpointNames = EndpointNames {
    list: "getUsers",
    get: "getUserById",
    create: "createUser",
    update: "updateUser",
    delete: "deleteUser",
  };

  type Entity = User;
  type Create = CreateUserInput;
  type Update = UpdateUserInput;

  fn id(user: &User) -> u64 {
    user.user_id
  }

  fn normalize_one(data: Value) -> Result<User, ErrorInfo> {
    wire::decode::<ApiUser>(data).map(User::from)
  }

  fn normalize_list(data: Value) -> Result<Vec<User>, ErrorInfo> {
    Ok(wire::decode_list::<ApiUser>(data)?.into_iter().map(User::from).collect())
  }
}

pub type GetBooks = List<Books>;
pub type GetBookById = GetById<Books>;
pub type CreateBook = Create<Books>;
pub type UpdateBook = Update<Books>;
pub type DeleteBook = Delete<Books>;

pub type GetAllAuthors = List<Authors>;
pub type GetAuthorById = GetById<Authors>;
pub type CreateAuthor = Create<Authors>;
pub type UpdateAuthor = Update<Authors>;
pub type DeleteAuthor = Delete<Authors>;

pub type GetAllGenres = List<Genres>;
pub type GetGenreById = GetById<Genres>;
pub type CreateGenre = Create<Genres>;
pub type UpdateGenre = Update<Genres>;
pub type DeleteGenre = Delete<Genres>;

pub type GetUsers = List<Users>;
pub type GetUserById = GetById<Users>;
pub type CreateUser = Create<Users>;
pub type UpdateUser = Update<Users>;
pub type DeleteUser = Delete<Users>;

// ============================================================================
// Auth
// ============================================================================

/// `POST /auth/login`, answers `{token, user}`. Touches no cached data.
pub struct Login;

impl MutationEndpoint for Login {
  type Args = LoginInput;
  type Output = Session;

  const NAME: &'static str = "login";

  fn request(input: &LoginInput) -> Result<Request, ErrorInfo> {
    Ok(Request::post("/auth/login", to_body(input)?))
  }

  fn normalize(data: Value) -> Result<Session, ErrorInfo> {
    wire::decode::<ApiSession>(data).map(Session::from)
  }
}

/// `POST /auth/register`. The answer is passed through untyped.
pub struct Register;

impl MutationEndpoint for Register {
  type Args = RegisterInput;
  type Output = Value;

  const NAME: &'static str = "register";

  fn request(input: &RegisterInput) -> Result<Request, ErrorInfo> {
    Ok(Request::post("/auth/register", to_body(input)?))
  }

  fn normalize(data: Value) -> Result<Value, ErrorInfo> {
    Ok(wire::unwrap_envelope(data))
  }

  fn invalidates_tags(_input: &RegisterInput, _output: &Value) -> Vec<Tag> {
    vec![Tag::list(Users::KIND)]
  }
}
