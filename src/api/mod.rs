//! REST plumbing: transport, credentials, endpoint declarations.

pub mod auth;
pub mod client;
pub mod endpoint;
pub mod transport;

pub use auth::{SessionToken, TokenProvider};
pub use client::ApiClient;
pub use endpoint::{MutationEndpoint, QueryEndpoint, Request};
pub use transport::{HttpTransport, Method, Transport};
