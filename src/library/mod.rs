//! The library service: domain types, wire shapes, endpoint declarations.

pub mod endpoints;
pub mod types;
pub mod wire;
