//! Terminal admin client for a library REST service, built around a query
//! cache that deduplicates requests and refetches dependents after writes.

pub mod api;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod event;
pub mod library;
pub mod logging;
pub mod shell;
