//! # community-store
//!
//! Relational persistence for the community core, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for users, ranks,
//! user-rank assignments, chats and messages. Callers that share the handle
//! across tasks are expected to wrap it in a mutex.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod ranks;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
