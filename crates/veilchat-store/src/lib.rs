//! # veilchat-store
//!
//! Persistence and authorization core for VeilChat, backed by SQLite
//! (optionally SQLCipher).
//!
//! Message bodies and media keys arrive already encrypted by the transport
//! layer; this crate stores and indexes them as opaque strings. Every
//! conversation-scoped operation is a `Database` method that takes the
//! calling principal and goes through the participant gate before touching
//! any row.

pub mod conversations;
pub mod database;
pub mod identity;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod participants;
pub mod pins;
pub mod reactions;
pub mod reports;
pub mod users;

mod convert;
mod error;

pub use conversations::PUBLIC_TOPIC;
pub use database::Database;
pub use error::{Result, StoreError};
pub use messages::{page_size, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use models::*;
pub use users::SEARCH_LIMIT;
