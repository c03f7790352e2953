//! Conversation Log Module
//!
//! SQLite-backed append-only persistence. The log IS the conversation
//! history: records are never mutated or deleted, only appended.

mod schema;
mod store;

pub use schema::{CREATE_TABLES, SCHEMA_VERSION};
pub use store::LogStore;
