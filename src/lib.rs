//! Chatvine -- Append-Only Conversational CLI
//!
//! A chat client where every turn is an immutable record in an append-only
//! log. Conversations are chains of parent-linked records, replayed into
//! prompts and branchable from any point.

pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod inference;
pub mod log;
pub mod tokens;
pub mod tools;
pub mod types;
