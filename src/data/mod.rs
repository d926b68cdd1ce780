//! Data layer module
//!
//! Handles all durable persistence:
//! - SQLite database operations (followed accounts, content, identity cache)
//! - Data models

mod database;
mod models;

pub use database::Database;
pub use models::*;
