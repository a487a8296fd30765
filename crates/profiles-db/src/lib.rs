//! Relational user directory.
//!
//! This crate provides:
//! - SQLite connection pool creation and schema bootstrap
//! - The `UserDirectory` contract used by the service layer
//! - A sqlx-backed implementation relying on UNIQUE constraints
//!   for email, subject id and phone number
//! - Query metrics

pub mod error;
pub mod metrics;
pub mod pool;
pub mod users;


pub use error::{DbError, DbResult};
pub use pool::{create_pool, ensure_schema, DbConfig};
pub use users::{ProfileUpdate, SqliteUserDirectory, UserDirectory};
