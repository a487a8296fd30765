//! Database error types.

use thiserror::Error;

/// Result type for directory operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur during directory operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A UNIQUE constraint rejected the write. `field` is the column name.
    #[error("Unique constraint violated on {field}")]
    UniqueViolation { field: String },

    #[error("Internal: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Column name if this is a unique violation.
    pub fn unique_field(&self) -> Option<&str> {
        match self {
            DbError::UniqueViolation { field } => Some(field),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                DbError::UniqueViolation {
                    field: unique_column(db_err.message()),
                }
            }
            other => DbError::Sqlx(other),
        }
    }
}

/// Extract the column from a SQLite message such as
/// `UNIQUE constraint failed: users.phone_number`.
fn unique_column(message: &str) -> String {
    message
        .rsplit(':')
        .next()
        .and_then(|cols| cols.split(',').next())
        .map(|col| col.trim())
        .map(|col| col.rsplit('.').next().unwrap_or(col))
        .unwrap_or_default()
        .to_string()
}
