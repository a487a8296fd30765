//! Connection pool and schema bootstrap.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};

/// Directory connection configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite connection string (e.g. "sqlite:./profiles.db" or "sqlite::memory:")
    pub database_url: String,
    /// Maximum pooled connections
    pub max_connections: u32,
    /// How long to wait for a free connection
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./profiles.db".to_string(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./profiles.db".to_string()),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            acquire_timeout: Duration::from_secs(
                std::env::var("DATABASE_ACQUIRE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }

    /// An in-memory database, used by tests and local experiments.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }

    fn is_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }
}

/// Create a SqlitePool with WAL mode and common settings.
///
/// An in-memory database lives only as long as its connection, so such
/// pools are pinned to a single connection that is never recycled.
#[tracing::instrument(skip(config))]
pub async fn create_pool(config: &DbConfig) -> DbResult<SqlitePool> {
    let mut options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
        .foreign_keys(true)
        .create_if_missing(true);

    if !config.is_memory() {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    let mut pool_options = SqlitePoolOptions::new().acquire_timeout(config.acquire_timeout);
    pool_options = if config.is_memory() {
        pool_options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        pool_options.max_connections(config.max_connections)
    };

    let pool = pool_options.connect_with(options).await?;

    debug!("database pool created");
    Ok(pool)
}

const USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_subject_id TEXT UNIQUE,
    email TEXT NOT NULL UNIQUE,
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    phone_number TEXT UNIQUE,
    password_hash TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_staff INTEGER NOT NULL DEFAULT 0,
    is_superuser INTEGER NOT NULL DEFAULT 0,
    date_joined TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// Create the users table if it does not exist yet.
pub async fn ensure_schema(pool: &SqlitePool) -> DbResult<()> {
    sqlx::query(USERS_TABLE).execute(pool).await?;
    info!("users table ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_pool_keeps_schema() {
        let pool = create_pool(&DbConfig::in_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        // Idempotent
        ensure_schema(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
