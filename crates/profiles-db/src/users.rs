//! User directory: the only component that reads or writes user rows.

use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use profiles_models::{NewUser, UserId, UserRecord};

use crate::error::{DbError, DbResult};
use crate::metrics::record_query;

/// Fields overwritten by a profile edit.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileUpdate {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    /// New password hash; `None` keeps the stored one.
    pub password_hash: Option<String>,
}

/// Persistence contract for local user records.
///
/// Writes rely on the storage engine's UNIQUE constraints; a violated
/// constraint surfaces as [`DbError::UniqueViolation`] naming the column.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> DbResult<Option<UserRecord>>;
    async fn find_by_subject(&self, subject_id: &str) -> DbResult<Option<UserRecord>>;
    async fn find_by_email(&self, email: &str) -> DbResult<Option<UserRecord>>;
    /// True if a record other than `exclude` already uses this phone number.
    async fn phone_in_use(&self, phone_number: &str, exclude: Option<UserId>) -> DbResult<bool>;
    /// True if a record other than `exclude` already uses this email.
    async fn email_in_use(&self, email: &str, exclude: Option<UserId>) -> DbResult<bool>;
    async fn insert(&self, user: NewUser) -> DbResult<UserRecord>;
    async fn update_profile(&self, id: UserId, update: ProfileUpdate) -> DbResult<UserRecord>;
    async fn link_subject(&self, id: UserId, subject_id: &str) -> DbResult<UserRecord>;
    async fn set_phone(&self, id: UserId, phone_number: &str) -> DbResult<UserRecord>;
    async fn set_password_hash(&self, id: UserId, password_hash: &str) -> DbResult<UserRecord>;
    /// Returns false when no record had this id.
    async fn delete(&self, id: UserId) -> DbResult<bool>;
    /// Cheap connectivity check.
    async fn ping(&self) -> DbResult<()>;
}

const USER_COLUMNS: &str = "id, external_subject_id, email, first_name, last_name, phone_number, \
     password_hash, is_active, is_staff, is_superuser, date_joined, updated_at";

/// sqlx-backed user directory.
#[derive(Clone)]
pub struct SqliteUserDirectory {
    pool: SqlitePool,
}

impl SqliteUserDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_one_by(&self, column: &'static str, value: &str) -> DbResult<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_user_row).transpose()
    }

    async fn require(&self, id: UserId) -> DbResult<UserRecord> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("user {id}")))
    }

    async fn in_use(&self, column: &'static str, value: &str, exclude: Option<UserId>) -> DbResult<bool> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM users WHERE {column} = ? AND id != ?)");
        let exists: i64 = sqlx::query_scalar(&sql)
            .bind(value)
            .bind(exclude.map(|id| id.get()).unwrap_or(-1))
            .fetch_one(&self.pool)
            .await?;
        Ok(exists != 0)
    }
}

/// Run a query future and record its outcome.
async fn observed<T, F>(operation: &'static str, fut: F) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    let start = Instant::now();
    let result = fut.await;
    record_query(operation, result.is_ok(), start.elapsed());
    result
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn find_by_id(&self, id: UserId) -> DbResult<Option<UserRecord>> {
        observed("find_by_id", async {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
            let row = sqlx::query(&sql)
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(parse_user_row).transpose()
        })
        .await
    }

    async fn find_by_subject(&self, subject_id: &str) -> DbResult<Option<UserRecord>> {
        observed("find_by_subject", self.fetch_one_by("external_subject_id", subject_id)).await
    }

    async fn find_by_email(&self, email: &str) -> DbResult<Option<UserRecord>> {
        observed("find_by_email", self.fetch_one_by("email", email)).await
    }

    async fn phone_in_use(&self, phone_number: &str, exclude: Option<UserId>) -> DbResult<bool> {
        observed("phone_in_use", self.in_use("phone_number", phone_number, exclude)).await
    }

    async fn email_in_use(&self, email: &str, exclude: Option<UserId>) -> DbResult<bool> {
        observed("email_in_use", self.in_use("email", email, exclude)).await
    }

    #[tracing::instrument(skip(self, user), fields(email = %user.email))]
    async fn insert(&self, user: NewUser) -> DbResult<UserRecord> {
        observed("insert", async {
            let now = Utc::now();
            let result = sqlx::query(
                r#"
                INSERT INTO users (
                    external_subject_id, email, first_name, last_name, phone_number,
                    password_hash, is_active, is_staff, is_superuser, date_joined, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
                "#,
            )
            .bind(&user.external_subject_id)
            .bind(&user.email)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.phone_number)
            .bind(&user.password_hash)
            .bind(user.is_staff)
            .bind(user.is_superuser)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            let id = UserId(result.last_insert_rowid());
            info!(user_id = %id, "user record created");
            self.require(id).await
        })
        .await
    }

    #[tracing::instrument(skip(self, update))]
    async fn update_profile(&self, id: UserId, update: ProfileUpdate) -> DbResult<UserRecord> {
        observed("update_profile", async {
            let result = sqlx::query(
                r#"
                UPDATE users
                SET email = ?, first_name = ?, last_name = ?, phone_number = ?,
                    password_hash = COALESCE(?, password_hash), updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&update.email)
            .bind(&update.first_name)
            .bind(&update.last_name)
            .bind(&update.phone_number)
            .bind(&update.password_hash)
            .bind(Utc::now())
            .bind(id.get())
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(DbError::not_found(format!("user {id}")));
            }
            debug!(user_id = %id, "profile updated");
            self.require(id).await
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn link_subject(&self, id: UserId, subject_id: &str) -> DbResult<UserRecord> {
        observed("link_subject", async {
            let result = sqlx::query(
                "UPDATE users SET external_subject_id = ?, updated_at = ? WHERE id = ?",
            )
            .bind(subject_id)
            .bind(Utc::now())
            .bind(id.get())
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(DbError::not_found(format!("user {id}")));
            }
            info!(user_id = %id, "identity provider subject linked");
            self.require(id).await
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn set_phone(&self, id: UserId, phone_number: &str) -> DbResult<UserRecord> {
        observed("set_phone", async {
            let result = sqlx::query("UPDATE users SET phone_number = ?, updated_at = ? WHERE id = ?")
                .bind(phone_number)
                .bind(Utc::now())
                .bind(id.get())
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 0 {
                return Err(DbError::not_found(format!("user {id}")));
            }
            self.require(id).await
        })
        .await
    }

    #[tracing::instrument(skip(self, password_hash))]
    async fn set_password_hash(&self, id: UserId, password_hash: &str) -> DbResult<UserRecord> {
        observed("set_password_hash", async {
            let result = sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
                .bind(password_hash)
                .bind(Utc::now())
                .bind(id.get())
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 0 {
                return Err(DbError::not_found(format!("user {id}")));
            }
            self.require(id).await
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: UserId) -> DbResult<bool> {
        observed("delete", async {
            let result = sqlx::query("DELETE FROM users WHERE id = ?")
                .bind(id.get())
                .execute(&self.pool)
                .await?;
            let deleted = result.rows_affected() > 0;
            if deleted {
                info!(user_id = %id, "user record deleted");
            }
            Ok::<_, DbError>(deleted)
        })
        .await
    }

    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_user_row(row: &SqliteRow) -> DbResult<UserRecord> {
    let date_joined: DateTime<Utc> = row.try_get("date_joined")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(UserRecord {
        id: UserId(row.try_get("id")?),
        external_subject_id: row.try_get("external_subject_id")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone_number: row.try_get("phone_number")?,
        password_hash: row.try_get("password_hash")?,
        is_active: row.try_get("is_active")?,
        is_staff: row.try_get("is_staff")?,
        is_superuser: row.try_get("is_superuser")?,
        date_joined,
        updated_at,
    })
}
