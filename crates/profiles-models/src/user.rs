//! User record models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Surrogate key of a local user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Get the inner integer.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered person, as persisted by the user directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserRecord {
    pub id: UserId,
    /// Identity provider subject (Firebase uid). Absent for records that
    /// predate provider-linked login.
    pub external_subject_id: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    /// Argon2 PHC string. Never leaves the process.
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub date_joined: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// First and last name joined by a space, trimmed.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// Whether a usable password has been set.
    pub fn has_usable_password(&self) -> bool {
        self.password_hash.as_deref().is_some_and(|h| !h.is_empty())
    }
}

/// Fields needed to insert a new user record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewUser {
    pub external_subject_id: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub password_hash: Option<String>,
    pub is_staff: bool,
    pub is_superuser: bool,
}

impl NewUser {
    /// A record created from verified claims alone, with no password.
    pub fn from_subject(
        subject_id: impl Into<String>,
        email: impl Into<String>,
        first_name: impl Into<String>,
    ) -> Self {
        Self {
            external_subject_id: Some(subject_id.into()),
            email: email.into(),
            first_name: first_name.into(),
            ..Default::default()
        }
    }
}

/// The subset of a user record that is safe to return to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PublicProfile {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: Option<String>,
}

impl From<&UserRecord> for PublicProfile {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            phone_number: user.phone_number.clone(),
        }
    }
}

impl From<UserRecord> for PublicProfile {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            phone_number: user.phone_number,
        }
    }
}

/// First whitespace-delimited token of a display name, or empty.
pub fn first_token(display_name: Option<&str>) -> String {
    display_name
        .and_then(|name| name.split_whitespace().next())
        .unwrap_or_default()
        .to_string()
}

/// Lower-case the domain part of an email address, keeping the local part.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}
