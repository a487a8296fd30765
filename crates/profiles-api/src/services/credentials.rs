//! Password reset by email.

use std::sync::Arc;

use tracing::warn;

use profiles_db::UserDirectory;
use profiles_models::{normalize_email, PasswordResetRequest, UserRecord};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::services::password::{hash_password, Attribute, PasswordPolicy};

const UNKNOWN_EMAIL_MESSAGE: &str = "User with this email does not exist.";
const MISMATCH_MESSAGE: &str = "Passwords do not match.";

#[derive(Clone)]
pub struct CredentialService {
    directory: Arc<dyn UserDirectory>,
    policy: PasswordPolicy,
}

impl CredentialService {
    pub fn new(directory: Arc<dyn UserDirectory>, policy: PasswordPolicy) -> Self {
        Self { directory, policy }
    }

    /// Overwrite the password hash of the record owning `email`.
    ///
    /// The caller proves nothing beyond knowing the address.
    #[tracing::instrument(skip_all)]
    pub async fn reset(&self, request: PasswordResetRequest) -> ApiResult<UserRecord> {
        let mut errors = request.check();

        let email = normalize_email(&request.email);
        let user = if errors.contains("email") {
            None
        } else {
            self.directory.find_by_email(&email).await?
        };
        if user.is_none() && !errors.contains("email") {
            errors.add("email", UNKNOWN_EMAIL_MESSAGE);
        }

        if request.new_password != request.confirm_password {
            errors.add("confirm_password", MISMATCH_MESSAGE);
        }

        if !request.new_password.is_empty() {
            let attributes = match &user {
                Some(user) => vec![
                    Attribute::email(&user.email),
                    Attribute::first_name(&user.first_name),
                    Attribute::last_name(&user.last_name),
                ],
                None => vec![Attribute::email(&email)],
            };
            errors.extend_field(
                "new_password",
                self.policy.check(&request.new_password, &attributes),
            );
        }

        errors.into_result().map_err(ApiError::Validation)?;
        let Some(user) = user else {
            return Err(ApiError::invalid_field("email", UNKNOWN_EMAIL_MESSAGE));
        };

        warn!(user_id = %user.id, "Password reset without re-authentication");

        let hash = hash_password(&request.new_password).await?;
        let user = self.directory.set_password_hash(user.id, &hash).await?;
        metrics::record_password_reset();
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profiles_db::{create_pool, ensure_schema, DbConfig, SqliteUserDirectory};
    use profiles_models::NewUser;

    use crate::services::password::verify_password;

    async fn setup() -> (CredentialService, Arc<dyn UserDirectory>) {
        let pool = create_pool(&DbConfig::in_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        let directory: Arc<dyn UserDirectory> = Arc::new(SqliteUserDirectory::new(pool));
        (
            CredentialService::new(Arc::clone(&directory), PasswordPolicy::default()),
            directory,
        )
    }

    fn reset(email: &str, new: &str, confirm: &str) -> PasswordResetRequest {
        PasswordResetRequest {
            email: email.to_string(),
            new_password: new.to_string(),
            confirm_password: confirm.to_string(),
        }
    }

    #[tokio::test]
    async fn test_reset_overwrites_hash_only() {
        let (svc, directory) = setup().await;
        let before = directory
            .insert(NewUser::from_subject("abc123", "a@x.com", "Ada"))
            .await
            .unwrap();

        let after = svc.reset(reset("a@x.com", "Engine#1843", "Engine#1843")).await.unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.first_name, "Ada");
        assert_eq!(after.external_subject_id, before.external_subject_id);
        let hash = after.password_hash.unwrap();
        assert!(verify_password("Engine#1843", &hash).await);
    }

    #[tokio::test]
    async fn test_unknown_email() {
        let (svc, directory) = setup().await;
        let other = directory
            .insert(NewUser::from_subject("abc123", "a@x.com", "Ada"))
            .await
            .unwrap();

        let err = svc
            .reset(reset("nobody@x.com", "Engine#1843", "Engine#1843"))
            .await
            .unwrap_err();
        assert_eq!(
            err.field_errors().unwrap().get("email"),
            [UNKNOWN_EMAIL_MESSAGE.to_string()]
        );

        let untouched = directory.find_by_id(other.id).await.unwrap().unwrap();
        assert!(untouched.password_hash.is_none());
    }

    #[tokio::test]
    async fn test_mismatch_and_weak_password() {
        let (svc, directory) = setup().await;
        directory
            .insert(NewUser::from_subject("abc123", "a@x.com", "Ada"))
            .await
            .unwrap();

        let err = svc.reset(reset("a@x.com", "short", "other")).await.unwrap_err();
        let errors = err.field_errors().unwrap();
        assert_eq!(errors.get("confirm_password"), [MISMATCH_MESSAGE.to_string()]);
        assert!(errors
            .get("new_password")
            .iter()
            .any(|m| m.contains("too short")));
        assert!(!errors.contains("email"));
    }
}
