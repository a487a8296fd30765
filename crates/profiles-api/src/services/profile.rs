//! Profile provisioning and maintenance.

use std::sync::Arc;

use tracing::{debug, info, warn};

use profiles_db::{DbError, ProfileUpdate, UserDirectory};
use profiles_models::{
    first_token, normalize_email, FieldErrors, IdentityClaims, NewUser, ProfileRequest, UserId,
    UserRecord,
};

use crate::error::{unique_message, ApiError, ApiResult};
use crate::security::PhonePattern;
use crate::services::password::{hash_password, Attribute, PasswordPolicy};

const REQUIRED_MESSAGE: &str = "This field is required.";
const MISMATCH_MESSAGE: &str = "Passwords do not match.";
const NOT_FOUND_MESSAGE: &str = "User not found.";

/// Maps verified identities to local records and edits those records.
#[derive(Clone)]
pub struct ProfileService {
    directory: Arc<dyn UserDirectory>,
    policy: PasswordPolicy,
    phone_pattern: PhonePattern,
}

impl ProfileService {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        policy: PasswordPolicy,
        phone_pattern: PhonePattern,
    ) -> Self {
        Self {
            directory,
            policy,
            phone_pattern,
        }
    }

    /// Find or create the record for a verified identity.
    ///
    /// Returns the record and whether it was created by this call.
    #[tracing::instrument(skip(self, claims), fields(uid = %claims.subject_id))]
    pub async fn provision(&self, claims: &IdentityClaims) -> ApiResult<(UserRecord, bool)> {
        if let Some(user) = self.directory.find_by_subject(&claims.subject_id).await? {
            return Ok((user, false));
        }

        let email = normalize_email(&claims.email);
        if let Some(existing) = self.directory.find_by_email(&email).await? {
            return self.link_existing(existing, claims).await.map(|u| (u, false));
        }

        let new_user = NewUser::from_subject(
            claims.subject_id.as_str(),
            email.as_str(),
            first_token(claims.display_name.as_deref()),
        );

        match self.directory.insert(new_user).await {
            Ok(user) => {
                info!(user_id = %user.id, "Provisioned user from identity token");
                Ok((user, true))
            }
            // Lost a race with a concurrent login for the same subject
            Err(DbError::UniqueViolation { field }) if field == "external_subject_id" => {
                debug!("Concurrent provisioning detected, re-reading");
                let user = self
                    .directory
                    .find_by_subject(&claims.subject_id)
                    .await?
                    .ok_or_else(|| ApiError::internal("Provisioned record vanished"))?;
                Ok((user, false))
            }
            Err(DbError::UniqueViolation { field }) if field == "email" => {
                let existing = self
                    .directory
                    .find_by_email(&email)
                    .await?
                    .ok_or_else(|| ApiError::internal("Conflicting record vanished"))?;
                self.link_existing(existing, claims).await.map(|u| (u, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Attach a subject to a record created outside the identity provider.
    async fn link_existing(&self, existing: UserRecord, claims: &IdentityClaims) -> ApiResult<UserRecord> {
        if existing.external_subject_id.is_some() || !claims.email_verified {
            warn!(
                user_id = %existing.id,
                email_verified = claims.email_verified,
                "Refusing to link identity to existing record"
            );
            return Err(ApiError::conflict("email", unique_message("email")));
        }

        let user = self
            .directory
            .link_subject(existing.id, &claims.subject_id)
            .await?;
        info!(user_id = %user.id, "Linked identity to existing record");
        Ok(user)
    }

    /// Create or replace the caller's profile.
    ///
    /// Every validation failure is collected before anything is written.
    /// Returns the stored record and whether it was created by this call.
    #[tracing::instrument(skip(self, claims, request), fields(uid = %claims.subject_id))]
    pub async fn upsert_profile(
        &self,
        claims: &IdentityClaims,
        request: ProfileRequest,
    ) -> ApiResult<(UserRecord, bool)> {
        let existing = self.directory.find_by_subject(&claims.subject_id).await?;
        let exclude = existing.as_ref().map(|u| u.id);

        let email = normalize_email(&claims.email);
        let first_name = request.first_name.trim();
        let last_name = request.last_name.trim();
        let phone = request.phone_number.trim();

        let mut errors = request.check();

        if !errors.contains("phone_number") {
            if let Err(message) = self.phone_pattern.validate(phone) {
                errors.add("phone_number", message);
            }
        }

        let password = request.supplied_password();
        if password.is_none() && existing.is_none() {
            errors.add("password", REQUIRED_MESSAGE);
        }
        if request.password.as_deref().unwrap_or_default()
            != request.retype_password.as_deref().unwrap_or_default()
        {
            errors.add("retype_password", MISMATCH_MESSAGE);
        }
        if let Some(password) = password {
            let attributes = [
                Attribute::email(&email),
                Attribute::first_name(first_name),
                Attribute::last_name(last_name),
            ];
            errors.extend_field("password", self.policy.check(password, &attributes));
        }

        if !errors.contains("phone_number") && self.directory.phone_in_use(phone, exclude).await? {
            errors.add("phone_number", unique_message("phone_number"));
        }
        if self.directory.email_in_use(&email, exclude).await? {
            errors.add("email", unique_message("email"));
        }

        errors.into_result().map_err(ApiError::Validation)?;

        let password_hash = match password {
            Some(password) => Some(hash_password(password).await?),
            None => None,
        };

        let update = ProfileUpdate {
            email: email.clone(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            phone_number: Some(phone.to_string()),
            password_hash,
        };

        if let Some(existing) = existing {
            let user = self.directory.update_profile(existing.id, update).await?;
            info!(user_id = %user.id, "Profile updated");
            return Ok((user, false));
        }

        let new_user = NewUser {
            external_subject_id: Some(claims.subject_id.clone()),
            email: update.email.clone(),
            first_name: update.first_name.clone(),
            last_name: update.last_name.clone(),
            phone_number: update.phone_number.clone(),
            password_hash: update.password_hash.clone(),
            ..Default::default()
        };

        match self.directory.insert(new_user).await {
            Ok(user) => {
                info!(user_id = %user.id, "Profile created");
                Ok((user, true))
            }
            // A concurrent login provisioned this subject first
            Err(DbError::UniqueViolation { field }) if field == "external_subject_id" => {
                let current = self
                    .directory
                    .find_by_subject(&claims.subject_id)
                    .await?
                    .ok_or_else(|| ApiError::internal("Provisioned record vanished"))?;
                let user = self.directory.update_profile(current.id, update).await?;
                Ok((user, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a record's phone number.
    #[tracing::instrument(skip(self, phone_number))]
    pub async fn update_phone(&self, id: UserId, phone_number: &str) -> ApiResult<UserRecord> {
        self.directory
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::not_found(NOT_FOUND_MESSAGE))?;

        let phone = self
            .phone_pattern
            .validate(phone_number)
            .map_err(|message| ApiError::invalid_field("phone_number", message))?;

        if self.directory.phone_in_use(phone, Some(id)).await? {
            return Err(ApiError::Conflict(FieldErrors::single(
                "phone_number",
                unique_message("phone_number"),
            )));
        }

        let user = self.directory.set_phone(id, phone).await?;
        info!(user_id = %user.id, "Phone number updated");
        Ok(user)
    }

    pub async fn get_by_id(&self, id: UserId) -> ApiResult<UserRecord> {
        self.directory
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::not_found(NOT_FOUND_MESSAGE))
    }

    pub async fn get_by_subject(&self, subject_id: &str) -> ApiResult<UserRecord> {
        self.directory
            .find_by_subject(subject_id)
            .await?
            .ok_or_else(|| ApiError::not_found(NOT_FOUND_MESSAGE))
    }

    pub async fn delete(&self, id: UserId) -> ApiResult<()> {
        if self.directory.delete(id).await? {
            Ok(())
        } else {
            Err(ApiError::not_found(NOT_FOUND_MESSAGE))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use profiles_db::{create_pool, ensure_schema, DbConfig, DbResult, SqliteUserDirectory};

    use crate::security::DEFAULT_PHONE_PATTERN;

    async fn sqlite_directory() -> SqliteUserDirectory {
        let pool = create_pool(&DbConfig::in_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        SqliteUserDirectory::new(pool)
    }

    fn service_over(directory: Arc<dyn UserDirectory>) -> ProfileService {
        ProfileService::new(
            directory,
            PasswordPolicy::default(),
            PhonePattern::new(DEFAULT_PHONE_PATTERN).unwrap(),
        )
    }

    async fn service() -> ProfileService {
        service_over(Arc::new(sqlite_directory().await))
    }

    /// Directory where a concurrent writer commits `rival` just before our
    /// next insert, so that insert fails on `field`.
    struct RacingDirectory {
        inner: SqliteUserDirectory,
        rival: Mutex<Option<(NewUser, &'static str)>>,
    }

    impl RacingDirectory {
        async fn new(rival: NewUser, field: &'static str) -> Arc<Self> {
            Arc::new(Self {
                inner: sqlite_directory().await,
                rival: Mutex::new(Some((rival, field))),
            })
        }
    }

    #[async_trait]
    impl UserDirectory for RacingDirectory {
        async fn find_by_id(&self, id: UserId) -> DbResult<Option<UserRecord>> {
            self.inner.find_by_id(id).await
        }
        async fn find_by_subject(&self, subject_id: &str) -> DbResult<Option<UserRecord>> {
            self.inner.find_by_subject(subject_id).await
        }
        async fn find_by_email(&self, email: &str) -> DbResult<Option<UserRecord>> {
            self.inner.find_by_email(email).await
        }
        async fn phone_in_use(&self, phone_number: &str, exclude: Option<UserId>) -> DbResult<bool> {
            self.inner.phone_in_use(phone_number, exclude).await
        }
        async fn email_in_use(&self, email: &str, exclude: Option<UserId>) -> DbResult<bool> {
            self.inner.email_in_use(email, exclude).await
        }
        async fn insert(&self, user: NewUser) -> DbResult<UserRecord> {
            let rival = self.rival.lock().unwrap().take();
            match rival {
                Some((rival, field)) => {
                    self.inner.insert(rival).await?;
                    Err(DbError::UniqueViolation {
                        field: field.to_string(),
                    })
                }
                None => self.inner.insert(user).await,
            }
        }
        async fn update_profile(&self, id: UserId, update: ProfileUpdate) -> DbResult<UserRecord> {
            self.inner.update_profile(id, update).await
        }
        async fn link_subject(&self, id: UserId, subject_id: &str) -> DbResult<UserRecord> {
            self.inner.link_subject(id, subject_id).await
        }
        async fn set_phone(&self, id: UserId, phone_number: &str) -> DbResult<UserRecord> {
            self.inner.set_phone(id, phone_number).await
        }
        async fn set_password_hash(&self, id: UserId, password_hash: &str) -> DbResult<UserRecord> {
            self.inner.set_password_hash(id, password_hash).await
        }
        async fn delete(&self, id: UserId) -> DbResult<bool> {
            self.inner.delete(id).await
        }
        async fn ping(&self) -> DbResult<()> {
            self.inner.ping().await
        }
    }

    fn ada() -> IdentityClaims {
        IdentityClaims::new("abc123", "a@x.com").with_display_name("Ada Lovelace")
    }

    fn profile(phone: &str) -> ProfileRequest {
        ProfileRequest {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            phone_number: phone.to_string(),
            password: Some("Engine#1843".to_string()),
            retype_password: Some("Engine#1843".to_string()),
        }
    }

    #[tokio::test]
    async fn test_provision_creates_once() {
        let svc = service().await;

        let (user, created) = svc.provision(&ada()).await.unwrap();
        assert!(created);
        assert_eq!(user.first_name, "Ada");
        assert_eq!(user.last_name, "");
        assert_eq!(user.full_name(), "Ada");
        assert!(!user.has_usable_password());

        let (again, created) = svc.provision(&ada()).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, user.id);
    }

    #[tokio::test]
    async fn test_provision_links_unclaimed_record_only_when_verified() {
        let svc = service().await;
        let legacy = svc
            .directory
            .insert(NewUser {
                email: "a@x.com".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let err = svc.provision(&ada()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let mut verified = ada();
        verified.email_verified = true;
        let (user, created) = svc.provision(&verified).await.unwrap();
        assert!(!created);
        assert_eq!(user.id, legacy.id);
        assert_eq!(user.external_subject_id.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let svc = service().await;

        let (user, created) = svc.upsert_profile(&ada(), profile("08012345678")).await.unwrap();
        assert!(created);
        assert!(user.has_usable_password());
        assert_eq!(user.phone_number.as_deref(), Some("08012345678"));

        let update = ProfileRequest {
            password: None,
            retype_password: None,
            last_name: "King".to_string(),
            ..profile("08012345679")
        };
        let (updated, created) = svc.upsert_profile(&ada(), update).await.unwrap();
        assert!(!created);
        assert_eq!(updated.id, user.id);
        assert_eq!(updated.last_name, "King");
        assert_eq!(updated.password_hash, user.password_hash);
    }

    #[tokio::test]
    async fn test_upsert_after_provision_updates_same_record() {
        let svc = service().await;
        let (provisioned, _) = svc.provision(&ada()).await.unwrap();

        let (user, created) = svc.upsert_profile(&ada(), profile("08012345678")).await.unwrap();
        assert!(!created);
        assert_eq!(user.id, provisioned.id);
        assert_eq!(user.last_name, "Lovelace");
    }

    #[tokio::test]
    async fn test_upsert_collects_every_error() {
        let svc = service().await;
        let request = ProfileRequest {
            first_name: String::new(),
            phone_number: "12345".to_string(),
            password: Some("1234".to_string()),
            retype_password: Some("4321".to_string()),
            ..profile("")
        };

        let err = svc.upsert_profile(&ada(), request).await.unwrap_err();
        let errors = err.field_errors().unwrap();
        assert!(errors.contains("first_name"));
        assert!(errors.contains("phone_number"));
        assert_eq!(errors.get("retype_password"), [MISMATCH_MESSAGE.to_string()]);
        assert!(errors.get("password").len() >= 3);

        assert!(svc.directory.find_by_subject("abc123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_requires_password() {
        let svc = service().await;
        let request = ProfileRequest {
            password: None,
            retype_password: None,
            ..profile("08012345678")
        };

        let err = svc.upsert_profile(&ada(), request).await.unwrap_err();
        assert_eq!(err.field_errors().unwrap().get("password"), [REQUIRED_MESSAGE.to_string()]);
    }

    #[tokio::test]
    async fn test_upsert_rejects_phone_owned_by_someone_else() {
        let svc = service().await;
        svc.upsert_profile(&ada(), profile("08012345678")).await.unwrap();

        let grace = IdentityClaims::new("def456", "g@x.com");
        let err = svc.upsert_profile(&grace, profile("08012345678")).await.unwrap_err();
        assert_eq!(
            err.field_errors().unwrap().get("phone_number"),
            ["Phone number already exists.".to_string()]
        );
    }

    #[tokio::test]
    async fn test_update_phone() {
        let svc = service().await;
        let (ada_user, _) = svc.upsert_profile(&ada(), profile("08012345678")).await.unwrap();
        let grace = IdentityClaims::new("def456", "g@x.com");
        let (grace_user, _) = svc.upsert_profile(&grace, profile("08012345679")).await.unwrap();

        let updated = svc.update_phone(ada_user.id, " 08012345670 ").await.unwrap();
        assert_eq!(updated.phone_number.as_deref(), Some("08012345670"));

        let err = svc.update_phone(ada_user.id, "08012345679").await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        let unchanged = svc.get_by_id(ada_user.id).await.unwrap();
        assert_eq!(unchanged.phone_number.as_deref(), Some("08012345670"));

        // Re-saving your own number is not a conflict
        svc.update_phone(grace_user.id, "08012345679").await.unwrap();

        let err = svc.update_phone(ada_user.id, "   ").await.unwrap_err();
        assert_eq!(err.field_errors().unwrap().get("phone_number"), [REQUIRED_MESSAGE.to_string()]);

        let err = svc.update_phone(UserId(999), "08012345670").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let svc = service().await;
        let (user, _) = svc.provision(&ada()).await.unwrap();

        svc.delete(user.id).await.unwrap();
        assert!(matches!(svc.delete(user.id).await, Err(ApiError::NotFound(_))));
        assert!(matches!(svc.get_by_subject("abc123").await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_provision_losing_subject_race_returns_winner() {
        let rival = NewUser::from_subject("abc123", "a@x.com", "Ada");
        let directory = RacingDirectory::new(rival, "external_subject_id").await;
        let svc = service_over(directory.clone());

        let (user, created) = svc.provision(&ada()).await.unwrap();
        assert!(!created);

        let stored = directory.find_by_subject("abc123").await.unwrap().unwrap();
        assert_eq!(user.id, stored.id);
    }

    #[tokio::test]
    async fn test_provision_losing_email_race_links_record() {
        let rival = NewUser {
            email: "a@x.com".to_string(),
            ..Default::default()
        };
        let directory = RacingDirectory::new(rival, "email").await;
        let svc = service_over(directory.clone());

        let mut verified = ada();
        verified.email_verified = true;
        let (user, created) = svc.provision(&verified).await.unwrap();
        assert!(!created);
        assert_eq!(user.external_subject_id.as_deref(), Some("abc123"));

        let stored = directory.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(user.id, stored.id);
    }

    #[tokio::test]
    async fn test_upsert_losing_insert_race_updates_winner() {
        let rival = NewUser::from_subject("abc123", "a@x.com", "Ada");
        let directory = RacingDirectory::new(rival, "external_subject_id").await;
        let svc = service_over(directory.clone());

        let (user, created) = svc.upsert_profile(&ada(), profile("08012345678")).await.unwrap();
        assert!(!created);
        assert_eq!(user.last_name, "Lovelace");
        assert_eq!(user.phone_number.as_deref(), Some("08012345678"));
        assert!(user.has_usable_password());

        let stored = directory.find_by_subject("abc123").await.unwrap().unwrap();
        assert_eq!(user.id, stored.id);
    }
}
