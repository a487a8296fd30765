//! Application state.

use std::sync::Arc;

use thiserror::Error;

use profiles_db::{create_pool, ensure_schema, DbError, SqliteUserDirectory, UserDirectory};

use crate::auth::{AuthError, FirebaseVerifier, TokenVerifier};
use crate::config::ApiConfig;
use crate::security::PhonePattern;
use crate::services::{CredentialService, PasswordPolicy, ProfileService};

/// Failures while assembling the application state at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database unavailable: {0}")]
    Database(#[from] DbError),

    #[error("token verifier: {0}")]
    Verifier(#[from] AuthError),

    #[error("invalid PHONE_PATTERN: {0}")]
    PhonePattern(#[from] regex::Error),
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub directory: Arc<dyn UserDirectory>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub profiles: ProfileService,
    pub credentials: CredentialService,
}

impl AppState {
    /// Create application state from configuration.
    pub async fn new(config: ApiConfig) -> Result<Self, StartupError> {
        let pool = create_pool(&config.database).await?;
        ensure_schema(&pool).await?;
        let directory: Arc<dyn UserDirectory> = Arc::new(SqliteUserDirectory::new(pool));

        let verifier: Arc<dyn TokenVerifier> = Arc::new(FirebaseVerifier::new(
            config.firebase_project_id.as_str(),
            config.jwks_url.as_str(),
        )?);

        Self::from_parts(config, directory, verifier)
    }

    /// Assemble state around an existing directory and verifier.
    pub fn from_parts(
        config: ApiConfig,
        directory: Arc<dyn UserDirectory>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Result<Self, StartupError> {
        let phone_pattern = PhonePattern::new(&config.phone_pattern)?;
        let policy = PasswordPolicy::new(config.password_min_length);

        let profiles = ProfileService::new(Arc::clone(&directory), policy.clone(), phone_pattern);
        let credentials = CredentialService::new(Arc::clone(&directory), policy);

        Ok(Self {
            config,
            directory,
            verifier,
            profiles,
            credentials,
        })
    }
}
