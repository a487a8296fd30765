//! Firebase ID token authentication.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use profiles_models::IdentityClaims;

use crate::error::ApiError;
use crate::metrics;
use crate::state::AppState;

/// Google JWKS URL for Firebase Auth.
pub const GOOGLE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Firebase token issuer prefix.
const FIREBASE_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// JWKS cache TTL.
const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600); // 1 hour

/// Minimum gap between refetches triggered by an unknown kid.
const JWKS_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Key fetch timeout.
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Reasons a bearer token is refused.
///
/// Every variant maps to 401 except `KeysUnavailable`, which is our failure
/// and maps to 500.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,

    #[error("Invalid Authorization header format")]
    MalformedHeader,

    #[error("Token rejected: {0}")]
    Rejected(String),

    #[error("Token is missing a subject or email")]
    IncompleteClaims,

    #[error("Signing keys unavailable: {0}")]
    KeysUnavailable(String),
}

/// Verifies an identity token and returns the claims it carries.
///
/// Tokens are never cached; every call re-verifies.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<IdentityClaims, AuthError>;
}

/// Decoded Firebase ID token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirebaseClaims {
    /// User ID
    pub sub: String,
    /// Email (if available)
    pub email: Option<String>,
    /// Email verified
    pub email_verified: Option<bool>,
    /// Display name (if available)
    pub name: Option<String>,
    /// Issuer
    pub iss: String,
    /// Audience (Firebase project ID)
    pub aud: String,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
    /// Authentication time
    pub auth_time: Option<i64>,
}

impl TryFrom<FirebaseClaims> for IdentityClaims {
    type Error = AuthError;

    fn try_from(claims: FirebaseClaims) -> Result<Self, Self::Error> {
        let email = claims.email.filter(|e| !e.trim().is_empty());
        match email {
            Some(email) if !claims.sub.is_empty() => Ok(IdentityClaims {
                subject_id: claims.sub,
                email,
                display_name: claims.name,
                email_verified: claims.email_verified.unwrap_or(false),
            }),
            _ => Err(AuthError::IncompleteClaims),
        }
    }
}

/// JWKS response from Google.
#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkKey>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkKey {
    kid: String,
    n: String,
    e: String,
}

/// Firebase verifier backed by a cached copy of Google's signing keys.
pub struct FirebaseVerifier {
    http: Client,
    keys: RwLock<HashMap<String, DecodingKey>>,
    last_refresh: RwLock<Option<Instant>>,
    /// Held for the duration of a refetch so concurrent misses share one.
    refresh_lock: Mutex<()>,
    project_id: String,
    jwks_url: String,
}

impl FirebaseVerifier {
    /// Create a verifier for a Firebase project.
    ///
    /// Keys are fetched lazily on the first verification.
    pub fn new(project_id: impl Into<String>, jwks_url: impl Into<String>) -> Result<Self, AuthError> {
        let project_id = project_id.into();
        if project_id.is_empty() {
            return Err(AuthError::KeysUnavailable(
                "FIREBASE_PROJECT_ID is not set".to_string(),
            ));
        }

        let http = Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?;

        Ok(Self {
            http,
            keys: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            project_id,
            jwks_url: jwks_url.into(),
        })
    }

    /// Refresh JWKS keys from Google.
    async fn refresh_keys(&self) -> Result<(), AuthError> {
        debug!(url = %self.jwks_url, "Refreshing JWKS keys");

        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?;
        let jwks: JwksResponse = response
            .json()
            .await
            .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys.insert(jwk.kid, key);
                }
                Err(e) => warn!(kid = %jwk.kid, "Skipping unusable JWKS key: {}", e),
            }
        }

        let key_count = keys.len();
        *self.keys.write().await = keys;
        *self.last_refresh.write().await = Some(Instant::now());

        debug!("Refreshed {} JWKS keys", key_count);
        Ok(())
    }

    /// Cached key for a key ID, if the cache is still within its TTL.
    async fn cached_key(&self, kid: &str) -> Option<DecodingKey> {
        let last_refresh = *self.last_refresh.read().await;
        if last_refresh.map_or(true, |last| last.elapsed() > JWKS_CACHE_TTL) {
            return None;
        }
        self.keys.read().await.get(kid).cloned()
    }

    /// Get decoding key for a key ID, refreshing when stale or unknown.
    ///
    /// Unknown kids trigger at most one refetch per
    /// `JWKS_MIN_REFRESH_INTERVAL`; forged kids cannot drive outbound traffic.
    async fn get_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(key) = self.cached_key(kid).await {
            return Ok(key);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed while we waited
        if let Some(key) = self.cached_key(kid).await {
            return Ok(key);
        }

        let last_refresh = *self.last_refresh.read().await;
        let throttled = last_refresh.is_some_and(|last| last.elapsed() < JWKS_MIN_REFRESH_INTERVAL);
        if throttled {
            debug!(kid = %kid, "Unknown key ID, refresh throttled");
        } else {
            self.refresh_keys().await?;
        }

        self.keys
            .read()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(|| AuthError::Rejected("Unknown key ID".to_string()))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[format!("{}{}", FIREBASE_ISSUER_PREFIX, self.project_id)]);
        validation.set_audience(&[&self.project_id]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation
    }
}

#[async_trait]
impl TokenVerifier for FirebaseVerifier {
    async fn verify(&self, token: &str) -> Result<IdentityClaims, AuthError> {
        let header = decode_header(token)
            .map_err(|e| AuthError::Rejected(format!("Invalid token header: {}", e)))?;

        let kid = header
            .kid
            .ok_or_else(|| AuthError::Rejected("Token missing key ID".to_string()))?;

        let key = self.get_key(&kid).await?;

        let token_data = decode::<FirebaseClaims>(token, &key, &self.validation())
            .map_err(|e| AuthError::Rejected(format!("Token validation failed: {}", e)))?;

        token_data.claims.try_into()
    }
}

/// Extract the bearer token from request headers.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MalformedHeader)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}

/// Authenticated caller extracted from a verified bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub IdentityClaims);

impl AuthUser {
    pub fn claims(&self) -> &IdentityClaims {
        &self.0
    }

    pub fn uid(&self) -> &str {
        &self.0.subject_id
    }
}

/// Axum extractor for authenticated user.
#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let result = match bearer_token(&parts.headers) {
            Ok(token) => state.verifier.verify(token).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(claims) => Ok(AuthUser(claims)),
            Err(e) => {
                debug!(error = %e, "Authentication failed");
                metrics::record_auth_failure(auth_failure_reason(&e));
                Err(e.into())
            }
        }
    }
}

fn auth_failure_reason(err: &AuthError) -> &'static str {
    match err {
        AuthError::MissingHeader => "missing_header",
        AuthError::MalformedHeader => "malformed_header",
        AuthError::Rejected(_) => "rejected",
        AuthError::IncompleteClaims => "incomplete_claims",
        AuthError::KeysUnavailable(_) => "keys_unavailable",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
        assert_eq!(bearer_token(&headers("bearer abc")).unwrap(), "abc");
    }

    #[test]
    fn test_missing_header() {
        assert!(matches!(
            bearer_token(&HeaderMap::new()),
            Err(AuthError::MissingHeader)
        ));
    }

    #[test]
    fn test_malformed_headers() {
        for value in ["Basic abc", "Bearer", "Bearer   ", "Token abc", "abc"] {
            assert!(
                matches!(bearer_token(&headers(value)), Err(AuthError::MalformedHeader)),
                "{value} should be malformed"
            );
        }
    }

    fn firebase_claims(email: Option<&str>) -> FirebaseClaims {
        FirebaseClaims {
            sub: "abc123".to_string(),
            email: email.map(str::to_string),
            email_verified: Some(true),
            name: Some("Ada Lovelace".to_string()),
            iss: "https://securetoken.google.com/demo".to_string(),
            aud: "demo".to_string(),
            iat: 0,
            exp: 0,
            auth_time: None,
        }
    }

    #[test]
    fn test_claims_conversion() {
        let claims: IdentityClaims = firebase_claims(Some("a@x.com")).try_into().unwrap();
        assert_eq!(claims.subject_id, "abc123");
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.display_name.as_deref(), Some("Ada Lovelace"));
        assert!(claims.email_verified);
    }

    #[test]
    fn test_claims_without_email_are_incomplete() {
        let result: Result<IdentityClaims, _> = firebase_claims(None).try_into();
        assert!(matches!(result, Err(AuthError::IncompleteClaims)));
    }

    #[test]
    fn test_verifier_requires_project() {
        assert!(FirebaseVerifier::new("", GOOGLE_JWKS_URL).is_err());
    }
}
