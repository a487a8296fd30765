//! API configuration.

use std::time::Duration;

use profiles_db::DbConfig;

use crate::auth::GOOGLE_JWKS_URL;
use crate::security::DEFAULT_PHONE_PATTERN;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Rate limit requests per second for the credential endpoints
    pub rate_limit_rps: u32,
    /// Key the rate limiter on proxy headers instead of the socket peer
    pub trust_proxy_headers: bool,
    /// Request timeout
    pub request_timeout: Duration,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// User directory connection settings
    pub database: DbConfig,
    /// Firebase project that issues the accepted ID tokens
    pub firebase_project_id: String,
    /// Where the Firebase signing keys are published
    pub jwks_url: String,
    /// Regular expression phone numbers must match
    pub phone_pattern: String,
    /// Minimum password length
    pub password_min_length: usize,
    /// Expose Prometheus metrics at `/metrics`
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            rate_limit_rps: 5,
            trust_proxy_headers: false,
            request_timeout: Duration::from_secs(30),
            max_body_size: 64 * 1024, // 64KB
            environment: "development".to_string(),
            database: DbConfig::default(),
            firebase_project_id: String::new(),
            jwks_url: GOOGLE_JWKS_URL.to_string(),
            phone_pattern: DEFAULT_PHONE_PATTERN.to_string(),
            password_min_length: 8,
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8000),
            rate_limit_rps: std::env::var("RATE_LIMIT_RPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            trust_proxy_headers: std::env::var("TRUST_PROXY_HEADERS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            request_timeout: Duration::from_secs(
                std::env::var("REQUEST_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(64 * 1024),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            database: DbConfig::from_env(),
            firebase_project_id: std::env::var("FIREBASE_PROJECT_ID")
                .or_else(|_| std::env::var("GCP_PROJECT_ID"))
                .unwrap_or_default(),
            jwks_url: std::env::var("FIREBASE_JWKS_URL").unwrap_or_else(|_| GOOGLE_JWKS_URL.to_string()),
            phone_pattern: std::env::var("PHONE_PATTERN")
                .unwrap_or_else(|_| DEFAULT_PHONE_PATTERN.to_string()),
            password_min_length: std::env::var("PASSWORD_MIN_LENGTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }
    }

    /// Socket address string to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("API_PORT", "9100");
        std::env::set_var("FIREBASE_PROJECT_ID", "demo-project");
        std::env::set_var("PASSWORD_MIN_LENGTH", "12");

        let config = ApiConfig::from_env();
        assert_eq!(config.port, 9100);
        assert_eq!(config.firebase_project_id, "demo-project");
        assert_eq!(config.password_min_length, 12);
        assert_eq!(config.bind_address(), format!("{}:9100", config.host));

        std::env::remove_var("API_PORT");
        std::env::remove_var("FIREBASE_PROJECT_ID");
        std::env::remove_var("PASSWORD_MIN_LENGTH");
    }

    #[test]
    #[serial]
    fn test_proxy_headers_untrusted_by_default() {
        std::env::remove_var("TRUST_PROXY_HEADERS");
        assert!(!ApiConfig::from_env().trust_proxy_headers);

        std::env::set_var("TRUST_PROXY_HEADERS", "true");
        assert!(ApiConfig::from_env().trust_proxy_headers);
        std::env::remove_var("TRUST_PROXY_HEADERS");
    }

    #[test]
    #[serial]
    fn test_unparsable_values_fall_back() {
        std::env::set_var("API_PORT", "not-a-port");
        let config = ApiConfig::from_env();
        assert_eq!(config.port, 8000);
        std::env::remove_var("API_PORT");
    }
}
