//! Axum HTTP API server for user profiles.
//!
//! This crate provides:
//! - Firebase ID token verification
//! - Profile provisioning, editing and password reset
//! - Rate limiting and security headers
//! - Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod services;
pub mod state;

pub use auth::{AuthError, FirebaseVerifier, TokenVerifier};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{CredentialService, ProfileService};
pub use state::{AppState, StartupError};
