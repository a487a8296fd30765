//! Shared data models for the profiles backend.
//!
//! This crate provides Serde-serializable types for:
//! - Local user records and their public projection
//! - Verified identity claims from the identity provider
//! - Field-level validation errors
//! - Request payloads accepted by the HTTP surface

pub mod field_errors;
pub mod identity;
pub mod requests;
pub mod user;

// Re-export common types
pub use field_errors::FieldErrors;
pub use identity::IdentityClaims;
pub use requests::{FirebaseLoginRequest, PasswordResetRequest, PhoneUpdateRequest, ProfileRequest};
pub use user::{first_token, normalize_email, NewUser, PublicProfile, UserId, UserRecord};
