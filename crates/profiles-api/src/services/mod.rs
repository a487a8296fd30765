//! Business logic services.

pub mod credentials;
pub mod password;
pub mod profile;

pub use credentials::CredentialService;
pub use password::{hash_password, verify_password, PasswordPolicy};
pub use profile::ProfileService;
