//! Request payloads accepted by the HTTP surface.
//!
//! Each payload is validated once at the boundary with `validator`; the
//! rules that depend on runtime configuration (phone pattern, password
//! policy) are applied by the services.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::field_errors::FieldErrors;

/// Maximum length of a stored phone number.
pub const MAX_PHONE_LENGTH: u64 = 15;

/// Message used for blank required fields.
pub const BLANK_MESSAGE: &str = "This field cannot be empty.";

fn non_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message(Cow::Borrowed(BLANK_MESSAGE)));
    }
    Ok(())
}

/// Body of `POST /profile/create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ProfileRequest {
    #[serde(default)]
    #[validate(
        custom(function = "non_blank"),
        length(max = 30, message = "Ensure this field has no more than 30 characters.")
    )]
    pub first_name: String,

    #[serde(default)]
    #[validate(
        custom(function = "non_blank"),
        length(max = 30, message = "Ensure this field has no more than 30 characters.")
    )]
    pub last_name: String,

    #[serde(default)]
    #[validate(
        custom(function = "non_blank"),
        length(max = 15, message = "Ensure this field has no more than 15 characters.")
    )]
    pub phone_number: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub retype_password: Option<String>,
}

impl ProfileRequest {
    /// Structural checks that need no configuration.
    pub fn check(&self) -> FieldErrors {
        match self.validate() {
            Ok(()) => FieldErrors::new(),
            Err(errors) => errors.into(),
        }
    }

    /// The password, if one was supplied and is not blank.
    pub fn supplied_password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}

/// Body of `PATCH /profile/{id}/update-phone`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhoneUpdateRequest {
    #[serde(default)]
    pub phone_number: String,
}

/// Body of `POST /firebase-login`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct FirebaseLoginRequest {
    #[serde(default)]
    #[validate(custom(function = "non_blank"))]
    pub id_token: String,
}

impl FirebaseLoginRequest {
    pub fn check(&self) -> FieldErrors {
        match self.validate() {
            Ok(()) => FieldErrors::new(),
            Err(errors) => errors.into(),
        }
    }
}

/// Body of `POST /reset-password`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[serde(default)]
    #[validate(email(message = "Enter a valid email address."))]
    pub email: String,

    #[serde(default)]
    #[validate(custom(function = "non_blank"))]
    pub new_password: String,

    #[serde(default)]
    #[validate(custom(function = "non_blank"))]
    pub confirm_password: String,
}

impl PasswordResetRequest {
    pub fn check(&self) -> FieldErrors {
        match self.validate() {
            Ok(()) => FieldErrors::new(),
            Err(errors) => errors.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_profile() -> ProfileRequest {
        ProfileRequest {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            phone_number: "+2348012345678".to_string(),
            password: Some("Engine#1843".to_string()),
            retype_password: Some("Engine#1843".to_string()),
        }
    }

    #[test]
    fn test_valid_profile_has_no_errors() {
        assert!(valid_profile().check().is_empty());
    }

    #[test]
    fn test_reports_every_blank_field() {
        let request = ProfileRequest {
            first_name: "   ".to_string(),
            last_name: String::new(),
            phone_number: String::new(),
            ..valid_profile()
        };
        let errors = request.check();
        assert_eq!(errors.get("first_name"), [BLANK_MESSAGE.to_string()]);
        assert!(errors.contains("last_name"));
        assert!(errors.contains("phone_number"));
    }

    #[test]
    fn test_name_length_limit() {
        let request = ProfileRequest {
            first_name: "x".repeat(31),
            ..valid_profile()
        };
        assert!(request.check().contains("first_name"));
    }

    #[test]
    fn test_missing_fields_deserialize_as_blank() {
        let request: ProfileRequest = serde_json::from_str(r#"{"first_name":"Ada"}"#).unwrap();
        let errors = request.check();
        assert!(errors.contains("last_name"));
        assert!(request.supplied_password().is_none());
    }

    #[test]
    fn test_reset_request_rejects_bad_email() {
        let request = PasswordResetRequest {
            email: "not-an-email".to_string(),
            new_password: "x".to_string(),
            confirm_password: "x".to_string(),
        };
        assert!(request.check().contains("email"));
    }
}
