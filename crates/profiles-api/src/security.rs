//! Input validation for values whose rules are configured at runtime.

use regex::Regex;

use profiles_models::requests::MAX_PHONE_LENGTH;

/// Nigerian mobile numbers, local (`080...`) or international (`+23480...`).
pub const DEFAULT_PHONE_PATTERN: &str = r"^(?:\+234|0)[789][01]\d{8}$";

pub const PHONE_REQUIRED_MESSAGE: &str = "This field is required.";
pub const PHONE_INVALID_MESSAGE: &str = "Enter a valid phone number.";

/// Compiled regional phone-number rule.
#[derive(Debug, Clone)]
pub struct PhonePattern {
    regex: Regex,
}

impl PhonePattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    /// Whether a trimmed value is an acceptable phone number.
    pub fn matches(&self, phone: &str) -> bool {
        phone.chars().count() as u64 <= MAX_PHONE_LENGTH && self.regex.is_match(phone)
    }

    /// Trim and check a phone number, returning the normalized value.
    pub fn validate<'a>(&self, phone: &'a str) -> Result<&'a str, &'static str> {
        let phone = phone.trim();
        if phone.is_empty() {
            return Err(PHONE_REQUIRED_MESSAGE);
        }
        if !self.matches(phone) {
            return Err(PHONE_INVALID_MESSAGE);
        }
        Ok(phone)
    }
}
