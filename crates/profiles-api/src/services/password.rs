//! Password strength policy and Argon2 hashing.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use regex::Regex;
use tracing::warn;

use crate::error::{ApiError, ApiResult};

/// Characters that satisfy the symbol rule.
const SYMBOLS: &str = r#"!@#$%^&*(),.?":{}|<>"#;

/// Passwords at or above this similarity to a user attribute are refused.
const DEFAULT_MAX_SIMILARITY: f64 = 0.7;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").expect("static regex"));

static COMMON_PASSWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "123456", "password", "12345678", "qwerty", "123456789", "12345", "1234", "111111",
        "1234567", "dragon", "123123", "baseball", "abc123", "football", "monkey", "letmein",
        "shadow", "master", "666666", "qwertyuiop", "123321", "mustang", "1234567890",
        "michael", "654321", "superman", "1qaz2wsx", "7777777", "121212", "000000", "qazwsx",
        "123qwe", "killer", "trustno1", "jordan", "jennifer", "zxcvbnm", "asdfgh", "hunter",
        "buster", "soccer", "harley", "batman", "andrew", "tigger", "sunshine", "iloveyou",
        "2000", "charlie", "robert", "thomas", "hockey", "ranger", "daniel", "starwars",
        "klaster", "112233", "george", "computer", "michelle", "jessica", "pepper", "1111",
        "zxcvbn", "555555", "11111111", "131313", "freedom", "777777", "pass", "maggie",
        "159753", "aaaaaa", "ginger", "princess", "joshua", "cheese", "amanda", "summer",
        "love", "ashley", "nicole", "chelsea", "biteme", "matthew", "access", "yankees",
        "987654321", "dallas", "austin", "thunder", "taylor", "matrix", "password1",
        "password123", "passw0rd", "p@ssw0rd", "p@ssword", "welcome", "welcome1", "admin",
        "admin123", "qwerty123", "iloveyou1", "abc@123", "pass@123", "password@123",
        "qwerty@123", "admin@123", "welcome@123",
    ])
});

/// A user attribute a password must not resemble.
#[derive(Debug, Clone, Copy)]
pub struct Attribute<'a> {
    pub label: &'static str,
    pub value: &'a str,
}

impl<'a> Attribute<'a> {
    pub fn email(value: &'a str) -> Self {
        Self { label: "email address", value }
    }

    pub fn first_name(value: &'a str) -> Self {
        Self { label: "first name", value }
    }

    pub fn last_name(value: &'a str) -> Self {
        Self { label: "last name", value }
    }
}

/// Password strength rules applied to every new password.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_similarity: f64,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::new(8)
    }
}

impl PasswordPolicy {
    pub fn new(min_length: usize) -> Self {
        Self {
            min_length,
            max_similarity: DEFAULT_MAX_SIMILARITY,
        }
    }

    /// Messages for every rule the password breaks; empty when acceptable.
    pub fn check(&self, password: &str, attributes: &[Attribute<'_>]) -> Vec<String> {
        let mut messages = Vec::new();

        if let Some(label) = self.similar_attribute(password, attributes) {
            messages.push(format!("The password is too similar to the {label}."));
        }

        if password.chars().count() < self.min_length {
            let unit = if self.min_length == 1 { "character" } else { "characters" };
            messages.push(format!(
                "This password is too short. It must contain at least {} {unit}.",
                self.min_length
            ));
        }

        if COMMON_PASSWORDS.contains(password.trim().to_lowercase().as_str()) {
            messages.push("This password is too common.".to_string());
        }

        if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
            messages.push("This password is entirely numeric.".to_string());
        }

        if !password.chars().any(|c| SYMBOLS.contains(c)) {
            messages.push("Password must contain at least one symbol.".to_string());
        }

        messages
    }

    /// First attribute the password resembles too closely.
    fn similar_attribute(&self, password: &str, attributes: &[Attribute<'_>]) -> Option<&'static str> {
        let password = password.to_lowercase();

        for attribute in attributes {
            if attribute.value.is_empty() {
                continue;
            }
            let value = attribute.value.to_lowercase();
            let parts = NON_WORD
                .split(&value)
                .chain(std::iter::once(value.as_str()));

            for part in parts {
                if self.exceeds_length_ratio(&password, part) {
                    continue;
                }
                if quick_ratio(&password, part) >= self.max_similarity {
                    return Some(attribute.label);
                }
            }
        }
        None
    }

    /// Short attributes cannot meaningfully resemble a much longer password.
    fn exceeds_length_ratio(&self, password: &str, value: &str) -> bool {
        let password_len = password.chars().count() as f64;
        let value_len = value.chars().count() as f64;
        let bound = self.max_similarity / 2.0 * password_len;
        password_len >= 10.0 * value_len && value_len < bound
    }
}

/// Upper bound on sequence similarity: shared characters regardless of order.
fn quick_ratio(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }

    let mut available: HashMap<char, usize> = HashMap::new();
    for c in b.chars() {
        *available.entry(c).or_default() += 1;
    }

    let mut matches = 0usize;
    for c in a.chars() {
        if let Some(n) = available.get_mut(&c) {
            if *n > 0 {
                *n -= 1;
                matches += 1;
            }
        }
    }

    2.0 * matches as f64 / total as f64
}

#[cfg(not(test))]
fn argon2_instance() -> Argon2<'static> {
    Argon2::default()
}

/// Minimal cost parameters keep the test suite fast.
#[cfg(test)]
fn argon2_instance() -> Argon2<'static> {
    use argon2::{Algorithm, Params, Version};
    // Params::new only fails on out-of-range values; these are the documented minimums
    let params = Params::new(Params::MIN_M_COST, Params::MIN_T_COST, Params::MIN_P_COST, None)
        .unwrap_or_default();
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

/// Derive an Argon2id PHC string with a random salt.
pub async fn hash_password(password: &str) -> ApiResult<String> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        argon2_instance()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ApiError::internal(format!("Password hashing failed: {e}")))
    })
    .await
    .map_err(|e| ApiError::internal(format!("Password hashing task failed: {e}")))?
}

/// Check a plaintext password against a stored hash.
pub async fn verify_password(password: &str, stored_hash: &str) -> bool {
    let password = password.to_owned();
    let stored_hash = stored_hash.to_owned();
    let result = tokio::task::spawn_blocking(move || {
        let parsed = match PasswordHash::new(&stored_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Stored password hash is unreadable: {}", e);
                return false;
            }
        };
        argon2_instance()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
    .await;

    result.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PasswordPolicy {
        PasswordPolicy::default()
    }

    #[test]
    fn test_strong_password_passes() {
        let attrs = [
            Attribute::email("ada@example.com"),
            Attribute::first_name("Ada"),
            Attribute::last_name("Lovelace"),
        ];
        assert!(policy().check("Engine#1843", &attrs).is_empty());
    }

    #[test]
    fn test_every_failing_rule_is_reported() {
        let messages = policy().check("1234", &[]);
        assert!(messages.iter().any(|m| m.contains("too short")));
        assert!(messages.iter().any(|m| m.contains("too common")));
        assert!(messages.iter().any(|m| m.contains("entirely numeric")));
        assert!(messages.iter().any(|m| m.contains("symbol")));
    }

    #[test]
    fn test_common_password_is_case_insensitive() {
        let messages = policy().check("PASSWORD123", &[]);
        assert!(messages.contains(&"This password is too common.".to_string()));
    }

    #[test]
    fn test_symbol_required() {
        let messages = policy().check("correcthorsebattery", &[]);
        assert_eq!(messages, vec!["Password must contain at least one symbol.".to_string()]);
    }

    #[test]
    fn test_similarity_to_email() {
        let attrs = [Attribute::email("lovelace@example.com")];
        let messages = policy().check("Lovelace!", &attrs);
        assert_eq!(
            messages,
            vec!["The password is too similar to the email address.".to_string()]
        );
    }

    #[test]
    fn test_short_attribute_parts_are_ignored() {
        // "a" is far shorter than the password
        let attrs = [Attribute::first_name("a")];
        assert!(policy().check("aaaaaaaaaaaaaaaaaaaaaa!b", &attrs).is_empty());
    }

    #[test]
    fn test_configured_min_length() {
        let messages = PasswordPolicy::new(12).check("Engine#1843", &[]);
        assert_eq!(
            messages,
            vec!["This password is too short. It must contain at least 12 characters.".to_string()]
        );
    }

    #[test]
    fn test_quick_ratio() {
        assert_eq!(quick_ratio("abc", "abc"), 1.0);
        assert_eq!(quick_ratio("abc", "xyz"), 0.0);
        assert_eq!(quick_ratio("", ""), 1.0);
        assert!((quick_ratio("abcd", "bcde") - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hash = hash_password("Engine#1843").await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("Engine#1843", &hash).await);
        assert!(!verify_password("Engine#1844", &hash).await);
        assert!(!verify_password("Engine#1843", "not-a-hash").await);
    }

    #[tokio::test]
    async fn test_hashes_are_salted() {
        let a = hash_password("Engine#1843").await.unwrap();
        let b = hash_password("Engine#1843").await.unwrap();
        assert_ne!(a, b);
    }
}
