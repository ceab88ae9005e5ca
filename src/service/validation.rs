//! Field rules for request bodies.

use super::error::{FieldErrors, ServiceError};
use regex::Regex;
use std::sync::OnceLock;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Default)]
pub(crate) struct Validator {
    errors: FieldErrors,
}

impl Validator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, field: &str, message: String) {
        self.errors.entry(field.to_string()).or_default().push(message);
    }

    /// Returns `false` (and records the error) when the value is blank.
    fn required(&mut self, field: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.add(field, format!("The {field} field is required"));
            return false;
        }
        true
    }

    pub(crate) fn name(&mut self, value: &str) -> &mut Self {
        if self.required("name", value)
            && !value.chars().all(|c| c.is_alphabetic() || c == ' ')
        {
            self.add("name", "The name may only contain letters and spaces".to_string());
        }
        self
    }

    pub(crate) fn email(&mut self, value: &str) -> &mut Self {
        if self.required("email", value) && !valid_email(&normalize_email(value)) {
            self.add("email", "The email field must be a valid email address".to_string());
        }
        self
    }

    pub(crate) fn password(&mut self, value: &str) -> &mut Self {
        if self.required("password", value) && value.chars().count() < MIN_PASSWORD_LEN {
            self.add(
                "password",
                format!("The password must be at least {MIN_PASSWORD_LEN} characters"),
            );
        }
        self
    }

    pub(crate) fn token(&mut self, value: &str) -> &mut Self {
        if self.required("token", value) && !value.chars().all(|c| c.is_ascii_alphanumeric()) {
            self.add("token", "The token may only contain letters and numbers".to_string());
        }
        self
    }

    pub(crate) fn finish(&mut self) -> Result<(), ServiceError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(std::mem::take(&mut self.errors)))
        }
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

static EMAIL_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    EMAIL_PATTERN
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
        .is_some_and(|regex| regex.is_match(email_normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn errors(result: Result<(), ServiceError>) -> FieldErrors {
        match result {
            Err(ServiceError::Validation(errors)) => errors,
            _ => FieldErrors::new(),
        }
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn email_pattern_is_compiled_once() {
        assert!(valid_email("first@example.com"));
        let first = EMAIL_PATTERN.get().and_then(Option::as_ref).map(std::ptr::from_ref);
        assert!(valid_email("second@example.com"));
        let second = EMAIL_PATTERN.get().and_then(Option::as_ref).map(std::ptr::from_ref);
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn register_rules() {
        let found = errors(
            Validator::new()
                .name("R2D2")
                .email("nope")
                .password("short")
                .finish(),
        );
        assert_eq!(found.len(), 3);
        assert_eq!(found["name"], vec!["The name may only contain letters and spaces"]);
        assert_eq!(found["email"], vec!["The email field must be a valid email address"]);
        assert_eq!(found["password"], vec!["The password must be at least 8 characters"]);
    }

    #[test]
    fn required_fields_report_once() {
        let found = errors(Validator::new().name("").email(" ").password("").finish());
        assert_eq!(found["name"], vec!["The name field is required"]);
        assert_eq!(found["email"], vec!["The email field is required"]);
        assert_eq!(found["password"], vec!["The password field is required"]);
    }

    #[test]
    fn names_allow_letters_and_spaces() {
        assert!(Validator::new().name("Ada Lovelace").finish().is_ok());
        assert!(Validator::new().name("José").finish().is_ok());
    }

    #[test]
    fn tokens_must_be_alphanumeric() {
        assert!(Validator::new().token("abc123").finish().is_ok());
        let found = errors(Validator::new().token("abc-123").finish());
        assert!(found.contains_key("token"));
    }
}
