use lazy_static::lazy_static;
use regex::Regex;

use crate::error::AppError;

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Collects field errors so one response can report all of them.
#[derive(Debug, Default)]
pub struct Violations(Vec<String>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn length(&mut self, field: &str, value: &str, min: usize, max: usize) {
        let len = value.chars().count();
        if len < min || len > max {
            self.0
                .push(format!("{field} must be between {min} and {max} characters"));
        }
    }

    pub fn min_length(&mut self, field: &str, value: &str, min: usize) {
        if value.chars().count() < min {
            self.0
                .push(format!("{field} must be at least {min} characters"));
        }
    }

    pub fn email(&mut self, field: &str, value: &str) {
        if !is_valid_email(value) {
            self.0.push(format!("{field} must be a valid email address"));
        }
    }

    pub fn required(&mut self, field: &str, value: &str) {
        if value.is_empty() {
            self.0.push(format!("{field} is required"));
        }
    }

    pub fn into_result(self) -> Result<(), AppError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self.0.join("; ")))
        }
    }
}
