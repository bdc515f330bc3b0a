//! Payload schema validation
//!
//! Violations are collected rather than short-circuited so a rejected
//! payload reports every problem at once.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// A single schema violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Event payload failed schema validation; nothing may be enqueued from it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Payload validation failed: {}", join_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![FieldViolation {
                field: field.into(),
                message: message.into(),
            }],
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static regex"))
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex")
    })
}

fn currency_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]{3}$").expect("static regex"))
}

/// Collector for schema violations
#[derive(Debug, Default)]
pub struct Violations {
    items: Vec<FieldViolation>,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.items.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn check(&mut self, condition: bool, field: impl Into<String>, message: impl Into<String>) {
        if !condition {
            self.push(field, message);
        }
    }

    pub fn required(&mut self, field: &str, value: &str) {
        self.check(!value.trim().is_empty(), field, "is required");
    }

    pub fn identifier(&mut self, field: &str, value: &str) {
        if value.is_empty() {
            self.push(field, "is required");
        } else if !identifier_regex().is_match(value) {
            self.push(field, "must be 1-64 characters of letters, digits, '-' or '_'");
        }
    }

    pub fn email(&mut self, field: &str, value: &str) {
        if value.is_empty() {
            self.push(field, "is required");
        } else if !email_regex().is_match(value) {
            self.push(field, "must be a valid email address");
        }
    }

    pub fn currency(&mut self, field: &str, value: &str) {
        self.check(
            currency_regex().is_match(value),
            field,
            "must be a 3-letter upper-case ISO 4217 code",
        );
    }

    pub fn non_negative(&mut self, field: &str, value: i64) {
        self.check(value >= 0, field, "must not be negative");
    }

    /// Fold the violations of another check into this collector
    pub fn merge(&mut self, result: Result<(), ValidationError>) {
        if let Err(err) = result {
            self.items.extend(err.violations);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.items.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations: self.items })
        }
    }
}
