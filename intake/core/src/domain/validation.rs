// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Submission Field Validation
//!
//! Format checks for the free-form fields of an application. Runs before any
//! remote access so malformed input never reaches the keyed store.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Name / e-mail / role format rules

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9.!#$%&'*+/=?^_` {|}~-]+$").expect("name pattern compiles")
});

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email pattern compiles")
});

static ROLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9 ]+$").expect("role pattern compiles")
});

/// A submitted field that can fail format validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Email,
    Role,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Name => f.write_str("name"),
            Field::Email => f.write_str("e-mail"),
            Field::Role => f.write_str("role"),
        }
    }
}

/// Every field that failed validation, in form order
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} invalid inputs: {}", .fields.len(), join_fields(.fields))]
pub struct ValidationError {
    pub fields: Vec<Field>,
}

fn join_fields(fields: &[Field]) -> String {
    fields.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

pub fn is_valid_role(role: &str) -> bool {
    ROLE_PATTERN.is_match(role)
}

/// Validate all submitted fields at once
///
/// # Returns
///
/// `Ok(())` when every field is well formed, otherwise a [`ValidationError`]
/// listing each offending field.
pub fn validate_submission(name: &str, email: &str, role: &str) -> Result<(), ValidationError> {
    let mut fields = Vec::new();
    if !is_valid_name(name) {
        fields.push(Field::Name);
    }
    if !is_valid_email(email) {
        fields.push(Field::Email);
    }
    if !is_valid_role(role) {
        fields.push(Field::Role);
    }

    if fields.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_rules() {
        let cases = [
            ("valid@example.com", true),
            ("missingdomain", false),
            ("double@at@symbols.com", false),
            ("notld@booze", true),
            ("contains,commas@commas.com", false),
            ("", false),
        ];
        for (email, expected) in cases {
            assert_eq!(is_valid_email(email), expected, "email {email:?}");
        }
    }

    #[test]
    fn test_role_rules() {
        assert!(is_valid_role("Senior Software Engineer"));
        assert!(!is_valid_role("invalid!chars,andsuch"));
        assert!(!is_valid_role(""));
    }

    #[test]
    fn test_name_allows_spaces_rejects_commas() {
        assert!(is_valid_name("Alice A"));
        assert!(is_valid_name("O'Brien"));
        assert!(!is_valid_name("Last, First"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn test_error_lists_every_invalid_field() {
        let err = validate_submission("bad,name", "nope", "Software Engineer").unwrap_err();
        assert_eq!(err.fields, vec![Field::Name, Field::Email]);
        assert_eq!(err.to_string(), "2 invalid inputs: name, e-mail");
    }

    #[test]
    fn test_valid_submission_passes() {
        assert!(validate_submission("Alice A", "a@x.com", "SWE").is_ok());
    }
}
