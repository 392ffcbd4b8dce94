// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Applicant Identity
//!
//! The stable external handle of an applicant (their key registry username).
//! The same string is spliced into the registry URL, the local staging path
//! and the resume object key, so it is validated once here and carried as a
//! newtype afterwards.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Value object guarding every identity-derived path and URL

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest handle the registry hands out.
pub const MAX_IDENTITY_LEN: usize = 39;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Identity is empty")]
    Empty,

    #[error("Identity is longer than {MAX_IDENTITY_LEN} characters: {0}")]
    TooLong(String),

    #[error("Identity contains characters outside [A-Za-z0-9-] or starts with '-': {0}")]
    InvalidCharacters(String),
}

/// Validated applicant identity
///
/// Only ASCII alphanumerics and `-` are accepted and the first character
/// cannot be `-`. This keeps `..`, `/` and shell metacharacters out of every
/// derived path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdentityError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdentityError::Empty);
        }
        if raw.len() > MAX_IDENTITY_LEN {
            return Err(IdentityError::TooLong(raw));
        }
        let valid_chars = raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid_chars || raw.starts_with('-') {
            return Err(IdentityError::InvalidCharacters(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this applicant's resume, both locally and in the object store
    pub fn resume_file_name(&self) -> String {
        format!("{}-resume.pdf", self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_registry_handles() {
        for handle in ["alice", "Bob-99", "a", "x1-y2-z3"] {
            assert!(Identity::parse(handle).is_ok(), "{handle} should be accepted");
        }
    }

    #[test]
    fn test_rejects_path_and_shell_characters() {
        for handle in ["../etc", "a/b", "alice bob", "-leading", "semi;colon", "dot.name"] {
            assert!(
                matches!(Identity::parse(handle), Err(IdentityError::InvalidCharacters(_))),
                "{handle} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_empty_and_overlong() {
        assert_eq!(Identity::parse(""), Err(IdentityError::Empty));
        let long = "a".repeat(MAX_IDENTITY_LEN + 1);
        assert!(matches!(Identity::parse(long), Err(IdentityError::TooLong(_))));
    }

    #[test]
    fn test_resume_file_name() {
        let identity = Identity::parse("alice").unwrap();
        assert_eq!(identity.resume_file_name(), "alice-resume.pdf");
    }
}
