// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Object Store Trait - Anti-Corruption Layer for resume storage
//!
//! Abstracts the bucket that holds committed resumes so the transfer
//! pipeline and the resume status cache never see backend specifics.
//! Production uses S3; development and tests use a local directory or memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use thiserror::Error;

use super::identity::Identity;

/// Ownership marker attached to every uploaded object.
pub const OWNER_TAG: (&str, &str) = ("owner", "term-apply");

/// Canonical object key of an applicant's resume: `<prefix>/<identity>-resume.pdf`
///
/// Trailing slashes on the prefix are collapsed so `a/` and `a` give the same key.
pub fn resume_object_key(prefix: &str, identity: &Identity) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        identity.resume_file_name()
    } else {
        format!("{}/{}", prefix, identity.resume_file_name())
    }
}

/// Bucket-level operations used by the intake server
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file to `key`, tagged with [`OWNER_TAG`]
    ///
    /// # Arguments
    /// * `key` - Object key (see [`resume_object_key`])
    /// * `local_path` - File to upload
    async fn put(&self, key: &str, local_path: &Path) -> Result<(), ObjectStoreError>;

    /// Download `key` into `local_path`, replacing any existing file
    async fn get(&self, key: &str, local_path: &Path) -> Result<(), ObjectStoreError>;

    /// Whether an object exists at `key`
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;

    /// Last modification time of `key`, `None` when the object is absent
    async fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>, ObjectStoreError>;
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Local file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_object_key() {
        let identity = Identity::parse("alice").unwrap();
        assert_eq!(
            resume_object_key("/term-apply/dev/resumes", &identity),
            "/term-apply/dev/resumes/alice-resume.pdf"
        );
        assert_eq!(resume_object_key("resumes/", &identity), "resumes/alice-resume.pdf");
        assert_eq!(resume_object_key("", &identity), "alice-resume.pdf");
    }
}
