// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Resume Status Cache
//!
//! Answers "has this applicant uploaded a resume" for the intake form.
//! Positive answers are remembered for the life of the process; negative
//! answers always go back to the object store, so a fresh upload shows up
//! on the next lookup without any invalidation.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::identity::Identity;
use crate::domain::object_store::{resume_object_key, ObjectStore};

pub struct ResumeStatusCache {
    object_store: Arc<dyn ObjectStore>,
    resume_prefix: String,
    uploaded: RwLock<HashSet<Identity>>,
}

impl ResumeStatusCache {
    pub fn new(object_store: Arc<dyn ObjectStore>, resume_prefix: impl Into<String>) -> Self {
        Self {
            object_store,
            resume_prefix: resume_prefix.into(),
            uploaded: RwLock::new(HashSet::new()),
        }
    }

    /// Whether a resume exists for `identity`
    ///
    /// A failed existence check is reported as "not uploaded" and not cached.
    pub async fn has_uploaded(&self, identity: &Identity) -> bool {
        if self.uploaded.read().contains(identity) {
            return true;
        }

        let key = resume_object_key(&self.resume_prefix, identity);
        match self.object_store.exists(&key).await {
            Ok(true) => {
                debug!(identity = %identity, key = %key, "Resume found, caching");
                self.uploaded.write().insert(identity.clone());
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Resume existence check failed");
                false
            }
        }
    }

    /// Record a just-committed upload without a store round trip
    pub fn record_upload(&self, identity: &Identity) {
        self.uploaded.write().insert(identity.clone());
    }
}
