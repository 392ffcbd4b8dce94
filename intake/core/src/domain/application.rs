// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application Aggregate
//!
//! The canonical job application record and the role catalogue offered by
//! the intake form.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Application record, open/closed lifecycle and field comparison
//!
//! # Lifecycle
//!
//! ```text
//! (none) ──submit──▶ Open ──submit (same fields)──▶ Open (no-op)
//!                     │ ──submit (non-key change)──▶ Open (updated in place)
//!                     │ ──submit (email change)────▶ Open (recreated under new key)
//!                     └──external review──▶ Closed (offer_given | rejected)
//! Closed ──submit──▶ new Open record, closed one left as history
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::identity::Identity;

/// Roles applicants may pick in the form, selected by 1-based index.
pub const ROLE_CATALOGUE: &[&str] = &["Senior Software Engineer", "Software Engineer"];

/// Look up a role by its 1-based menu position
pub fn role_by_menu_index<T>(roles: &[T], index: usize) -> Option<&T> {
    index.checked_sub(1).and_then(|i| roles.get(i))
}

/// A single application
///
/// The keyed store's primary key is `(applied_at, email)`. `applied_at` is
/// fixed for the life of an open record; `email` may change, which moves
/// the record to a new physical key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub identity: Identity,
    /// Seconds since the Unix epoch.
    pub applied_at: i64,
    pub email: String,
    pub name: String,
    pub role_applied: String,
    pub offer_given: bool,
    pub rejected: bool,
}

impl ApplicationRecord {
    pub fn new(
        identity: Identity,
        applied_at: i64,
        name: impl Into<String>,
        email: impl Into<String>,
        role_applied: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            applied_at,
            email: email.into(),
            name: name.into(),
            role_applied: role_applied.into(),
            offer_given: false,
            rejected: false,
        }
    }

    /// Closed records are history; a new submission starts a fresh record.
    pub fn is_closed(&self) -> bool {
        self.offer_given || self.rejected
    }

    pub fn is_open(&self) -> bool {
        !self.is_closed()
    }

    /// Field-by-field comparison of everything an applicant can submit,
    /// plus the carried `applied_at`.
    pub fn same_submission_as(&self, other: &ApplicationRecord) -> bool {
        self.identity == other.identity
            && self.applied_at == other.applied_at
            && self.email == other.email
            && self.name == other.name
            && self.role_applied == other.role_applied
    }

    pub fn key(&self) -> ApplicationKey {
        ApplicationKey {
            applied_at: self.applied_at,
            email: self.email.clone(),
        }
    }
}

/// Physical primary key of a record in the keyed store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApplicationKey {
    pub applied_at: i64,
    pub email: String,
}

impl fmt::Display for ApplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.applied_at, self.email)
    }
}

/// How a submission was classified against the current record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// No open record existed; a new one was queued for insert.
    Created,
    /// Identical to the open record; nothing was written.
    Unchanged,
    /// Non-key fields changed; queued for an in-place put.
    Updated,
    /// Email changed; queued for an atomic delete-old/put-new.
    Recreated,
}

impl SubmissionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionOutcome::Created => "created",
            SubmissionOutcome::Unchanged => "unchanged",
            SubmissionOutcome::Updated => "updated",
            SubmissionOutcome::Recreated => "recreated",
        }
    }
}

impl fmt::Display for SubmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
