// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Presentation layer
//!
//! What an applicant sees on an SSH channel: the interactive form and the
//! `scp` upload sink, selected per channel by [`SessionRouter`].
//!
//! # Architecture
//!
//! - **Layer:** Presentation Layer
//! - **Purpose:** Terminal and SCP front ends over the application services

pub mod form;
pub mod session;
pub mod upload;

pub use form::{FormOutcome, FormSettings, SessionForm};
pub use session::{IntakeServices, SessionKind, SessionRouter};
pub use upload::{UploadSession, UploadSummary};
