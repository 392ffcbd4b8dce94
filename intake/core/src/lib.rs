// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! term-apply core
//!
//! Applicant intake over SSH: public key authentication against a key
//! registry, a bounded and content-checked resume upload pipeline, and the
//! consistency engine that keeps one open application per applicant.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, use cases and adapters shared by the server binary

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;
