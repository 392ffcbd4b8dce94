// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer
//!
//! Entities, value objects and the persistence/storage contracts the
//! application layer is written against.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements the applicant intake model

pub mod application;
pub mod identity;
pub mod validation;
pub mod repository;
pub mod object_store;
pub mod auth;
pub mod config;
