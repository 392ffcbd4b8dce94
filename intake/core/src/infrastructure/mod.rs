// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure layer
//!
//! Adapters behind the domain contracts: key registry HTTP client, opendal
//! object store, keyed store repositories and the SCP wire protocol.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** External collaborators and wire formats

pub mod bounded_reader;
pub mod content_sniffer;
pub mod db;
pub mod key_registry;
pub mod object_store;
pub mod repositories;
pub mod scp;
