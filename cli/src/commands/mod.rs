// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the term-apply CLI

pub mod config;
pub mod serve;

pub use self::config::ConfigCommand;
