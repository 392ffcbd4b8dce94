// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of [`ApplicationRepository`].
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve application records
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **PostgresApplicationRepository** - production keyed store
//! - **InMemoryApplicationRepository** - BTreeMap keyed by `(applied_at, email)`
//!   for development and tests

pub mod postgres_application;

pub use postgres_application::PostgresApplicationRepository;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::application::{ApplicationKey, ApplicationRecord};
use crate::domain::identity::Identity;
use crate::domain::repository::{ApplicationRepository, RepositoryError};
use crate::infrastructure::db::Database;
use crate::domain::repository::StorageBackend;

#[derive(Clone, Default)]
pub struct InMemoryApplicationRepository {
    records: Arc<RwLock<BTreeMap<ApplicationKey, ApplicationRecord>>>,
}

impl InMemoryApplicationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record in key order
    pub fn snapshot(&self) -> Vec<ApplicationRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Seed or overwrite a record directly, bypassing upsert rules
    pub fn insert_raw(&self, record: ApplicationRecord) {
        self.records.write().insert(record.key(), record);
    }
}

#[async_trait]
impl ApplicationRepository for InMemoryApplicationRepository {
    async fn find_latest(&self, identity: &Identity) -> Result<Option<ApplicationRecord>, RepositoryError> {
        let records = self.records.read();
        Ok(records
            .values()
            .filter(|r| &r.identity == identity)
            .max_by_key(|r| r.applied_at)
            .cloned())
    }

    async fn find_all(&self, identity: &Identity) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        let records = self.records.read();
        let mut matching: Vec<_> = records.values().filter(|r| &r.identity == identity).cloned().collect();
        matching.sort_by_key(|r| r.applied_at);
        Ok(matching)
    }

    async fn save(&self, record: &ApplicationRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write();
        match records.get_mut(&record.key()) {
            Some(existing) => {
                existing.identity = record.identity.clone();
                existing.name = record.name.clone();
                existing.role_applied = record.role_applied.clone();
            }
            None => {
                records.insert(record.key(), record.clone());
            }
        }
        Ok(())
    }

    async fn recreate(&self, record: &ApplicationRecord, previous_email: &str) -> Result<(), RepositoryError> {
        let previous_key = ApplicationKey {
            applied_at: record.applied_at,
            email: previous_email.to_string(),
        };

        // Single write guard: readers never observe the gap between delete and insert.
        let mut records = self.records.write();
        if records.contains_key(&record.key()) {
            return Err(RepositoryError::Database(format!(
                "duplicate key application {}",
                record.key()
            )));
        }
        let previous = records
            .remove(&previous_key)
            .ok_or_else(|| RepositoryError::NotFound(format!("application {}", previous_key)))?;

        let mut moved = record.clone();
        moved.offer_given = previous.offer_given;
        moved.rejected = previous.rejected;
        records.insert(moved.key(), moved);
        Ok(())
    }
}

/// Build the repository selected by configuration
///
/// PostgreSQL backends connect and bootstrap the schema before returning.
pub async fn create_application_repository(
    backend: StorageBackend,
) -> anyhow::Result<Arc<dyn ApplicationRepository>> {
    match backend {
        StorageBackend::InMemory => {
            tracing::warn!("Using in-memory application repository; records are lost on restart");
            Ok(Arc::new(InMemoryApplicationRepository::new()))
        }
        StorageBackend::PostgreSQL(config) => {
            let db = Database::new(&config.connection_string).await?;
            db.ensure_schema().await?;
            Ok(Arc::new(PostgresApplicationRepository::new(db.get_pool().clone())))
        }
    }
}
