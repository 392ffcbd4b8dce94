// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Application Repository Interface
//!
//! Persistence contract for [`ApplicationRecord`]s in the remote keyed store.
//! The interface lives in the domain layer and is implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `ApplicationRepository` | `ApplicationRecord` | `InMemoryApplicationRepository`, `PostgresApplicationRepository` |
//!
//! ## Keys
//!
//! Records are stored under the primary key `(applied_at, email)` with a
//! secondary lookup on `identity`. Because `email` is applicant-editable the
//! physical key of a logical application can move, which is what
//! [`ApplicationRepository::recreate`] exists for.

use async_trait::async_trait;

use super::application::ApplicationRecord;
use super::identity::Identity;

/// Storage backend selection for the keyed store
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

/// Repository interface for application records
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    /// Most recent record (highest `applied_at`) for an identity, open or closed
    async fn find_latest(&self, identity: &Identity) -> Result<Option<ApplicationRecord>, RepositoryError>;

    /// Every record for an identity ordered by `applied_at` ascending
    async fn find_all(&self, identity: &Identity) -> Result<Vec<ApplicationRecord>, RepositoryError>;

    /// Upsert by `(applied_at, email)`
    ///
    /// An existing row keeps its review flags (`offer_given`, `rejected`);
    /// only applicant-editable fields are replaced.
    async fn save(&self, record: &ApplicationRecord) -> Result<(), RepositoryError>;

    /// Atomically delete `(record.applied_at, previous_email)` and insert `record`
    ///
    /// Either both happen or neither does. Fails with
    /// [`RepositoryError::NotFound`] when the previous key no longer exists.
    async fn recreate(&self, record: &ApplicationRecord, previous_email: &str) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<super::identity::IdentityError> for RepositoryError {
    fn from(err: super::identity::IdentityError) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
