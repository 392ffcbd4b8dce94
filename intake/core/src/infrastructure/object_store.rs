// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! OpenDAL Object Store
//!
//! Implements [`ObjectStore`] over an `opendal::Operator` so the same code
//! path serves S3 in production, a local directory in development and an
//! in-process memory backend in tests.
//!
//! **Backends:**
//! - `s3` - bucket/region/endpoint from `spec.storage.object_store`
//! - `fs` - rooted at `object_store.root` (defaults to `<upload_dir>/objects`)
//! - `memory` - ephemeral, tests only
//!
//! Objects are written with `owner=term-apply` user metadata when the
//! backend supports it; backends without user metadata store the bytes only.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use opendal::{services, ErrorKind, Operator};
use std::path::Path;
use tracing::debug;

use crate::domain::config::{ObjectStoreConfig, ObjectStoreKind};
use crate::domain::object_store::{ObjectStore, ObjectStoreError, OWNER_TAG};

impl From<opendal::Error> for ObjectStoreError {
    fn from(err: opendal::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => ObjectStoreError::NotFound(err.to_string()),
            ErrorKind::ConfigInvalid => ObjectStoreError::Configuration(err.to_string()),
            _ => ObjectStoreError::Backend(err.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct OpendalObjectStore {
    operator: Operator,
}

impl OpendalObjectStore {
    pub fn new(operator: Operator) -> Self {
        Self { operator }
    }

    /// Build the operator described by configuration
    ///
    /// # Arguments
    /// * `config` - `spec.storage.object_store`
    /// * `default_fs_root` - Root used by the fs backend when `root` is unset
    pub fn from_config(config: &ObjectStoreConfig, default_fs_root: &Path) -> Result<Self, ObjectStoreError> {
        let operator = match config.backend {
            ObjectStoreKind::S3 => {
                let bucket = config
                    .bucket
                    .as_deref()
                    .ok_or_else(|| ObjectStoreError::Configuration("s3 backend requires a bucket".to_string()))?;
                let mut builder = services::S3::default().bucket(bucket);
                if let Some(region) = &config.region {
                    builder = builder.region(region);
                }
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.endpoint(endpoint);
                }
                if let Some(root) = &config.root {
                    builder = builder.root(root);
                }
                Operator::new(builder)?.finish()
            }
            ObjectStoreKind::Fs => {
                let root = match &config.root {
                    Some(root) => root.clone(),
                    None => default_fs_root.to_string_lossy().into_owned(),
                };
                Operator::new(services::Fs::default().root(&root))?.finish()
            }
            ObjectStoreKind::Memory => Self::memory_operator()?,
        };

        Ok(Self::new(operator))
    }

    /// In-process store for tests and dry runs
    pub fn in_memory() -> Result<Self, ObjectStoreError> {
        Ok(Self::new(Self::memory_operator()?))
    }

    fn memory_operator() -> Result<Operator, ObjectStoreError> {
        Ok(Operator::new(services::Memory::default())?.finish())
    }
}

#[async_trait]
impl ObjectStore for OpendalObjectStore {
    async fn put(&self, key: &str, local_path: &Path) -> Result<(), ObjectStoreError> {
        let body = tokio::fs::read(local_path).await?;
        let size = body.len();

        if self.operator.info().full_capability().write_with_user_metadata {
            let (tag_key, tag_value) = OWNER_TAG;
            self.operator
                .write_with(key, body)
                .user_metadata([(tag_key.to_string(), tag_value.to_string())])
                .await?;
        } else {
            self.operator.write(key, body).await?;
        }

        debug!(key = %key, bytes = size, "Object written");
        Ok(())
    }

    async fn get(&self, key: &str, local_path: &Path) -> Result<(), ObjectStoreError> {
        let buffer = self.operator.read(key).await?;
        tokio::fs::write(local_path, buffer.to_vec()).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.operator.exists(key).await?)
    }

    async fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>, ObjectStoreError> {
        match self.operator.stat(key).await {
            Ok(meta) => Ok(meta
                .last_modified()
                .and_then(|ts| parse_timestamp(&ts.to_string()))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Accepts RFC 3339 and chrono's `Display` form (`2024-01-01 00:00:00 UTC`).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = raw.parse::<DateTime<Utc>>() {
        return Some(ts);
    }
    let trimmed = raw.trim_end_matches(" UTC");
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
