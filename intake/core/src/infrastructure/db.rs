// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype that is
//! injected into the PostgreSQL application repository, and bootstraps the
//! `applications` table on first use.
//!
//! Only needed when `spec.storage.keyed_store.backend` is `postgres`.

use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

const CREATE_APPLICATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS applications (
    applied_at   BIGINT  NOT NULL,
    email        TEXT    NOT NULL,
    identity     TEXT    NOT NULL,
    name         TEXT    NOT NULL,
    role_applied TEXT    NOT NULL,
    offer_given  BOOLEAN NOT NULL DEFAULT FALSE,
    rejected     BOOLEAN NOT NULL DEFAULT FALSE,
    PRIMARY KEY (applied_at, email)
)
"#;

const CREATE_IDENTITY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS applications_identity_idx ON applications (identity, applied_at DESC)";

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    /// Create the applications table and identity index if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_APPLICATIONS_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_IDENTITY_INDEX).execute(&self.pool).await?;
        tracing::info!("Applications schema ready");
        Ok(())
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}
