// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Application Repository
//!
//! `applications` table keyed by `(applied_at, email)` with an index on
//! `identity`. See `infrastructure::db` for the schema.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `ApplicationRepository` on PostgreSQL

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::application::ApplicationRecord;
use crate::domain::identity::Identity;
use crate::domain::repository::{ApplicationRepository, RepositoryError};

const SELECT_COLUMNS: &str =
    "SELECT identity, applied_at, email, name, role_applied, offer_given, rejected FROM applications";

pub struct PostgresApplicationRepository {
    pool: PgPool,
}

impl PostgresApplicationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApplicationRepository for PostgresApplicationRepository {
    async fn find_latest(&self, identity: &Identity) -> Result<Option<ApplicationRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{} WHERE identity = $1 ORDER BY applied_at DESC LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(identity.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(parse_application_row).transpose()
    }

    async fn find_all(&self, identity: &Identity) -> Result<Vec<ApplicationRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{} WHERE identity = $1 ORDER BY applied_at ASC",
            SELECT_COLUMNS
        ))
        .bind(identity.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_application_row).collect()
    }

    async fn save(&self, record: &ApplicationRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO applications (
                applied_at, email, identity, name, role_applied, offer_given, rejected
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (applied_at, email) DO UPDATE SET
                identity = EXCLUDED.identity,
                name = EXCLUDED.name,
                role_applied = EXCLUDED.role_applied
            -- offer_given / rejected are owned by the review process
            "#,
        )
        .bind(record.applied_at)
        .bind(&record.email)
        .bind(record.identity.as_str())
        .bind(&record.name)
        .bind(&record.role_applied)
        .bind(record.offer_given)
        .bind(record.rejected)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save application: {}", e)))?;

        Ok(())
    }

    async fn recreate(&self, record: &ApplicationRecord, previous_email: &str) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(
            r#"
            DELETE FROM applications
            WHERE applied_at = $1 AND email = $2
            RETURNING offer_given, rejected
            "#,
        )
        .bind(record.applied_at)
        .bind(previous_email)
        .fetch_optional(&mut *tx)
        .await?;

        // Dropping `tx` without commit rolls the delete back.
        let Some(removed) = removed else {
            return Err(RepositoryError::NotFound(format!(
                "application ({}, {})",
                record.applied_at, previous_email
            )));
        };
        let offer_given: bool = removed.try_get("offer_given")?;
        let rejected: bool = removed.try_get("rejected")?;

        sqlx::query(
            r#"
            INSERT INTO applications (
                applied_at, email, identity, name, role_applied, offer_given, rejected
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.applied_at)
        .bind(&record.email)
        .bind(record.identity.as_str())
        .bind(&record.name)
        .bind(&record.role_applied)
        .bind(offer_given)
        .bind(rejected)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn parse_application_row(row: PgRow) -> Result<ApplicationRecord, RepositoryError> {
    let identity: String = row.try_get("identity")?;
    Ok(ApplicationRecord {
        identity: Identity::parse(identity)?,
        applied_at: row.try_get("applied_at")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        role_applied: row.try_get("role_applied")?,
        offer_given: row.try_get("offer_given")?,
        rejected: row.try_get("rejected")?,
    })
}
