// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared PostgreSQL plumbing: error translation and the session-store
//! lookup the SFTP surface authenticates against.

use crate::domain::access::PrincipalId;
use crate::domain::repository::{RepositoryError, SessionStore};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::Row;

/// Connection-level failures surface as `Unavailable` so the HTTP layer can
/// reject mutations until recovery; everything else is a plain database
/// error.
pub(crate) fn db_err(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Unavailable(e.to_string())
        }
        other => RepositoryError::Database(other.to_string()),
    }
}

pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn resolve_token(
        &self,
        token: &str,
    ) -> Result<Option<PrincipalId>, RepositoryError> {
        let row = sqlx::query(
            "SELECT principal_id FROM sessions WHERE token = $1 AND expires_at > $2",
        )
        .bind(token)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|r| PrincipalId(r.get::<i64, _>("principal_id"))))
    }
}
