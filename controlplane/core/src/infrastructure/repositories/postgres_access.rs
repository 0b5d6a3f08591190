// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use super::postgres::db_err;
use crate::domain::access::{PrincipalId, Role, WorkloadAccess};
use crate::domain::repository::{AccessRepository, RepositoryError};
use crate::domain::workload::WorkloadId;
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

pub struct PostgresAccessRepository {
    pool: PgPool,
}

impl PostgresAccessRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_permissions(value: serde_json::Value) -> Result<Vec<String>, RepositoryError> {
    serde_json::from_value(value).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

fn decode_grant(row: &sqlx::postgres::PgRow) -> Result<WorkloadAccess, RepositoryError> {
    Ok(WorkloadAccess {
        principal: PrincipalId(row.get("principal_id")),
        workload: WorkloadId(row.get("workload_id")),
        permissions: decode_permissions(row.get("permissions"))?,
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl AccessRepository for PostgresAccessRepository {
    async fn grant_for(
        &self,
        principal: PrincipalId,
        workload: WorkloadId,
    ) -> Result<Option<WorkloadAccess>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM workload_access WHERE principal_id = $1 AND workload_id = $2",
        )
        .bind(principal.0)
        .bind(workload.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(decode_grant).transpose()
    }

    async fn list_for_workload(
        &self,
        workload: WorkloadId,
    ) -> Result<Vec<WorkloadAccess>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workload_access WHERE workload_id = $1 ORDER BY created_at",
        )
        .bind(workload.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(decode_grant).collect()
    }

    async fn upsert_grant(&self, grant: WorkloadAccess) -> Result<(), RepositoryError> {
        let permissions = serde_json::to_value(&grant.permissions)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO workload_access (principal_id, workload_id, permissions, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (principal_id, workload_id)
                DO UPDATE SET permissions = EXCLUDED.permissions
            "#,
        )
        .bind(grant.principal.0)
        .bind(grant.workload.0)
        .bind(permissions)
        .bind(grant.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_grants_for_workload(
        &self,
        workload: WorkloadId,
    ) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM workload_access WHERE workload_id = $1")
            .bind(workload.0)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn roles_for(&self, principal: PrincipalId) -> Result<Vec<Role>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.name, r.permissions
            FROM roles r
            JOIN principal_roles pr ON pr.role_id = r.id
            WHERE pr.principal_id = $1
            ORDER BY r.id
            "#,
        )
        .bind(principal.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                Ok(Role {
                    id: row.get("id"),
                    name: row.get("name"),
                    permissions: decode_permissions(row.get("permissions"))?,
                })
            })
            .collect()
    }
}
