// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL `WorkloadRepository`: the aggregate lives in a JSONB column
//! next to the columns the queries filter on.

use crate::domain::node::NodeId;
use crate::domain::repository::{RepositoryError, WorkloadRepository};
use crate::domain::workload::{Workload, WorkloadId};
use super::postgres::db_err;
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

pub struct PostgresWorkloadRepository {
    pool: PgPool,
}

impl PostgresWorkloadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<Workload, RepositoryError> {
    let data: serde_json::Value = row.get("data");
    serde_json::from_value(data).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

#[async_trait]
impl WorkloadRepository for PostgresWorkloadRepository {
    async fn insert(&self, mut workload: Workload) -> Result<Workload, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(
            r#"
            INSERT INTO workloads (uuid, node_id, status, data, created_at, updated_at)
            VALUES ($1, $2, $3, '{}'::jsonb, $4, $5)
            RETURNING id
            "#,
        )
        .bind(workload.uuid)
        .bind(workload.node_id.0)
        .bind(workload.status.as_str())
        .bind(workload.created_at)
        .bind(workload.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        workload.id = WorkloadId(row.get::<i64, _>("id"));
        let data = serde_json::to_value(&workload)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        sqlx::query("UPDATE workloads SET data = $1 WHERE id = $2")
            .bind(data)
            .bind(workload.id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(workload)
    }

    async fn update(&self, workload: &Workload) -> Result<(), RepositoryError> {
        let data = serde_json::to_value(workload)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let result = sqlx::query(
            r#"
            UPDATE workloads
            SET node_id = $1, status = $2, data = $3, updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(workload.node_id.0)
        .bind(workload.status.as_str())
        .bind(data)
        .bind(workload.updated_at)
        .bind(workload.id.0)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("workload {}", workload.id)));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: WorkloadId) -> Result<Option<Workload>, RepositoryError> {
        let row = sqlx::query("SELECT data FROM workloads WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode).transpose()
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Workload>, RepositoryError> {
        let row = sqlx::query("SELECT data FROM workloads WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode).transpose()
    }

    async fn list_by_node(&self, node: NodeId) -> Result<Vec<Workload>, RepositoryError> {
        let rows = sqlx::query("SELECT data FROM workloads WHERE node_id = $1 ORDER BY id")
            .bind(node.0)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(decode).collect()
    }

    async fn list_all(&self) -> Result<Vec<Workload>, RepositoryError> {
        let rows = sqlx::query("SELECT data FROM workloads ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(decode).collect()
    }

    async fn delete(&self, id: WorkloadId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM workloads WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
