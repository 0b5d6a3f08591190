// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL `IpPoolRepository`. Release runs in a transaction with the
//! pool rows locked `FOR UPDATE` so concurrent allocation cannot lose an
//! assignment.

use super::postgres::db_err;
use crate::domain::ip_pool::IpPool;
use crate::domain::node::NodeId;
use crate::domain::repository::{IpPoolRepository, RepositoryError};
use crate::domain::workload::WorkloadId;
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::net::IpAddr;

pub struct PostgresIpPoolRepository {
    pool: PgPool,
}

impl PostgresIpPoolRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<IpPool, RepositoryError> {
    let addresses: serde_json::Value = row.get("addresses");
    let assignments: serde_json::Value = row.get("assignments");
    Ok(IpPool {
        id: row.get("id"),
        node_id: NodeId(row.get("node_id")),
        network_name: row.get("network_name"),
        addresses: serde_json::from_value(addresses)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
        assignments: serde_json::from_value(assignments)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
    })
}

#[async_trait]
impl IpPoolRepository for PostgresIpPoolRepository {
    async fn find_pool(
        &self,
        node: NodeId,
        network_name: &str,
    ) -> Result<Option<IpPool>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM ip_pools WHERE node_id = $1 AND network_name = $2",
        )
        .bind(node.0)
        .bind(network_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(decode).transpose()
    }

    async fn update_pool(&self, pool: &IpPool) -> Result<(), RepositoryError> {
        let addresses = serde_json::to_value(&pool.addresses)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let assignments = serde_json::to_value(&pool.assignments)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let result = sqlx::query(
            "UPDATE ip_pools SET addresses = $1, assignments = $2 WHERE id = $3",
        )
        .bind(addresses)
        .bind(assignments)
        .bind(pool.id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("ip pool {}", pool.id)));
        }
        Ok(())
    }

    async fn insert_pool(&self, mut pool: IpPool) -> Result<IpPool, RepositoryError> {
        let addresses = serde_json::to_value(&pool.addresses)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let assignments = serde_json::to_value(&pool.assignments)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let row = sqlx::query(
            r#"
            INSERT INTO ip_pools (node_id, network_name, addresses, assignments)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(pool.node_id.0)
        .bind(&pool.network_name)
        .bind(addresses)
        .bind(assignments)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        pool.id = row.get("id");
        Ok(pool)
    }

    async fn release_for(&self, workload: WorkloadId) -> Result<Vec<IpAddr>, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let rows = sqlx::query("SELECT * FROM ip_pools FOR UPDATE")
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;

        let mut freed = Vec::new();
        for row in &rows {
            let mut pool = decode(row)?;
            let held: Vec<IpAddr> = pool
                .assignments
                .iter()
                .filter(|(_, holder)| **holder == workload)
                .map(|(addr, _)| *addr)
                .collect();
            if held.is_empty() {
                continue;
            }
            pool.release_for(workload);
            let assignments = serde_json::to_value(&pool.assignments)
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
            sqlx::query("UPDATE ip_pools SET assignments = $1 WHERE id = $2")
                .bind(assignments)
                .bind(pool.id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            freed.extend(held);
        }

        tx.commit().await.map_err(db_err)?;
        Ok(freed)
    }
}
