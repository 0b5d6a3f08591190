// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use super::postgres::db_err;
use crate::domain::node::{Node, NodeId};
use crate::domain::repository::{NodeRepository, RepositoryError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

pub struct PostgresNodeRepository {
    pool: PgPool,
}

impl PostgresNodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode(row: &sqlx::postgres::PgRow) -> Node {
    Node {
        id: NodeId(row.get("id")),
        name: row.get("name"),
        address: row.get("address"),
        max_memory_mb: row.get::<i64, _>("max_memory_mb") as u64,
        max_cpu_cores: row.get::<i32, _>("max_cpu_cores") as u32,
        online: row.get("online"),
        last_seen_at: row.get("last_seen_at"),
        agent_key: row.get("agent_key"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl NodeRepository for PostgresNodeRepository {
    async fn insert(&self, mut node: Node) -> Result<Node, RepositoryError> {
        let row = sqlx::query(
            r#"
            INSERT INTO nodes (
                name, address, max_memory_mb, max_cpu_cores, online,
                last_seen_at, agent_key, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&node.name)
        .bind(&node.address)
        .bind(node.max_memory_mb as i64)
        .bind(node.max_cpu_cores as i32)
        .bind(node.online)
        .bind(node.last_seen_at)
        .bind(&node.agent_key)
        .bind(node.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        node.id = NodeId(row.get("id"));
        Ok(node)
    }

    async fn update(&self, node: &Node) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE nodes
            SET name = $1, address = $2, max_memory_mb = $3, max_cpu_cores = $4,
                online = $5, last_seen_at = $6, agent_key = $7
            WHERE id = $8
            "#,
        )
        .bind(&node.name)
        .bind(&node.address)
        .bind(node.max_memory_mb as i64)
        .bind(node.max_cpu_cores as i32)
        .bind(node.online)
        .bind(node.last_seen_at)
        .bind(&node.agent_key)
        .bind(node.id.0)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: NodeId) -> Result<Option<Node>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(decode))
    }

    async fn list_all(&self) -> Result<Vec<Node>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM nodes ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(decode).collect())
    }

    async fn set_online(
        &self,
        id: NodeId,
        online: bool,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE nodes SET online = $1, last_seen_at = COALESCE($2, last_seen_at) WHERE id = $3",
        )
        .bind(online)
        .bind(last_seen_at)
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
