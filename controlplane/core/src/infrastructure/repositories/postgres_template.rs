// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use super::postgres::db_err;
use crate::domain::repository::{RepositoryError, TemplateRepository};
use crate::domain::template::{Template, TemplateId};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

pub struct PostgresTemplateRepository {
    pool: PgPool,
}

impl PostgresTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<Template, RepositoryError> {
    let data: serde_json::Value = row.get("data");
    serde_json::from_value(data).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

#[async_trait]
impl TemplateRepository for PostgresTemplateRepository {
    async fn insert(&self, mut template: Template) -> Result<Template, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query("INSERT INTO templates (data) VALUES ('{}'::jsonb) RETURNING id")
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        template.id = TemplateId(row.get::<i64, _>("id"));

        let data = serde_json::to_value(&template)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        sqlx::query("UPDATE templates SET data = $1 WHERE id = $2")
            .bind(data)
            .bind(template.id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(template)
    }

    async fn update(&self, template: &Template) -> Result<(), RepositoryError> {
        let data = serde_json::to_value(template)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        sqlx::query("UPDATE templates SET data = $1 WHERE id = $2")
            .bind(data)
            .bind(template.id.0)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: TemplateId) -> Result<Option<Template>, RepositoryError> {
        let row = sqlx::query("SELECT data FROM templates WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Template>, RepositoryError> {
        let rows = sqlx::query("SELECT data FROM templates ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(decode).collect()
    }

    async fn delete(&self, id: TemplateId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM templates WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
