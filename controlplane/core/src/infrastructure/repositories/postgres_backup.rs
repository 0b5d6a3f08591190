// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use super::postgres::db_err;
use crate::domain::backup::Backup;
use crate::domain::repository::{BackupRepository, RepositoryError};
use crate::domain::workload::{BackupMode, WorkloadId};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

pub struct PostgresBackupRepository {
    pool: PgPool,
}

impl PostgresBackupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn mode_str(mode: BackupMode) -> &'static str {
    match mode {
        BackupMode::Local => "local",
        BackupMode::S3 => "s3",
        BackupMode::Stream => "stream",
    }
}

fn parse_mode(s: &str) -> BackupMode {
    match s {
        "s3" => BackupMode::S3,
        "stream" => BackupMode::Stream,
        _ => BackupMode::Local,
    }
}

fn decode(row: &sqlx::postgres::PgRow) -> Backup {
    Backup {
        id: row.get("id"),
        workload_id: WorkloadId(row.get("workload_id")),
        name: row.get("name"),
        path: row.get("path"),
        mode: parse_mode(row.get("mode")),
        size_mb: row.get::<i64, _>("size_mb") as u64,
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
    }
}

#[async_trait]
impl BackupRepository for PostgresBackupRepository {
    async fn insert(&self, mut backup: Backup) -> Result<Backup, RepositoryError> {
        let row = sqlx::query(
            r#"
            INSERT INTO backups (
                workload_id, name, path, mode, size_mb, metadata, created_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(backup.workload_id.0)
        .bind(&backup.name)
        .bind(&backup.path)
        .bind(mode_str(backup.mode))
        .bind(backup.size_mb as i64)
        .bind(&backup.metadata)
        .bind(backup.created_at)
        .bind(backup.completed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        backup.id = row.get("id");
        Ok(backup)
    }

    async fn update(&self, backup: &Backup) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE backups
            SET path = $1, size_mb = $2, metadata = $3, completed_at = $4
            WHERE id = $5
            "#,
        )
        .bind(&backup.path)
        .bind(backup.size_mb as i64)
        .bind(&backup.metadata)
        .bind(backup.completed_at)
        .bind(backup.id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Backup>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM backups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(decode))
    }

    async fn list_for_workload(
        &self,
        workload: WorkloadId,
    ) -> Result<Vec<Backup>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM backups WHERE workload_id = $1 ORDER BY id")
            .bind(workload.0)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(decode).collect())
    }
}
