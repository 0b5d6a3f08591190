// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL log, audit and metrics repositories. All three tables are
//! append-only from business code.

use super::postgres::db_err;
use crate::domain::log::{AuditEntry, LogStream, MetricsSample, WorkloadLogEntry};
use crate::domain::repository::{
    AuditLogRepository, MetricsRepository, RepositoryError, WorkloadLogRepository,
};
use crate::domain::workload::WorkloadId;
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

pub struct PostgresWorkloadLogRepository {
    pool: PgPool,
}

impl PostgresWorkloadLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn stream_str(stream: LogStream) -> &'static str {
    match stream {
        LogStream::Stdout => "stdout",
        LogStream::Stderr => "stderr",
        LogStream::System => "system",
    }
}

fn parse_stream(s: &str) -> LogStream {
    match s {
        "stdout" => LogStream::Stdout,
        "stderr" => LogStream::Stderr,
        _ => LogStream::System,
    }
}

#[async_trait]
impl WorkloadLogRepository for PostgresWorkloadLogRepository {
    async fn append_batch(&self, entries: Vec<WorkloadLogEntry>) -> Result<(), RepositoryError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for entry in &entries {
            sqlx::query(
                "INSERT INTO workload_logs (workload_id, stream, line, at) VALUES ($1, $2, $3, $4)",
            )
            .bind(entry.workload_id.0)
            .bind(stream_str(entry.stream))
            .bind(&entry.line)
            .bind(entry.at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_recent(
        &self,
        workload: WorkloadId,
        limit: usize,
    ) -> Result<Vec<WorkloadLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT workload_id, stream, line, at
            FROM workload_logs
            WHERE workload_id = $1
            ORDER BY at DESC
            LIMIT $2
            "#,
        )
        .bind(workload.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut entries: Vec<WorkloadLogEntry> = rows
            .iter()
            .map(|row| WorkloadLogEntry {
                workload_id: WorkloadId(row.get("workload_id")),
                stream: parse_stream(row.get("stream")),
                line: row.get("line"),
                at: row.get("at"),
            })
            .collect();
        entries.reverse();
        Ok(entries)
    }
}

pub struct PostgresAuditLogRepository {
    pool: PgPool,
}

impl PostgresAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogRepository for PostgresAuditLogRepository {
    async fn append(&self, entry: AuditEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (actor, action, resource, resource_id, details, at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.resource)
        .bind(&entry.resource_id)
        .bind(&entry.details)
        .bind(entry.at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

pub struct PostgresMetricsRepository {
    pool: PgPool,
}

impl PostgresMetricsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsRepository for PostgresMetricsRepository {
    async fn append_batch(&self, samples: Vec<MetricsSample>) -> Result<(), RepositoryError> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for sample in &samples {
            sqlx::query(
                r#"
                INSERT INTO workload_metrics (workload_id, cpu_percent, memory_mb, disk_mb, at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(sample.workload_id.0)
            .bind(sample.cpu_percent)
            .bind(sample.memory_mb as i64)
            .bind(sample.disk_mb as i64)
            .bind(sample.at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn latest(
        &self,
        workload: WorkloadId,
    ) -> Result<Option<MetricsSample>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT workload_id, cpu_percent, memory_mb, disk_mb, at
            FROM workload_metrics
            WHERE workload_id = $1
            ORDER BY at DESC
            LIMIT 1
            "#,
        )
        .bind(workload.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|row| MetricsSample {
            workload_id: WorkloadId(row.get("workload_id")),
            cpu_percent: row.get("cpu_percent"),
            memory_mb: row.get::<i64, _>("memory_mb") as u64,
            disk_mb: row.get::<i64, _>("disk_mb") as u64,
            at: row.get("at"),
        }))
    }
}
