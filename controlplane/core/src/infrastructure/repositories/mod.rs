// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository backends: in-memory for development and tests, PostgreSQL
//! for production.

pub mod memory;
pub mod postgres;
pub mod postgres_access;
pub mod postgres_backup;
pub mod postgres_ip_pool;
pub mod postgres_logs;
pub mod postgres_node;
pub mod postgres_template;
pub mod postgres_workload;

use crate::domain::repository::{
    AccessRepository, AuditLogRepository, BackupRepository, IpPoolRepository, MetricsRepository,
    NodeRepository, SessionStore, TemplateRepository, WorkloadLogRepository, WorkloadRepository,
};
use std::sync::Arc;

/// The full set of persistence handles the services are wired with.
#[derive(Clone)]
pub struct RepositoryBundle {
    pub workloads: Arc<dyn WorkloadRepository>,
    pub nodes: Arc<dyn NodeRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub access: Arc<dyn AccessRepository>,
    pub ip_pools: Arc<dyn IpPoolRepository>,
    pub logs: Arc<dyn WorkloadLogRepository>,
    pub audit: Arc<dyn AuditLogRepository>,
    pub metrics: Arc<dyn MetricsRepository>,
    pub backups: Arc<dyn BackupRepository>,
    pub sessions: Arc<dyn SessionStore>,
}

impl RepositoryBundle {
    /// Everything in memory; the default for development and tests.
    pub fn in_memory() -> Self {
        Self {
            workloads: Arc::new(memory::InMemoryWorkloadRepository::default()),
            nodes: Arc::new(memory::InMemoryNodeRepository::default()),
            templates: Arc::new(memory::InMemoryTemplateRepository::default()),
            access: Arc::new(memory::InMemoryAccessRepository::default()),
            ip_pools: Arc::new(memory::InMemoryIpPoolRepository::default()),
            logs: Arc::new(memory::InMemoryWorkloadLogRepository::default()),
            audit: Arc::new(memory::InMemoryAuditLogRepository::default()),
            metrics: Arc::new(memory::InMemoryMetricsRepository::default()),
            backups: Arc::new(memory::InMemoryBackupRepository::default()),
            sessions: Arc::new(memory::InMemorySessionStore::default()),
        }
    }

    /// All repositories backed by one PostgreSQL pool.
    pub fn postgres(db: &crate::infrastructure::db::Database) -> Self {
        let pool = db.pool().clone();
        Self {
            workloads: Arc::new(postgres_workload::PostgresWorkloadRepository::new(pool.clone())),
            nodes: Arc::new(postgres_node::PostgresNodeRepository::new(pool.clone())),
            templates: Arc::new(postgres_template::PostgresTemplateRepository::new(pool.clone())),
            access: Arc::new(postgres_access::PostgresAccessRepository::new(pool.clone())),
            ip_pools: Arc::new(postgres_ip_pool::PostgresIpPoolRepository::new(pool.clone())),
            logs: Arc::new(postgres_logs::PostgresWorkloadLogRepository::new(pool.clone())),
            audit: Arc::new(postgres_logs::PostgresAuditLogRepository::new(pool.clone())),
            metrics: Arc::new(postgres_logs::PostgresMetricsRepository::new(pool.clone())),
            backups: Arc::new(postgres_backup::PostgresBackupRepository::new(pool.clone())),
            sessions: Arc::new(postgres::PostgresSessionStore::new(pool)),
        }
    }
}
