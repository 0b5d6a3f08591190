// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Persistence contracts, one repository per aggregate root.
//!
//! Implementations must execute each method atomically. Methods documented
//! as transactional additionally guarantee that a concurrent caller cannot
//! observe or produce a lost update (the PostgreSQL backend takes row locks,
//! the in-memory backend holds its map lock across the mutation).

use crate::domain::access::{PrincipalId, Role, WorkloadAccess};
use crate::domain::backup::Backup;
use crate::domain::ip_pool::IpPool;
use crate::domain::log::{AuditEntry, MetricsSample, WorkloadLogEntry};
use crate::domain::node::{Node, NodeId};
use crate::domain::template::{Template, TemplateId};
use crate::domain::workload::{Workload, WorkloadId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("row not found: {0}")]
    NotFound(String),

    /// The persistence connection is gone. The process rejects new mutating
    /// requests until recovery.
    #[error("persistence unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait WorkloadRepository: Send + Sync {
    /// Insert with a repository-assigned id; returns the stored row.
    async fn insert(&self, workload: Workload) -> Result<Workload, RepositoryError>;

    async fn update(&self, workload: &Workload) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: WorkloadId) -> Result<Option<Workload>, RepositoryError>;

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Workload>, RepositoryError>;

    async fn list_by_node(&self, node: NodeId) -> Result<Vec<Workload>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Workload>, RepositoryError>;

    async fn delete(&self, id: WorkloadId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn insert(&self, node: Node) -> Result<Node, RepositoryError>;

    async fn update(&self, node: &Node) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: NodeId) -> Result<Option<Node>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Node>, RepositoryError>;

    async fn set_online(
        &self,
        id: NodeId,
        online: bool,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn insert(&self, template: Template) -> Result<Template, RepositoryError>;

    async fn update(&self, template: &Template) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: TemplateId) -> Result<Option<Template>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Template>, RepositoryError>;

    async fn delete(&self, id: TemplateId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AccessRepository: Send + Sync {
    /// The grant row for (principal, workload), if any.
    async fn grant_for(
        &self,
        principal: PrincipalId,
        workload: WorkloadId,
    ) -> Result<Option<WorkloadAccess>, RepositoryError>;

    async fn list_for_workload(
        &self,
        workload: WorkloadId,
    ) -> Result<Vec<WorkloadAccess>, RepositoryError>;

    async fn upsert_grant(&self, grant: WorkloadAccess) -> Result<(), RepositoryError>;

    async fn delete_grants_for_workload(&self, workload: WorkloadId)
        -> Result<(), RepositoryError>;

    /// Every role the principal holds.
    async fn roles_for(&self, principal: PrincipalId) -> Result<Vec<Role>, RepositoryError>;
}

#[async_trait]
pub trait IpPoolRepository: Send + Sync {
    async fn find_pool(
        &self,
        node: NodeId,
        network_name: &str,
    ) -> Result<Option<IpPool>, RepositoryError>;

    /// Persist pool membership and assignments. Transactional.
    async fn update_pool(&self, pool: &IpPool) -> Result<(), RepositoryError>;

    async fn insert_pool(&self, pool: IpPool) -> Result<IpPool, RepositoryError>;

    /// Release every address held by the workload across all pools.
    /// Idempotent; returns the freed addresses. Transactional.
    async fn release_for(&self, workload: WorkloadId) -> Result<Vec<IpAddr>, RepositoryError>;
}

#[async_trait]
pub trait WorkloadLogRepository: Send + Sync {
    /// Append entries in one write. Batched by the caller.
    async fn append_batch(&self, entries: Vec<WorkloadLogEntry>) -> Result<(), RepositoryError>;

    async fn list_recent(
        &self,
        workload: WorkloadId,
        limit: usize,
    ) -> Result<Vec<WorkloadLogEntry>, RepositoryError>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MetricsRepository: Send + Sync {
    async fn append_batch(&self, samples: Vec<MetricsSample>) -> Result<(), RepositoryError>;

    async fn latest(&self, workload: WorkloadId)
        -> Result<Option<MetricsSample>, RepositoryError>;
}

#[async_trait]
pub trait BackupRepository: Send + Sync {
    async fn insert(&self, backup: Backup) -> Result<Backup, RepositoryError>;

    async fn update(&self, backup: &Backup) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Backup>, RepositoryError>;

    async fn list_for_workload(
        &self,
        workload: WorkloadId,
    ) -> Result<Vec<Backup>, RepositoryError>;
}

/// Session-store contract owned by the out-of-scope auth layer. The SFTP
/// surface validates the password-field token through this.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Resolve an opaque session token to its principal, or `None` when the
    /// token is unknown or expired.
    async fn resolve_token(&self, token: &str)
        -> Result<Option<PrincipalId>, RepositoryError>;
}
