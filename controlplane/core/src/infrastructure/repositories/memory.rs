// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory repository backend for development and tests.
//!
//! Each method holds its map lock across the whole mutation, which gives
//! the per-call atomicity the contracts require.

use crate::domain::access::{PrincipalId, Role, WorkloadAccess};
use crate::domain::backup::Backup;
use crate::domain::ip_pool::IpPool;
use crate::domain::log::{AuditEntry, MetricsSample, WorkloadLogEntry};
use crate::domain::node::{Node, NodeId};
use crate::domain::repository::{
    AccessRepository, AuditLogRepository, BackupRepository, IpPoolRepository, MetricsRepository,
    NodeRepository, RepositoryError, SessionStore, TemplateRepository, WorkloadLogRepository,
    WorkloadRepository,
};
use crate::domain::template::{Template, TemplateId};
use crate::domain::workload::{Workload, WorkloadId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryWorkloadRepository {
    rows: RwLock<HashMap<WorkloadId, Workload>>,
    next_id: AtomicI64,
}

#[async_trait]
impl WorkloadRepository for InMemoryWorkloadRepository {
    async fn insert(&self, mut workload: Workload) -> Result<Workload, RepositoryError> {
        let id = WorkloadId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        workload.id = id;
        self.rows.write().insert(id, workload.clone());
        Ok(workload)
    }

    async fn update(&self, workload: &Workload) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write();
        if !rows.contains_key(&workload.id) {
            return Err(RepositoryError::NotFound(format!("workload {}", workload.id)));
        }
        rows.insert(workload.id, workload.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: WorkloadId) -> Result<Option<Workload>, RepositoryError> {
        Ok(self.rows.read().get(&id).cloned())
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Workload>, RepositoryError> {
        Ok(self.rows.read().values().find(|w| w.uuid == uuid).cloned())
    }

    async fn list_by_node(&self, node: NodeId) -> Result<Vec<Workload>, RepositoryError> {
        Ok(self.rows.read().values().filter(|w| w.node_id == node).cloned().collect())
    }

    async fn list_all(&self) -> Result<Vec<Workload>, RepositoryError> {
        let mut all: Vec<Workload> = self.rows.read().values().cloned().collect();
        all.sort_by_key(|w| w.id);
        Ok(all)
    }

    async fn delete(&self, id: WorkloadId) -> Result<(), RepositoryError> {
        self.rows.write().remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryNodeRepository {
    rows: RwLock<HashMap<NodeId, Node>>,
    next_id: AtomicI64,
}

#[async_trait]
impl NodeRepository for InMemoryNodeRepository {
    async fn insert(&self, mut node: Node) -> Result<Node, RepositoryError> {
        if node.id.0 == 0 {
            node.id = NodeId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        } else {
            self.next_id.fetch_max(node.id.0, Ordering::SeqCst);
        }
        self.rows.write().insert(node.id, node.clone());
        Ok(node)
    }

    async fn update(&self, node: &Node) -> Result<(), RepositoryError> {
        self.rows.write().insert(node.id, node.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: NodeId) -> Result<Option<Node>, RepositoryError> {
        Ok(self.rows.read().get(&id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Node>, RepositoryError> {
        let mut all: Vec<Node> = self.rows.read().values().cloned().collect();
        all.sort_by_key(|n| n.id);
        Ok(all)
    }

    async fn set_online(
        &self,
        id: NodeId,
        online: bool,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write();
        let node = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("node {id}")))?;
        node.online = online;
        if last_seen_at.is_some() {
            node.last_seen_at = last_seen_at;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTemplateRepository {
    rows: RwLock<HashMap<TemplateId, Template>>,
    next_id: AtomicI64,
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn insert(&self, mut template: Template) -> Result<Template, RepositoryError> {
        if template.id.0 == 0 {
            template.id = TemplateId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        } else {
            self.next_id.fetch_max(template.id.0, Ordering::SeqCst);
        }
        self.rows.write().insert(template.id, template.clone());
        Ok(template)
    }

    async fn update(&self, template: &Template) -> Result<(), RepositoryError> {
        self.rows.write().insert(template.id, template.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: TemplateId) -> Result<Option<Template>, RepositoryError> {
        Ok(self.rows.read().get(&id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Template>, RepositoryError> {
        let mut all: Vec<Template> = self.rows.read().values().cloned().collect();
        all.sort_by_key(|t| t.id);
        Ok(all)
    }

    async fn delete(&self, id: TemplateId) -> Result<(), RepositoryError> {
        self.rows.write().remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAccessRepository {
    grants: RwLock<Vec<WorkloadAccess>>,
    roles: RwLock<HashMap<PrincipalId, Vec<Role>>>,
}

impl InMemoryAccessRepository {
    pub fn grant_role(&self, principal: PrincipalId, role: Role) {
        self.roles.write().entry(principal).or_default().push(role);
    }
}

#[async_trait]
impl AccessRepository for InMemoryAccessRepository {
    async fn grant_for(
        &self,
        principal: PrincipalId,
        workload: WorkloadId,
    ) -> Result<Option<WorkloadAccess>, RepositoryError> {
        Ok(self
            .grants
            .read()
            .iter()
            .find(|g| g.principal == principal && g.workload == workload)
            .cloned())
    }

    async fn list_for_workload(
        &self,
        workload: WorkloadId,
    ) -> Result<Vec<WorkloadAccess>, RepositoryError> {
        Ok(self.grants.read().iter().filter(|g| g.workload == workload).cloned().collect())
    }

    async fn upsert_grant(&self, grant: WorkloadAccess) -> Result<(), RepositoryError> {
        let mut grants = self.grants.write();
        if let Some(existing) = grants
            .iter_mut()
            .find(|g| g.principal == grant.principal && g.workload == grant.workload)
        {
            existing.permissions = grant.permissions;
        } else {
            grants.push(grant);
        }
        Ok(())
    }

    async fn delete_grants_for_workload(
        &self,
        workload: WorkloadId,
    ) -> Result<(), RepositoryError> {
        self.grants.write().retain(|g| g.workload != workload);
        Ok(())
    }

    async fn roles_for(&self, principal: PrincipalId) -> Result<Vec<Role>, RepositoryError> {
        Ok(self.roles.read().get(&principal).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryIpPoolRepository {
    pools: RwLock<Vec<IpPool>>,
    next_id: AtomicI64,
}

#[async_trait]
impl IpPoolRepository for InMemoryIpPoolRepository {
    async fn find_pool(
        &self,
        node: NodeId,
        network_name: &str,
    ) -> Result<Option<IpPool>, RepositoryError> {
        Ok(self
            .pools
            .read()
            .iter()
            .find(|p| p.node_id == node && p.network_name == network_name)
            .cloned())
    }

    async fn update_pool(&self, pool: &IpPool) -> Result<(), RepositoryError> {
        let mut pools = self.pools.write();
        match pools.iter_mut().find(|p| p.id == pool.id) {
            Some(existing) => {
                *existing = pool.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("ip pool {}", pool.id))),
        }
    }

    async fn insert_pool(&self, mut pool: IpPool) -> Result<IpPool, RepositoryError> {
        if pool.id == 0 {
            pool.id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        }
        self.pools.write().push(pool.clone());
        Ok(pool)
    }

    async fn release_for(&self, workload: WorkloadId) -> Result<Vec<IpAddr>, RepositoryError> {
        let mut freed = Vec::new();
        for pool in self.pools.write().iter_mut() {
            let held: Vec<IpAddr> = pool
                .assignments
                .iter()
                .filter(|(_, holder)| **holder == workload)
                .map(|(addr, _)| *addr)
                .collect();
            pool.release_for(workload);
            freed.extend(held);
        }
        Ok(freed)
    }
}

#[derive(Default)]
pub struct InMemoryWorkloadLogRepository {
    entries: RwLock<Vec<WorkloadLogEntry>>,
}

impl InMemoryWorkloadLogRepository {
    pub fn lines_for(&self, workload: WorkloadId) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.workload_id == workload)
            .map(|e| e.line.clone())
            .collect()
    }
}

#[async_trait]
impl WorkloadLogRepository for InMemoryWorkloadLogRepository {
    async fn append_batch(&self, mut batch: Vec<WorkloadLogEntry>) -> Result<(), RepositoryError> {
        self.entries.write().append(&mut batch);
        Ok(())
    }

    async fn list_recent(
        &self,
        workload: WorkloadId,
        limit: usize,
    ) -> Result<Vec<WorkloadLogEntry>, RepositoryError> {
        let entries = self.entries.read();
        let mut recent: Vec<WorkloadLogEntry> =
            entries.iter().filter(|e| e.workload_id == workload).cloned().collect();
        let skip = recent.len().saturating_sub(limit);
        Ok(recent.split_off(skip))
    }
}

#[derive(Default)]
pub struct InMemoryAuditLogRepository {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditLogRepository {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl AuditLogRepository for InMemoryAuditLogRepository {
    async fn append(&self, entry: AuditEntry) -> Result<(), RepositoryError> {
        self.entries.write().push(entry);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMetricsRepository {
    samples: RwLock<Vec<MetricsSample>>,
}

#[async_trait]
impl MetricsRepository for InMemoryMetricsRepository {
    async fn append_batch(&self, mut batch: Vec<MetricsSample>) -> Result<(), RepositoryError> {
        self.samples.write().append(&mut batch);
        Ok(())
    }

    async fn latest(
        &self,
        workload: WorkloadId,
    ) -> Result<Option<MetricsSample>, RepositoryError> {
        Ok(self
            .samples
            .read()
            .iter()
            .filter(|s| s.workload_id == workload)
            .max_by_key(|s| s.at)
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryBackupRepository {
    rows: RwLock<HashMap<i64, Backup>>,
    next_id: AtomicI64,
}

#[async_trait]
impl BackupRepository for InMemoryBackupRepository {
    async fn insert(&self, mut backup: Backup) -> Result<Backup, RepositoryError> {
        if backup.id == 0 {
            backup.id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        }
        self.rows.write().insert(backup.id, backup.clone());
        Ok(backup)
    }

    async fn update(&self, backup: &Backup) -> Result<(), RepositoryError> {
        self.rows.write().insert(backup.id, backup.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Backup>, RepositoryError> {
        Ok(self.rows.read().get(&id).cloned())
    }

    async fn list_for_workload(
        &self,
        workload: WorkloadId,
    ) -> Result<Vec<Backup>, RepositoryError> {
        let mut rows: Vec<Backup> =
            self.rows.read().values().filter(|b| b.workload_id == workload).cloned().collect();
        rows.sort_by_key(|b| b.id);
        Ok(rows)
    }
}

/// Token -> principal map; the real session store lives in the auth layer.
#[derive(Default)]
pub struct InMemorySessionStore {
    tokens: RwLock<HashMap<String, PrincipalId>>,
}

impl InMemorySessionStore {
    pub fn issue(&self, token: impl Into<String>, principal: PrincipalId) {
        self.tokens.write().insert(token.into(), principal);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn resolve_token(
        &self,
        token: &str,
    ) -> Result<Option<PrincipalId>, RepositoryError> {
        Ok(self.tokens.read().get(token).copied())
    }
}
