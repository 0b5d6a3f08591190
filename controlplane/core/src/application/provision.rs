// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workload provisioning: create, update, delete.
//!
//! Create runs as one logical transaction: admission check, row insert, IP
//! allocation (IPAM modes) and the owner's default grants either all land
//! or are rolled back. Update enforces the stopped-only rule for resource
//! and binding mutations. Delete releases the IP before the row goes away.

use crate::application::access::{AccessEvaluator, SuspensionGate};
use crate::application::allocator::ResourceArbiter;
use crate::config::CoreConfig;
use crate::domain::access::{permissions, PrincipalId, WorkloadAccess};
use crate::domain::error::{CoreError, CoreResult};
use crate::domain::gateway::NodeGateway;
use crate::domain::log::AuditEntry;
use crate::domain::repository::{
    AccessRepository, AuditLogRepository, TemplateRepository, WorkloadRepository,
};
use crate::domain::workload::{
    Allocations, BackupMode, NetworkMode, RestartPolicy, Workload, WorkloadId, WorkloadStatus,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::node::NodeId;
use crate::domain::template::TemplateId;

#[derive(Debug, Clone)]
pub struct CreateWorkloadRequest {
    pub name: String,
    pub description: Option<String>,
    pub node_id: NodeId,
    pub template_id: TemplateId,
    pub allocations: Allocations,
    pub network_mode: NetworkMode,
    pub network_name: Option<String>,
    pub primary_port: u16,
    pub port_bindings: BTreeMap<u16, u16>,
    pub requested_ip: Option<IpAddr>,
    pub environment: BTreeMap<String, String>,
    pub restart_policy: RestartPolicy,
    pub max_crash_count: u32,
    pub backup_mode: BackupMode,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateWorkloadRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub allocations: Option<Allocations>,
    pub primary_port: Option<u16>,
    pub port_bindings: Option<BTreeMap<u16, u16>>,
    pub environment: Option<BTreeMap<String, String>>,
    pub restart_policy: Option<RestartPolicy>,
    pub max_crash_count: Option<u32>,
}

impl UpdateWorkloadRequest {
    /// True when the request touches anything the stopped-only rule covers.
    fn changes_resources(&self, current: &Workload) -> bool {
        self.allocations.is_some_and(|a| a != current.allocations)
            || self.primary_port.is_some_and(|p| p != current.primary_port)
            || self.port_bindings.as_ref().is_some_and(|b| *b != current.port_bindings)
    }
}

pub struct WorkloadProvisioningService {
    config: Arc<CoreConfig>,
    arbiter: Arc<ResourceArbiter>,
    workloads: Arc<dyn WorkloadRepository>,
    templates: Arc<dyn TemplateRepository>,
    access_repo: Arc<dyn AccessRepository>,
    audit: Arc<dyn AuditLogRepository>,
    access: Arc<AccessEvaluator>,
    gateway: Arc<dyn NodeGateway>,
}

impl WorkloadProvisioningService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<CoreConfig>,
        arbiter: Arc<ResourceArbiter>,
        workloads: Arc<dyn WorkloadRepository>,
        templates: Arc<dyn TemplateRepository>,
        access_repo: Arc<dyn AccessRepository>,
        audit: Arc<dyn AuditLogRepository>,
        access: Arc<AccessEvaluator>,
        gateway: Arc<dyn NodeGateway>,
    ) -> Self {
        Self { config, arbiter, workloads, templates, access_repo, audit, access, gateway }
    }

    pub async fn create(
        &self,
        principal: PrincipalId,
        request: CreateWorkloadRequest,
    ) -> CoreResult<Workload> {
        if request.name.trim().is_empty() {
            return Err(CoreError::validation("name must not be empty"));
        }
        if request.network_mode.is_ipam() && request.network_name.is_none() {
            return Err(CoreError::validation("network name is required in IPAM modes"));
        }
        self.templates
            .find_by_id(request.template_id)
            .await?
            .ok_or_else(|| CoreError::not_found("template"))?;

        let lock = self.arbiter.node_lock(request.node_id);
        let _guard = lock.lock().await;

        let bindings = self
            .arbiter
            .check_admission(
                request.node_id,
                None,
                request.allocations,
                request.network_mode,
                request.primary_port,
                request.port_bindings.clone(),
            )
            .await?;

        let now = Utc::now();
        let workload = Workload {
            id: WorkloadId(0), // repository-assigned
            uuid: Uuid::new_v4(),
            name: request.name,
            description: request.description,
            owner_id: principal,
            node_id: request.node_id,
            location: None,
            template_id: request.template_id,
            allocations: request.allocations,
            network_mode: request.network_mode,
            network_name: request.network_name.clone(),
            primary_port: request.primary_port,
            port_bindings: bindings,
            primary_ip: None,
            environment: request.environment,
            status: WorkloadStatus::Stopped,
            crash_count: 0,
            last_crash_at: None,
            restart_policy: request.restart_policy,
            max_crash_count: request.max_crash_count,
            backup_mode: request.backup_mode,
            backup_retention_count: 3,
            backup_retention_days: 14,
            suspension: None,
            container_id: None,
            container_name: None,
            created_at: now,
            updated_at: now,
        };

        let mut workload = self.workloads.insert(workload).await?;

        if workload.network_mode.is_ipam() {
            let network = request.network_name.as_deref().unwrap_or_default();
            match self
                .arbiter
                .allocate_ip(workload.node_id, network, workload.id, request.requested_ip)
                .await
            {
                Ok(addr) => {
                    workload.primary_ip = Some(addr);
                    self.workloads.update(&workload).await?;
                }
                Err(e) => {
                    // Roll the insert back so the failed create leaves
                    // nothing behind.
                    let _ = self.workloads.delete(workload.id).await;
                    return Err(e);
                }
            }
        }

        self.write_owner_grants(principal, workload.id).await?;
        self.audit(principal, "create", workload.id).await;
        info!(id = %workload.id, uuid = %workload.uuid, node = %workload.node_id, "workload created");
        Ok(workload)
    }

    pub async fn update(
        &self,
        principal: PrincipalId,
        id: WorkloadId,
        request: UpdateWorkloadRequest,
    ) -> CoreResult<Workload> {
        let mut workload = self
            .workloads
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::not_found("workload"))?;
        self.access
            .check(principal, &workload, permissions::SERVER_UPDATE, SuspensionGate::Mutation)
            .await?;

        let resources_change = request.changes_resources(&workload);
        if resources_change && workload.status != WorkloadStatus::Stopped {
            return Err(CoreError::InvalidState(
                "workload must be stopped to change resources or port bindings".into(),
            ));
        }

        if resources_change {
            let lock = self.arbiter.node_lock(workload.node_id);
            let _guard = lock.lock().await;

            let allocations = request.allocations.unwrap_or(workload.allocations);
            let primary_port = request.primary_port.unwrap_or(workload.primary_port);
            let bindings = request
                .port_bindings
                .clone()
                .unwrap_or_else(|| workload.port_bindings.clone());

            let old_disk = workload.allocations.disk_mb;
            let bindings = self
                .arbiter
                .check_admission(
                    workload.node_id,
                    Some(id),
                    allocations,
                    workload.network_mode,
                    primary_port,
                    bindings,
                )
                .await?;

            workload.allocations = allocations;
            workload.primary_port = primary_port;
            workload.port_bindings = bindings;
            self.apply_plain_fields(&mut workload, &request);
            workload.updated_at = Utc::now();
            self.workloads.update(&workload).await?;

            if allocations.disk_mb != old_disk {
                self.send_resize(&workload).await;
            }
        } else {
            self.apply_plain_fields(&mut workload, &request);
            workload.updated_at = Utc::now();
            self.workloads.update(&workload).await?;
        }

        self.audit(principal, "update", id).await;
        Ok(workload)
    }

    /// Destroy a workload. Only the stopped state qualifies (plus suspended
    /// under the delete policy, which the gate has already evaluated).
    pub async fn delete(&self, principal: PrincipalId, id: WorkloadId) -> CoreResult<()> {
        let workload = self
            .workloads
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::not_found("workload"))?;
        self.access
            .check(principal, &workload, permissions::SERVER_DELETE, SuspensionGate::Delete)
            .await?;

        if !matches!(workload.status, WorkloadStatus::Stopped | WorkloadStatus::Suspended) {
            return Err(CoreError::InvalidState("workload must be stopped to delete".into()));
        }

        self.arbiter.release_ip(id).await?;
        self.access_repo.delete_grants_for_workload(id).await?;
        self.workloads.delete(id).await?;

        let dir = workload.data_dir(&self.config.server_data_root);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(%id, dir = %dir.display(), error = %e, "data directory cleanup failed");
            }
        }

        self.audit(principal, "delete", id).await;
        info!(%id, "workload deleted");
        Ok(())
    }

    fn apply_plain_fields(&self, workload: &mut Workload, request: &UpdateWorkloadRequest) {
        if let Some(name) = &request.name {
            workload.name = name.clone();
        }
        if let Some(description) = &request.description {
            workload.description = Some(description.clone());
        }
        if let Some(env) = &request.environment {
            workload.environment = env.clone();
        }
        if let Some(policy) = request.restart_policy {
            workload.restart_policy = policy;
        }
        if let Some(max) = request.max_crash_count {
            workload.max_crash_count = max;
        }
    }

    /// Disk changes are pushed to the agent when the node is reachable; the
    /// agent re-applies limits on the next start either way.
    async fn send_resize(&self, workload: &Workload) {
        let template = match self.templates.find_by_id(workload.template_id).await {
            Ok(Some(t)) => t,
            _ => return,
        };
        let payload = crate::domain::gateway::CommandPayload {
            server_id: workload.id,
            server_uuid: workload.uuid,
            environment: workload.compose_environment(&template, &self.config.server_data_root),
            template,
            allocations: workload.allocations,
            primary_port: workload.primary_port,
            port_bindings: workload.port_bindings.clone(),
            network_mode: workload.network_mode,
        };
        if let Err(e) = self
            .gateway
            .send(workload.node_id, crate::domain::gateway::AgentCommand::ResizeStorage(payload))
            .await
        {
            warn!(id = %workload.id, error = %e, "resize_storage dispatch failed");
        }
    }

    async fn write_owner_grants(
        &self,
        principal: PrincipalId,
        workload: WorkloadId,
    ) -> CoreResult<()> {
        self.access_repo
            .upsert_grant(WorkloadAccess {
                principal,
                workload,
                permissions: permissions::OWNER_DEFAULTS.iter().map(|s| s.to_string()).collect(),
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    async fn audit(&self, principal: PrincipalId, action: &str, id: WorkloadId) {
        let entry = AuditEntry::new(principal.to_string(), action, "workload", id);
        if let Err(e) = self.audit.append(entry).await {
            warn!(%id, error = %e, "audit append failed");
        }
    }
}
