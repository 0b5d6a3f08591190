// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Transfer coordinator: move a stopped workload between nodes.
//!
//! backup on source -> move bytes -> restore on target -> atomic ownership
//! switch. Backup and restore outcomes are asynchronous agent events; the
//! coordinator correlates on backup id through the event bus under a
//! bounded timeout. On any failure the workload returns to `stopped` on the
//! source node; bytes already copied are left for the administrator.

use crate::application::access::{AccessEvaluator, SuspensionGate};
use crate::application::allocator::ResourceArbiter;
use crate::application::lifecycle::WorkloadLifecycleService;
use crate::config::CoreConfig;
use crate::domain::access::{permissions, PrincipalId};
use crate::domain::backup::Backup;
use crate::domain::error::{CoreError, CoreResult};
use crate::domain::events::{DomainEvent, WorkloadEvent};
use crate::domain::gateway::{AgentCommand, AgentEvent, NodeGateway};
use crate::domain::log::WorkloadLogEntry;
use crate::domain::node::NodeId;
use crate::domain::repository::{
    BackupRepository, NodeRepository, WorkloadLogRepository, WorkloadRepository,
};
use crate::domain::workload::{
    BackupMode, LifecycleAction, Workload, WorkloadId, WorkloadStatus, ENV_NETWORK_IP,
};
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{info, warn};

/// Byte-source contract for moving backup artifacts. The filesystem
/// implementation serves `local`/`stream` modes; the object-storage client
/// behind `s3` is an external collaborator surfaced through this trait.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn open(&self, location: &str) -> CoreResult<Box<dyn AsyncRead + Send + Unpin>>;
}

/// Staging path on the target node an uploaded artifact lands at.
fn staging_path(backup_name: &str) -> String {
    format!("/var/lib/catalyst/staging/{backup_name}.tar.gz")
}

pub struct TransferCoordinator {
    config: Arc<CoreConfig>,
    workloads: Arc<dyn WorkloadRepository>,
    nodes: Arc<dyn NodeRepository>,
    backups: Arc<dyn BackupRepository>,
    logs: Arc<dyn WorkloadLogRepository>,
    arbiter: Arc<ResourceArbiter>,
    access: Arc<AccessEvaluator>,
    gateway: Arc<dyn NodeGateway>,
    lifecycle: Arc<WorkloadLifecycleService>,
    event_bus: EventBus,
    local_store: Arc<dyn BlobStore>,
    object_store: Option<Arc<dyn BlobStore>>,
}

impl TransferCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<CoreConfig>,
        workloads: Arc<dyn WorkloadRepository>,
        nodes: Arc<dyn NodeRepository>,
        backups: Arc<dyn BackupRepository>,
        logs: Arc<dyn WorkloadLogRepository>,
        arbiter: Arc<ResourceArbiter>,
        access: Arc<AccessEvaluator>,
        gateway: Arc<dyn NodeGateway>,
        lifecycle: Arc<WorkloadLifecycleService>,
        event_bus: EventBus,
        local_store: Arc<dyn BlobStore>,
        object_store: Option<Arc<dyn BlobStore>>,
    ) -> Self {
        Self {
            config,
            workloads,
            nodes,
            backups,
            logs,
            arbiter,
            access,
            gateway,
            lifecycle,
            event_bus,
            local_store,
            object_store,
        }
    }

    pub async fn transfer(
        &self,
        principal: PrincipalId,
        id: WorkloadId,
        target_node: NodeId,
        mode: BackupMode,
    ) -> CoreResult<Workload> {
        let workload = self.preflight(principal, id, target_node, mode).await?;
        let source_node = workload.node_id;

        self.mark_transferring(id).await?;
        self.event_bus.publish(DomainEvent::Workload(WorkloadEvent::TransferStarted {
            workload_id: id,
            source: source_node,
            target: target_node,
        }));

        match self.run(&workload, target_node, mode).await {
            Ok(moved) => {
                self.system_log(id, format!("transfer to node {target_node} completed")).await;
                self.event_bus.publish(DomainEvent::Workload(WorkloadEvent::TransferCompleted {
                    workload_id: id,
                    target: target_node,
                }));
                Ok(moved)
            }
            Err(e) => {
                warn!(%id, error = %e, "transfer failed; rolling back to source");
                self.rollback(id).await;
                self.system_log(id, format!("transfer failed: {e}")).await;
                self.event_bus.publish(DomainEvent::Workload(WorkloadEvent::TransferFailed {
                    workload_id: id,
                    reason: e.to_string(),
                }));
                Err(CoreError::TransferFailed(e.to_string()))
            }
        }
    }

    async fn preflight(
        &self,
        principal: PrincipalId,
        id: WorkloadId,
        target_node: NodeId,
        mode: BackupMode,
    ) -> CoreResult<Workload> {
        let workload = self
            .workloads
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::not_found("workload"))?;
        self.access
            .check(principal, &workload, permissions::SERVER_TRANSFER, SuspensionGate::Mutation)
            .await?;

        if !workload.status.permits(LifecycleAction::Transfer) {
            return Err(CoreError::InvalidState(format!(
                "cannot transfer a {} workload",
                workload.status
            )));
        }
        if target_node == workload.node_id {
            return Err(CoreError::validation("target node equals source node"));
        }
        if mode == BackupMode::S3 && self.object_store.is_none() {
            return Err(CoreError::validation("object storage is not configured"));
        }

        let target = self
            .nodes
            .find_by_id(target_node)
            .await?
            .ok_or_else(|| CoreError::not_found("target node"))?;
        if !target.online || !self.gateway.is_online(target_node) {
            return Err(CoreError::NodeUnavailable);
        }

        // Headroom and port arbitration on the target.
        let lock = self.arbiter.node_lock(target_node);
        let _guard = lock.lock().await;
        self.arbiter
            .check_admission(
                target_node,
                None,
                workload.allocations,
                workload.network_mode,
                workload.primary_port,
                workload.port_bindings.clone(),
            )
            .await?;

        Ok(workload)
    }

    async fn run(
        &self,
        workload: &Workload,
        target_node: NodeId,
        mode: BackupMode,
    ) -> CoreResult<Workload> {
        let id = workload.id;

        // Deterministic name plus an up-front row so crash recovery can
        // locate the artifact.
        let backup_name = format!("transfer-{}", Utc::now().timestamp_millis());
        let backup_path = self
            .config
            .backups_root
            .join(id.to_string())
            .join(format!("{backup_name}.tar.gz"))
            .display()
            .to_string();
        let backup = self
            .backups
            .insert(Backup {
                id: 0,
                workload_id: id,
                name: backup_name.clone(),
                path: backup_path,
                mode,
                size_mb: 0,
                metadata: serde_json::json!({ "purpose": "transfer", "target": target_node.0 }),
                created_at: Utc::now(),
                completed_at: None,
            })
            .await?;

        // Subscribe before dispatching so the completion event cannot race
        // past us.
        let mut events = self.event_bus.subscribe_workload(id);

        let payload = self.lifecycle.payload_for(workload).await?;
        self.gateway
            .send(
                workload.node_id,
                AgentCommand::CreateBackup {
                    payload: payload.clone(),
                    backup_id: backup.id,
                    backup_name: backup_name.clone(),
                    backup_mode: mode,
                },
            )
            .await?;
        self.system_log(id, format!("transfer initiated; backup {backup_name} requested")).await;

        // The event router records completion on the backup row; this path
        // only needs the artifact location.
        let artifact_path = self
            .wait_for(&mut events, self.config.backup_wait_timeout, |event| match event {
                AgentEvent::BackupComplete { backup_id, path, .. } if backup_id == backup.id => {
                    Some(path)
                }
                _ => None,
            })
            .await
            .map_err(|e| CoreError::TransferFailed(format!("waiting for backup: {e}")))?;

        // Move the bytes. `local` assumes shared storage.
        let restore_source = match mode {
            BackupMode::Local => artifact_path.clone(),
            BackupMode::Stream => {
                let target_path = staging_path(&backup_name);
                let mut reader = self.local_store.open(&artifact_path).await?;
                let bytes =
                    self.gateway.stream_to(target_node, &target_path, reader.as_mut()).await?;
                info!(%id, bytes, "streamed backup artifact to target");
                target_path
            }
            BackupMode::S3 => {
                let store = self.object_store.as_ref().expect("checked in preflight");
                let target_path = staging_path(&backup_name);
                let mut reader = store.open(&artifact_path).await?;
                let bytes =
                    self.gateway.stream_to(target_node, &target_path, reader.as_mut()).await?;
                info!(%id, bytes, "streamed object-store artifact to target");
                target_path
            }
        };

        self.gateway
            .send(
                target_node,
                AgentCommand::RestoreBackup {
                    payload,
                    backup_id: backup.id,
                    backup_name: backup_name.clone(),
                    source_path: restore_source,
                },
            )
            .await?;

        self.wait_for(&mut events, self.config.backup_wait_timeout, |event| match event {
            AgentEvent::RestoreComplete { backup_id, ok, err, .. } if backup_id == backup.id => {
                Some(if ok { Ok(()) } else { Err(err.unwrap_or_else(|| "restore failed".into())) })
            }
            _ => None,
        })
        .await
        .map_err(|e| CoreError::TransferFailed(format!("waiting for restore: {e}")))?
        .map_err(CoreError::TransferFailed)?;

        self.commit_switch(id, target_node).await
    }

    /// The ownership switch: release the source IP, allocate on the target,
    /// rewrite the computed environment key, clear container identity, move
    /// the node reference and return to `stopped`. All workload-row changes
    /// land in one repository write.
    async fn commit_switch(&self, id: WorkloadId, target_node: NodeId) -> CoreResult<Workload> {
        let reducer = self.lifecycle.reducer_lock(id);
        let _guard = reducer.lock().await;

        let mut workload = self
            .workloads
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::not_found("workload"))?;

        self.arbiter.release_ip(id).await?;
        workload.primary_ip = None;
        workload.environment.remove(ENV_NETWORK_IP);

        if workload.network_mode.is_ipam() {
            let network = workload.network_name.clone().unwrap_or_default();
            let lock = self.arbiter.node_lock(target_node);
            let _node_guard = lock.lock().await;
            let addr = self.arbiter.allocate_ip(target_node, &network, id, None).await?;
            workload.primary_ip = Some(addr);
            workload.environment.insert(ENV_NETWORK_IP.to_string(), addr.to_string());
        }

        workload.container_id = None;
        workload.container_name = None;
        workload.node_id = target_node;
        workload.status = WorkloadStatus::Stopped;
        workload.updated_at = Utc::now();
        self.workloads.update(&workload).await?;
        Ok(workload)
    }

    async fn mark_transferring(&self, id: WorkloadId) -> CoreResult<()> {
        let reducer = self.lifecycle.reducer_lock(id);
        let _guard = reducer.lock().await;

        let mut workload = self
            .workloads
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::not_found("workload"))?;
        if !workload.status.permits(LifecycleAction::Transfer) {
            return Err(CoreError::InvalidState(format!(
                "cannot transfer a {} workload",
                workload.status
            )));
        }
        workload.status = WorkloadStatus::Transferring;
        workload.updated_at = Utc::now();
        self.workloads.update(&workload).await?;
        Ok(())
    }

    /// Failure path: the workload stays on the source node, back in
    /// `stopped`.
    async fn rollback(&self, id: WorkloadId) {
        let reducer = self.lifecycle.reducer_lock(id);
        let _guard = reducer.lock().await;

        match self.workloads.find_by_id(id).await {
            Ok(Some(mut workload)) => {
                workload.status = WorkloadStatus::Stopped;
                workload.updated_at = Utc::now();
                if let Err(e) = self.workloads.update(&workload).await {
                    warn!(%id, error = %e, "rollback status write failed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(%id, error = %e, "rollback load failed"),
        }
    }

    /// Drain the filtered receiver until `extract` matches an agent event,
    /// bounded by `timeout`.
    async fn wait_for<T>(
        &self,
        events: &mut crate::infrastructure::event_bus::WorkloadEventReceiver,
        timeout: std::time::Duration,
        mut extract: impl FnMut(AgentEvent) -> Option<T>,
    ) -> Result<T, String> {
        tokio::time::timeout(timeout, async {
            loop {
                match events.recv().await {
                    Ok(DomainEvent::Agent { event, .. }) => {
                        if let Some(value) = extract(event) {
                            return Ok(value);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => return Err(e.to_string()),
                }
            }
        })
        .await
        .map_err(|_| "timed out".to_string())?
    }

    async fn system_log(&self, id: WorkloadId, line: impl Into<String>) {
        let entry = WorkloadLogEntry::system(id, line);
        if let Err(e) = self.logs.append_batch(vec![entry]).await {
            warn!(%id, error = %e, "system log append failed");
        }
    }
}

/// Filesystem-backed blob source for `local`/`stream` artifacts.
pub struct FsBlobStore;

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn open(&self, location: &str) -> CoreResult<Box<dyn AsyncRead + Send + Unpin>> {
        let file = tokio::fs::File::open(location).await?;
        Ok(Box::new(file))
    }
}
