// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workload lifecycle engine.
//!
//! Reduces control-plane commands and agent status events into state
//! transitions. Both sides go through the same per-workload lock, so a stop
//! arriving mid-start is serialized behind the start and never lost. The
//! lock map is the reducer: one holder per workload, acquisition order is
//! queue order.

use crate::application::access::{AccessEvaluator, SuspensionGate};
use crate::config::CoreConfig;
use crate::domain::access::{permissions, PrincipalId};
use crate::domain::error::{CoreError, CoreResult};
use crate::domain::events::{DomainEvent, WorkloadEvent};
use crate::domain::gateway::{AgentCommand, CommandPayload, NodeGateway};
use crate::domain::log::{AuditEntry, WorkloadLogEntry};
use crate::domain::repository::{
    AuditLogRepository, TemplateRepository, WorkloadLogRepository, WorkloadRepository,
};
use crate::domain::workload::{
    LifecycleAction, Suspension, Workload, WorkloadId, WorkloadStatus,
};
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Delay before a policy-driven automatic start after a crash report.
const AUTO_RESTART_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

pub struct WorkloadLifecycleService {
    config: Arc<CoreConfig>,
    workloads: Arc<dyn WorkloadRepository>,
    templates: Arc<dyn TemplateRepository>,
    logs: Arc<dyn WorkloadLogRepository>,
    audit: Arc<dyn AuditLogRepository>,
    access: Arc<AccessEvaluator>,
    gateway: Arc<dyn NodeGateway>,
    event_bus: EventBus,
    reducer_locks: DashMap<WorkloadId, Arc<Mutex<()>>>,
    /// Workloads whose next `stopped` report continues into `starting`.
    pending_restarts: DashSet<WorkloadId>,
}

impl WorkloadLifecycleService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<CoreConfig>,
        workloads: Arc<dyn WorkloadRepository>,
        templates: Arc<dyn TemplateRepository>,
        logs: Arc<dyn WorkloadLogRepository>,
        audit: Arc<dyn AuditLogRepository>,
        access: Arc<AccessEvaluator>,
        gateway: Arc<dyn NodeGateway>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            config,
            workloads,
            templates,
            logs,
            audit,
            access,
            gateway,
            event_bus,
            reducer_locks: DashMap::new(),
            pending_restarts: DashSet::new(),
        }
    }

    /// The per-workload reducer lock shared by commands and event
    /// application. The transfer coordinator serializes through it too.
    pub(crate) fn reducer_lock(&self, id: WorkloadId) -> Arc<Mutex<()>> {
        self.reducer_locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub async fn install(&self, principal: PrincipalId, id: WorkloadId) -> CoreResult<Workload> {
        self.dispatch(principal, id, LifecycleAction::Install, permissions::SERVER_INSTALL)
            .await
    }

    pub async fn start(&self, principal: PrincipalId, id: WorkloadId) -> CoreResult<Workload> {
        self.dispatch(principal, id, LifecycleAction::Start, permissions::SERVER_START).await
    }

    pub async fn stop(&self, principal: PrincipalId, id: WorkloadId) -> CoreResult<Workload> {
        self.dispatch(principal, id, LifecycleAction::Stop, permissions::SERVER_STOP).await
    }

    pub async fn restart(&self, principal: PrincipalId, id: WorkloadId) -> CoreResult<Workload> {
        self.dispatch(principal, id, LifecycleAction::Restart, permissions::SERVER_RESTART)
            .await
    }

    /// Shared command path: admission, environment composition, command
    /// emission, state persistence. Runs under the reducer lock.
    async fn dispatch(
        &self,
        principal: PrincipalId,
        id: WorkloadId,
        action: LifecycleAction,
        token: &str,
    ) -> CoreResult<Workload> {
        let lock = self.reducer_lock(id);
        let _guard = lock.lock().await;

        let mut workload = self.load(id).await?;
        self.access.check(principal, &workload, token, SuspensionGate::Mutation).await?;
        self.require(&workload, action)?;

        let payload = self.payload_for(&workload).await?;
        let command = match action {
            LifecycleAction::Install => AgentCommand::InstallServer(payload),
            LifecycleAction::Start => AgentCommand::StartServer(payload),
            LifecycleAction::Stop => AgentCommand::StopServer(payload),
            LifecycleAction::Restart => AgentCommand::RestartServer(payload),
            _ => unreachable!("dispatch only handles agent-backed actions"),
        };
        self.gateway.send(workload.node_id, command).await?;
        metrics::counter!("catalyst_lifecycle_commands_total", "action" => action.as_str())
            .increment(1);

        if action == LifecycleAction::Restart {
            self.pending_restarts.insert(id);
        }

        let from = workload.status;
        workload.status = WorkloadStatus::action_target(action);
        workload.updated_at = Utc::now();
        self.workloads.update(&workload).await?;

        self.system_log(id, format!("{} requested by {principal}", action.as_str())).await;
        self.audit_log(principal, action.as_str(), id).await;
        self.publish_status(id, from, workload.status);

        Ok(workload)
    }

    /// Suspend: allowed from any state except transferring; a running
    /// workload gets a best-effort stop first.
    pub async fn suspend(
        &self,
        principal: PrincipalId,
        id: WorkloadId,
        reason: String,
    ) -> CoreResult<Workload> {
        let lock = self.reducer_lock(id);
        let _guard = lock.lock().await;

        let mut workload = self.load(id).await?;
        self.access
            .check(principal, &workload, permissions::SERVER_SUSPEND, SuspensionGate::Mutation)
            .await?;
        self.require(&workload, LifecycleAction::Suspend)?;

        if matches!(workload.status, WorkloadStatus::Starting | WorkloadStatus::Running) {
            let payload = self.payload_for(&workload).await?;
            if let Err(e) = self.gateway.send(workload.node_id, AgentCommand::StopServer(payload)).await
            {
                warn!(%id, error = %e, "best-effort stop before suspension failed");
            }
        }

        let from = workload.status;
        workload.status = WorkloadStatus::Suspended;
        workload.suspension = Some(Suspension {
            suspended_at: Utc::now(),
            suspended_by: principal.to_string(),
            reason: reason.clone(),
        });
        workload.updated_at = Utc::now();
        self.workloads.update(&workload).await?;

        self.system_log(id, format!("suspended by {principal}: {reason}")).await;
        self.audit_log(principal, "suspend", id).await;
        self.publish_status(id, from, WorkloadStatus::Suspended);
        self.event_bus.publish(DomainEvent::Workload(WorkloadEvent::Suspended {
            workload_id: id,
            by: principal.to_string(),
        }));

        Ok(workload)
    }

    pub async fn unsuspend(&self, principal: PrincipalId, id: WorkloadId) -> CoreResult<Workload> {
        let lock = self.reducer_lock(id);
        let _guard = lock.lock().await;

        let mut workload = self.load(id).await?;
        self.access
            .check(principal, &workload, permissions::SERVER_SUSPEND, SuspensionGate::Unsuspend)
            .await?;
        self.require(&workload, LifecycleAction::Unsuspend)?;

        workload.status = WorkloadStatus::Stopped;
        workload.suspension = None;
        workload.updated_at = Utc::now();
        self.workloads.update(&workload).await?;

        self.system_log(id, format!("unsuspended by {principal}")).await;
        self.audit_log(principal, "unsuspend", id).await;
        self.publish_status(id, WorkloadStatus::Suspended, WorkloadStatus::Stopped);
        self.event_bus
            .publish(DomainEvent::Workload(WorkloadEvent::Unsuspended { workload_id: id }));

        Ok(workload)
    }

    /// Zero the crash counter. Permitted in any state; behavior while
    /// suspended follows the configured flag.
    pub async fn reset_crash_count(
        &self,
        principal: PrincipalId,
        id: WorkloadId,
    ) -> CoreResult<Workload> {
        let lock = self.reducer_lock(id);
        let _guard = lock.lock().await;

        let mut workload = self.load(id).await?;
        self.access
            .check(
                principal,
                &workload,
                permissions::SERVER_UPDATE,
                SuspensionGate::ResetCrashCount,
            )
            .await?;

        workload.reset_crash_count();
        workload.updated_at = Utc::now();
        self.workloads.update(&workload).await?;
        self.audit_log(principal, "reset-crash-count", id).await;
        Ok(workload)
    }

    /// Reduce one agent status report. Serialized with command dispatch via
    /// the same reducer lock; the `Arc` receiver lets the crash path
    /// schedule an automatic start on a background task.
    pub async fn apply_status_update(
        self: Arc<Self>,
        id: WorkloadId,
        reported: WorkloadStatus,
        container_id: Option<String>,
    ) -> CoreResult<()> {
        let lock = self.reducer_lock(id);
        let _guard = lock.lock().await;

        let Some(mut workload) = self.workloads.find_by_id(id).await? else {
            // Late event for a deleted workload.
            return Ok(());
        };

        let from = workload.status;
        let Some(mut next) = from.accepts_report(reported) else {
            warn!(%id, from = %from, reported = %reported, "dropping illegal status report");
            return Ok(());
        };

        if let Some(cid) = container_id {
            workload.container_id = Some(cid);
        }

        if next == WorkloadStatus::Stopped && self.pending_restarts.remove(&id).is_some() {
            // Second half of a restart: continue straight into starting.
            next = WorkloadStatus::Starting;
        }

        if next == WorkloadStatus::Crashed {
            workload.record_crash(Utc::now());
            if workload.wants_auto_restart() {
                let service = Arc::clone(&self);
                let workload_id = id;
                tokio::spawn(async move {
                    tokio::time::sleep(AUTO_RESTART_DELAY).await;
                    if let Err(e) = service.auto_start(workload_id).await {
                        warn!(%workload_id, error = %e, "automatic restart failed");
                    }
                });
                self.system_log(id, "crashed; automatic restart scheduled").await;
            } else {
                self.system_log(id, "crash limit reached; manual reset required").await;
                self.event_bus.publish(DomainEvent::Workload(
                    WorkloadEvent::CrashLimitReached {
                        workload_id: id,
                        crash_count: workload.crash_count,
                    },
                ));
            }
        }

        workload.status = next;
        workload.updated_at = Utc::now();
        self.workloads.update(&workload).await?;
        self.publish_status(id, from, next);
        info!(%id, from = %from, to = %next, "workload status reduced");
        Ok(())
    }

    /// Policy-driven start after a crash. System-initiated: no principal,
    /// no permission check, but the state table still applies.
    async fn auto_start(&self, id: WorkloadId) -> CoreResult<()> {
        let lock = self.reducer_lock(id);
        let _guard = lock.lock().await;

        let mut workload = self.load(id).await?;
        if workload.status != WorkloadStatus::Crashed {
            // Something else already moved it; leave it alone.
            return Ok(());
        }
        if workload.is_suspended() {
            return Ok(());
        }

        let payload = self.payload_for(&workload).await?;
        self.gateway.send(workload.node_id, AgentCommand::StartServer(payload)).await?;

        let from = workload.status;
        workload.status = WorkloadStatus::Starting;
        workload.updated_at = Utc::now();
        self.workloads.update(&workload).await?;
        self.system_log(id, format!("automatic restart ({} of {})", workload.crash_count, workload.max_crash_count))
            .await;
        self.publish_status(id, from, WorkloadStatus::Starting);
        Ok(())
    }

    /// Build the full command payload: canonical template plus the composed
    /// environment, rebuilt before every install/start/restart.
    pub async fn payload_for(&self, workload: &Workload) -> CoreResult<CommandPayload> {
        let template = self
            .templates
            .find_by_id(workload.template_id)
            .await?
            .ok_or_else(|| CoreError::not_found("template"))?;
        let environment = workload.compose_environment(&template, &self.config.server_data_root);
        Ok(CommandPayload {
            server_id: workload.id,
            server_uuid: workload.uuid,
            template,
            environment,
            allocations: workload.allocations,
            primary_port: workload.primary_port,
            port_bindings: workload.port_bindings.clone(),
            network_mode: workload.network_mode,
        })
    }

    async fn load(&self, id: WorkloadId) -> CoreResult<Workload> {
        self.workloads
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::not_found("workload"))
    }

    fn require(&self, workload: &Workload, action: LifecycleAction) -> CoreResult<()> {
        if workload.status.permits(action) {
            Ok(())
        } else {
            Err(CoreError::InvalidState(format!(
                "cannot {} a {} workload",
                action.as_str(),
                workload.status
            )))
        }
    }

    /// Best-effort system log entry; never blocks the critical path.
    async fn system_log(&self, id: WorkloadId, line: impl Into<String>) {
        let entry = WorkloadLogEntry::system(id, line);
        if let Err(e) = self.logs.append_batch(vec![entry]).await {
            warn!(%id, error = %e, "system log append failed");
        }
    }

    async fn audit_log(&self, principal: PrincipalId, action: &str, id: WorkloadId) {
        let entry = AuditEntry::new(principal.to_string(), action, "workload", id);
        if let Err(e) = self.audit.append(entry).await {
            warn!(%id, error = %e, "audit append failed");
        }
    }

    fn publish_status(&self, id: WorkloadId, from: WorkloadStatus, to: WorkloadStatus) {
        if from != to {
            self.event_bus.publish(DomainEvent::Workload(WorkloadEvent::StatusChanged {
                workload_id: id,
                from,
                to,
                at: Utc::now(),
            }));
        }
    }
}
