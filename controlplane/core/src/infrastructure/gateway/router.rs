// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Inbound agent event routing.
//!
//! Every event is fanned out on the bus first (waiters correlate on raw
//! frames), then applied to persistent state: status updates reduce through
//! the lifecycle engine, logs and metrics go to the batcher, backup
//! completions update their rows. Events whose server id does not resolve
//! are dropped with a log entry.

use crate::application::lifecycle::WorkloadLifecycleService;
use crate::domain::events::DomainEvent;
use crate::domain::gateway::AgentEvent;
use crate::domain::log::{MetricsSample, WorkloadLogEntry};
use crate::domain::node::NodeId;
use crate::domain::repository::BackupRepository;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::log_batcher::LogBatcher;
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

pub struct AgentEventRouter {
    lifecycle: Arc<WorkloadLifecycleService>,
    backups: Arc<dyn BackupRepository>,
    batcher: LogBatcher,
    event_bus: EventBus,
}

impl AgentEventRouter {
    pub fn new(
        lifecycle: Arc<WorkloadLifecycleService>,
        backups: Arc<dyn BackupRepository>,
        batcher: LogBatcher,
        event_bus: EventBus,
    ) -> Self {
        Self { lifecycle, backups, batcher, event_bus }
    }

    pub async fn route(&self, node_id: NodeId, event: AgentEvent) {
        metrics::counter!("catalyst_gateway_events_total").increment(1);
        self.event_bus.publish(DomainEvent::Agent { node_id, event: event.clone() });

        match event {
            AgentEvent::StatusUpdate { server_id, new_status, container_id } => {
                if let Err(e) = self
                    .lifecycle
                    .clone()
                    .apply_status_update(server_id, new_status, container_id)
                    .await
                {
                    warn!(%server_id, error = %e, "status update reduction failed");
                }
            }
            AgentEvent::Log { server_id, stream, line } => {
                self.batcher.push_log(WorkloadLogEntry {
                    workload_id: server_id,
                    stream,
                    line,
                    at: Utc::now(),
                });
            }
            AgentEvent::Metrics { server_id, cpu_percent, memory_mb, disk_mb, timestamp } => {
                self.batcher.push_metric(MetricsSample {
                    workload_id: server_id,
                    cpu_percent,
                    memory_mb,
                    disk_mb,
                    at: timestamp,
                });
            }
            AgentEvent::BackupComplete { backup_id, path, size_mb, server_id } => {
                match self.backups.find_by_id(backup_id).await {
                    Ok(Some(mut backup)) => {
                        backup.path = path;
                        backup.size_mb = size_mb;
                        backup.completed_at = Some(Utc::now());
                        if let Err(e) = self.backups.update(&backup).await {
                            warn!(%backup_id, error = %e, "backup completion write failed");
                        }
                    }
                    Ok(None) => {
                        warn!(%backup_id, %server_id, "backup completion for unknown row");
                    }
                    Err(e) => warn!(%backup_id, error = %e, "backup lookup failed"),
                }
            }
            // Restore outcomes only matter to their correlated waiter.
            AgentEvent::RestoreComplete { .. } => {}
            // Heartbeats are handled by the session loop.
            AgentEvent::NodeHeartbeat => {}
        }
    }
}
