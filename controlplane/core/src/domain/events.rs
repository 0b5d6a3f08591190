// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain events published on the in-process event bus.

use crate::domain::gateway::AgentEvent;
use crate::domain::node::NodeId;
use crate::domain::workload::{WorkloadId, WorkloadStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkloadEvent {
    StatusChanged {
        workload_id: WorkloadId,
        from: WorkloadStatus,
        to: WorkloadStatus,
        at: DateTime<Utc>,
    },
    CrashLimitReached {
        workload_id: WorkloadId,
        crash_count: u32,
    },
    Suspended {
        workload_id: WorkloadId,
        by: String,
    },
    Unsuspended {
        workload_id: WorkloadId,
    },
    TransferStarted {
        workload_id: WorkloadId,
        source: NodeId,
        target: NodeId,
    },
    TransferCompleted {
        workload_id: WorkloadId,
        target: NodeId,
    },
    TransferFailed {
        workload_id: WorkloadId,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    SessionOpened { node_id: NodeId },
    SessionClosed { node_id: NodeId },
    MarkedOffline { node_id: NodeId },
}

/// Unified event type carried by the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    Workload(WorkloadEvent),
    Node(NodeEvent),
    /// A raw agent frame, fanned out before reduction so waiters (transfer
    /// coordinator, tests) can correlate on it.
    Agent { node_id: NodeId, event: AgentEvent },
}

impl DomainEvent {
    /// The workload an event concerns, when there is one.
    pub fn workload_id(&self) -> Option<WorkloadId> {
        match self {
            DomainEvent::Workload(e) => Some(match e {
                WorkloadEvent::StatusChanged { workload_id, .. }
                | WorkloadEvent::CrashLimitReached { workload_id, .. }
                | WorkloadEvent::Suspended { workload_id, .. }
                | WorkloadEvent::Unsuspended { workload_id }
                | WorkloadEvent::TransferStarted { workload_id, .. }
                | WorkloadEvent::TransferCompleted { workload_id, .. }
                | WorkloadEvent::TransferFailed { workload_id, .. } => *workload_id,
            }),
            DomainEvent::Node(_) => None,
            DomainEvent::Agent { event, .. } => event.server_id(),
        }
    }
}
