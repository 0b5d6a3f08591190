// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The node gateway port and the agent wire vocabulary.
//!
//! Frames travel as length-prefixed JSON over the agent session. The
//! command/event sets here are closed: unknown types on either side are
//! dropped with a log entry, never an error. The concrete transport lives in
//! `infrastructure::gateway`; services depend only on this trait.

use crate::domain::error::CoreError;
use crate::domain::log::LogStream;
use crate::domain::node::NodeId;
use crate::domain::template::Template;
use crate::domain::workload::{Allocations, BackupMode, NetworkMode, WorkloadId, WorkloadStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Everything the agent needs to act on a server, attached to every
/// server-scoped command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    pub server_id: WorkloadId,
    pub server_uuid: Uuid,
    pub template: Template,
    pub environment: BTreeMap<String, String>,
    pub allocations: Allocations,
    pub primary_port: u16,
    pub port_bindings: BTreeMap<u16, u16>,
    pub network_mode: NetworkMode,
}

/// Control-plane -> agent command frames. The variant names are the wire
/// tokens the agent recognizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    InstallServer(CommandPayload),
    StartServer(CommandPayload),
    StopServer(CommandPayload),
    RestartServer(CommandPayload),
    ResizeStorage(CommandPayload),
    #[serde(rename_all = "camelCase")]
    CreateBackup {
        #[serde(flatten)]
        payload: CommandPayload,
        backup_id: i64,
        backup_name: String,
        backup_mode: BackupMode,
    },
    #[serde(rename_all = "camelCase")]
    RestoreBackup {
        #[serde(flatten)]
        payload: CommandPayload,
        backup_id: i64,
        backup_name: String,
        /// Staging path of the uploaded artifact on the target node.
        source_path: String,
    },
    #[serde(rename_all = "camelCase")]
    UploadBlobChunk {
        target_path: String,
        /// base64 chunk payload, at most `BLOB_CHUNK_SIZE` raw bytes.
        data: String,
        seq: u64,
        eos: bool,
    },
    #[serde(rename_all = "camelCase")]
    Cancel { server_id: WorkloadId },
}

impl AgentCommand {
    /// Wire token, for logs and metrics labels.
    pub fn wire_name(&self) -> &'static str {
        match self {
            AgentCommand::InstallServer(_) => "install_server",
            AgentCommand::StartServer(_) => "start_server",
            AgentCommand::StopServer(_) => "stop_server",
            AgentCommand::RestartServer(_) => "restart_server",
            AgentCommand::ResizeStorage(_) => "resize_storage",
            AgentCommand::CreateBackup { .. } => "create_backup",
            AgentCommand::RestoreBackup { .. } => "restore_backup",
            AgentCommand::UploadBlobChunk { .. } => "upload_blob_chunk",
            AgentCommand::Cancel { .. } => "cancel",
        }
    }

    /// The workload a command refers to, when server-scoped.
    pub fn server_id(&self) -> Option<WorkloadId> {
        match self {
            AgentCommand::InstallServer(p)
            | AgentCommand::StartServer(p)
            | AgentCommand::StopServer(p)
            | AgentCommand::RestartServer(p)
            | AgentCommand::ResizeStorage(p) => Some(p.server_id),
            AgentCommand::CreateBackup { payload, .. }
            | AgentCommand::RestoreBackup { payload, .. } => Some(payload.server_id),
            AgentCommand::UploadBlobChunk { .. } => None,
            AgentCommand::Cancel { server_id } => Some(*server_id),
        }
    }
}

/// Agent -> control-plane event frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    #[serde(rename_all = "camelCase")]
    StatusUpdate {
        server_id: WorkloadId,
        new_status: WorkloadStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Log {
        server_id: WorkloadId,
        stream: LogStream,
        line: String,
    },
    #[serde(rename_all = "camelCase")]
    Metrics {
        server_id: WorkloadId,
        cpu_percent: f64,
        memory_mb: u64,
        disk_mb: u64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    BackupComplete {
        server_id: WorkloadId,
        backup_id: i64,
        path: String,
        size_mb: u64,
    },
    #[serde(rename_all = "camelCase")]
    RestoreComplete {
        server_id: WorkloadId,
        backup_id: i64,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<String>,
    },
    NodeHeartbeat,
}

impl AgentEvent {
    pub fn server_id(&self) -> Option<WorkloadId> {
        match self {
            AgentEvent::StatusUpdate { server_id, .. }
            | AgentEvent::Log { server_id, .. }
            | AgentEvent::Metrics { server_id, .. }
            | AgentEvent::BackupComplete { server_id, .. }
            | AgentEvent::RestoreComplete { server_id, .. } => Some(*server_id),
            AgentEvent::NodeHeartbeat => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// No active authenticated session for the node.
    #[error("node is not connected")]
    Unavailable,

    /// The session's outbound queue did not admit the frame within the
    /// bounded admission window.
    #[error("node session queue is full")]
    Backpressured,

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<GatewayError> for CoreError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unavailable => CoreError::NodeUnavailable,
            GatewayError::Backpressured => CoreError::NodeBackpressured,
            GatewayError::Transport(msg) => {
                CoreError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, msg))
            }
        }
    }
}

/// The "send to node N" primitive with at-most-one delivery per accepted
/// call. `send` succeeds when the frame has been handed to the transport for
/// the active session; terminal outcomes arrive as correlated [`AgentEvent`]s.
#[async_trait]
pub trait NodeGateway: Send + Sync {
    /// Dispatch a command to the node's active session. Returns the
    /// correlation id assigned to the frame.
    async fn send(&self, node: NodeId, command: AgentCommand) -> Result<u64, GatewayError>;

    /// Stream a blob to `target_path` on the node as ordered
    /// `upload_blob_chunk` frames terminated by an EOS chunk. Returns the
    /// number of raw bytes streamed. A partial stream leaves the target in an
    /// indeterminate state; retry or cleanup is the caller's responsibility.
    async fn stream_to(
        &self,
        node: NodeId,
        target_path: &str,
        reader: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
    ) -> Result<u64, GatewayError>;

    fn is_online(&self, node: NodeId) -> bool;
}
