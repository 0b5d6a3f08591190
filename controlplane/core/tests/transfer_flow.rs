// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Transfer coordinator flows: happy path with event correlation, and the
//! rollback guarantees on failure.

mod common;

use catalyst_core::domain::error::CoreError;
use catalyst_core::domain::events::DomainEvent;
use catalyst_core::domain::gateway::{AgentCommand, AgentEvent};
use catalyst_core::domain::log::LogStream;
use catalyst_core::domain::node::NodeId;
use catalyst_core::domain::workload::{
    BackupMode, NetworkMode, WorkloadId, WorkloadStatus, ENV_NETWORK_IP,
};
use common::{FakeGateway, Harness, OWNER};
use std::sync::Arc;
use std::time::Duration;

async fn wait_for_command<F, T>(gateway: &Arc<FakeGateway>, mut pick: F) -> T
where
    F: FnMut(&AgentCommand) -> Option<T>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(found) = gateway.commands.lock().iter().find_map(|(_, c)| pick(c)) {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("expected command was never dispatched")
}

async fn seeded_stopped_workload(h: &Harness) -> (NodeId, NodeId, WorkloadId) {
    let source = h.seed_node(1, 2048, 4).await;
    let target = h.seed_node(2, 2048, 4).await;
    h.seed_pool(source, "mc-lan-static", &["10.0.30.5"]).await;
    h.seed_pool(target, "mc-lan-static", &["10.0.40.5"]).await;
    let template = h.seed_template().await;

    let mut request = h.create_request(source, template, 25565);
    request.network_mode = NetworkMode::MacvlanStatic;
    request.network_name = Some("mc-lan-static".into());
    let workload = h.provisioning.create(OWNER, request).await.unwrap();
    (source, target, workload.id)
}

#[tokio::test]
async fn transfer_happy_path_switches_ownership_atomically() {
    let h = Arc::new(Harness::new());
    let (source, target, workload_id) = seeded_stopped_workload(h.as_ref()).await;

    // The artifact the source agent "produced".
    let artifact_dir = h.config.backups_root.join(workload_id.to_string());
    std::fs::create_dir_all(&artifact_dir).unwrap();
    let artifact = artifact_dir.join("transfer.tar.gz");
    std::fs::write(&artifact, vec![7u8; 2048]).unwrap();
    let artifact_path = artifact.display().to_string();

    let transfer = h.transfer.clone();
    let task = tokio::spawn(async move {
        transfer.transfer(OWNER, workload_id, target, BackupMode::Stream).await
    });

    // Source agent completes the backup.
    let backup_id = wait_for_command(&h.gateway, |c| match c {
        AgentCommand::CreateBackup { backup_id, .. } => Some(*backup_id),
        _ => None,
    })
    .await;
    assert_eq!(h.workload(workload_id).await.status, WorkloadStatus::Transferring);
    h.event_bus.publish(DomainEvent::Agent {
        node_id: source,
        event: AgentEvent::BackupComplete {
            server_id: workload_id,
            backup_id,
            path: artifact_path.clone(),
            size_mb: 1,
        },
    });

    // Target agent restores from the streamed staging file.
    let restore = wait_for_command(&h.gateway, |c| match c {
        AgentCommand::RestoreBackup { backup_id, source_path, .. } => {
            Some((*backup_id, source_path.clone()))
        }
        _ => None,
    })
    .await;
    assert_eq!(restore.0, backup_id);
    h.event_bus.publish(DomainEvent::Agent {
        node_id: target,
        event: AgentEvent::RestoreComplete {
            server_id: workload_id,
            backup_id,
            ok: true,
            err: None,
        },
    });

    let moved = task.await.unwrap().unwrap();
    assert_eq!(moved.node_id, target);
    assert_eq!(moved.status, WorkloadStatus::Stopped);
    assert_eq!(moved.primary_ip, Some("10.0.40.5".parse().unwrap()));
    assert_eq!(moved.environment[ENV_NETWORK_IP], "10.0.40.5");
    assert!(moved.container_id.is_none());

    // Bytes went through the gateway to the target's staging path.
    let streamed = h.gateway.streamed.lock().clone();
    assert_eq!(streamed.len(), 1);
    assert_eq!(streamed[0].0, target);
    assert_eq!(streamed[0].1, restore.1);
    assert_eq!(streamed[0].2, 2048);

    // The source pool got its address back; the target pool holds one.
    let source_pool =
        h.repos.ip_pools.find_pool(source, "mc-lan-static").await.unwrap().unwrap();
    assert!(source_pool.assignments.is_empty());
    let target_pool =
        h.repos.ip_pools.find_pool(target, "mc-lan-static").await.unwrap().unwrap();
    assert_eq!(target_pool.assignments.len(), 1);
}

#[tokio::test]
async fn transfer_requires_stopped_and_distinct_target() {
    let h = Harness::new();
    let (source, target, workload_id) = seeded_stopped_workload(&h).await;

    let err = h
        .transfer
        .transfer(OWNER, workload_id, source, BackupMode::Local)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)), "same-node transfer: {err:?}");

    h.lifecycle.start(OWNER, workload_id).await.unwrap();
    let err =
        h.transfer.transfer(OWNER, workload_id, target, BackupMode::Local).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidState(_)), "running transfer: {err:?}");
}

#[tokio::test]
async fn transfer_timeout_rolls_back_to_source() {
    let h =
        Harness::with_config(|c| c.backup_wait_timeout = Duration::from_millis(100));
    let (source, target, workload_id) = seeded_stopped_workload(&h).await;

    // No agent ever answers; the wait expires.
    let err =
        h.transfer.transfer(OWNER, workload_id, target, BackupMode::Stream).await.unwrap_err();
    assert!(matches!(err, CoreError::TransferFailed(_)), "got {err:?}");

    let workload = h.workload(workload_id).await;
    assert_eq!(workload.node_id, source, "workload must stay on the source");
    assert_eq!(workload.status, WorkloadStatus::Stopped);

    let entries = h.repos.logs.list_recent(workload_id, 50).await.unwrap();
    assert!(
        entries
            .iter()
            .any(|e| e.stream == LogStream::System && e.line.contains("transfer failed")),
        "missing failure system log"
    );
}

#[tokio::test]
async fn transfer_to_offline_target_is_rejected_in_preflight() {
    let h = Harness::new();
    let source = h.seed_node(1, 2048, 4).await;
    let template = h.seed_template().await;
    let workload =
        h.provisioning.create(OWNER, h.create_request(source, template, 25565)).await.unwrap();

    // Target exists in persistence but holds no gateway session.
    let target = catalyst_core::domain::node::Node::new(NodeId(0), "node-b", "10.0.0.9")
        .with_capacity(2048, 4);
    let target = h.repos.nodes.insert(target).await.unwrap();

    let err = h
        .transfer
        .transfer(OWNER, workload.id, target.id, BackupMode::Local)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NodeUnavailable));
    assert_eq!(h.workload(workload.id).await.status, WorkloadStatus::Stopped);
}
