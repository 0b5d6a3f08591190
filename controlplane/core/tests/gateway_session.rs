// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Gateway wire behavior over a real loopback socket: handshake
//! authentication, command framing, event fan-out, session replacement.

use catalyst_core::domain::events::DomainEvent;
use catalyst_core::domain::gateway::{AgentCommand, AgentEvent, GatewayError, NodeGateway};
use catalyst_core::domain::node::{Node, NodeId};
use catalyst_core::domain::repository::NodeRepository;
use catalyst_core::domain::workload::{WorkloadId, WorkloadStatus};
use catalyst_core::infrastructure::event_bus::EventBus;
use catalyst_core::infrastructure::gateway::{protocol, GatewayServer};
use catalyst_core::infrastructure::repositories::memory::InMemoryNodeRepository;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

struct TestGateway {
    server: Arc<GatewayServer>,
    nodes: Arc<InMemoryNodeRepository>,
    bus: EventBus,
    addr: std::net::SocketAddr,
    node_id: NodeId,
}

async fn start_gateway() -> TestGateway {
    let nodes = Arc::new(InMemoryNodeRepository::default());
    let node = Node::new(NodeId(0), "node-a", "10.0.0.2")
        .with_capacity(4096, 4)
        .with_agent_key("a-very-secret-key");
    let node = nodes.insert(node).await.unwrap();

    let bus = EventBus::with_default_capacity();
    let server = GatewayServer::new(
        nodes.clone(),
        bus.clone(),
        Duration::from_secs(1),
        Duration::from_secs(60),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.clone().serve(listener));

    TestGateway { server, nodes, bus, addr, node_id: node.id }
}

type AgentConn = Framed<TcpStream, tokio_util::codec::LengthDelimitedCodec>;

async fn connect_agent(gw: &TestGateway, token: &str) -> (AgentConn, serde_json::Value) {
    let stream = TcpStream::connect(gw.addr).await.unwrap();
    let mut framed = Framed::new(stream, protocol::codec());
    let hello = serde_json::json!({
        "type": "hello",
        "nodeId": gw.node_id.0,
        "token": token,
    });
    framed.send(hello.to_string().into_bytes().into()).await.unwrap();
    let reply = framed.next().await.unwrap().unwrap();
    let reply: serde_json::Value = serde_json::from_slice(&reply).unwrap();
    (framed, reply)
}

#[tokio::test]
async fn handshake_rejects_bad_key_in_constant_time_path() {
    let gw = start_gateway().await;

    let (_conn, reply) = connect_agent(&gw, "wrong-key").await;
    assert_eq!(reply["type"], "hello_rejected");
    assert!(!gw.server.is_online(gw.node_id));
}

#[tokio::test]
async fn send_frames_reach_the_agent_in_order() {
    let gw = start_gateway().await;
    let (mut conn, reply) = connect_agent(&gw, "a-very-secret-key").await;
    assert_eq!(reply["type"], "hello_ok");

    // Registration marks the node online.
    tokio::time::timeout(Duration::from_secs(2), async {
        while !gw.server.is_online(gw.node_id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(gw.nodes.find_by_id(gw.node_id).await.unwrap().unwrap().online);

    let first = gw
        .server
        .send(gw.node_id, AgentCommand::Cancel { server_id: WorkloadId(1) })
        .await
        .unwrap();
    let second = gw
        .server
        .send(gw.node_id, AgentCommand::Cancel { server_id: WorkloadId(2) })
        .await
        .unwrap();
    assert!(second > first, "correlation ids are monotonic");

    let frame = conn.next().await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!(value["type"], "cancel");
    assert_eq!(value["serverId"], 1);
    assert_eq!(value["id"], first);

    let frame = conn.next().await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!(value["serverId"], 2);
}

#[tokio::test]
async fn agent_events_fan_out_on_the_bus() {
    let gw = start_gateway().await;
    let (mut conn, _) = connect_agent(&gw, "a-very-secret-key").await;
    let mut rx = gw.bus.subscribe();

    let event = serde_json::json!({
        "type": "status_update",
        "serverId": 42,
        "newStatus": "running",
    });
    conn.send(event.to_string().into_bytes().into()).await.unwrap();

    let got = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(DomainEvent::Agent { node_id, event }) = rx.recv().await {
                return (node_id, event);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(got.0, gw.node_id);
    match got.1 {
        AgentEvent::StatusUpdate { server_id, new_status, .. } => {
            assert_eq!(server_id, WorkloadId(42));
            assert_eq!(new_status, WorkloadStatus::Running);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn unknown_frames_are_dropped_and_session_survives() {
    let gw = start_gateway().await;
    let (mut conn, _) = connect_agent(&gw, "a-very-secret-key").await;

    conn.send(br#"{"type":"telemetry_v2"}"#.to_vec().into()).await.unwrap();

    // Session still works afterwards.
    gw.server
        .send(gw.node_id, AgentCommand::Cancel { server_id: WorkloadId(1) })
        .await
        .unwrap();
    let frame = conn.next().await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!(value["type"], "cancel");
}

#[tokio::test]
async fn newer_session_replaces_older_one() {
    let gw = start_gateway().await;
    let (_old, _) = connect_agent(&gw, "a-very-secret-key").await;
    let (mut new, reply) = connect_agent(&gw, "a-very-secret-key").await;
    assert_eq!(reply["type"], "hello_ok");

    // Give the registry a moment to swap and tear the old session down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(gw.server.is_online(gw.node_id));

    gw.server
        .send(gw.node_id, AgentCommand::Cancel { server_id: WorkloadId(9) })
        .await
        .unwrap();
    let frame = new.next().await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!(value["serverId"], 9);
}

#[tokio::test]
async fn send_without_session_is_unavailable() {
    let gw = start_gateway().await;
    let err = gw
        .server
        .send(gw.node_id, AgentCommand::Cancel { server_id: WorkloadId(1) })
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Unavailable));
}

#[tokio::test]
async fn disconnect_marks_node_offline() {
    let gw = start_gateway().await;
    let (conn, _) = connect_agent(&gw, "a-very-secret-key").await;
    tokio::time::timeout(Duration::from_secs(2), async {
        while !gw.server.is_online(gw.node_id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    drop(conn);
    tokio::time::timeout(Duration::from_secs(2), async {
        while gw.server.is_online(gw.node_id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(!gw.nodes.find_by_id(gw.node_id).await.unwrap().unwrap().online);
}
