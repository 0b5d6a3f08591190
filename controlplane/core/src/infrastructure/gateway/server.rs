// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent gateway: authenticated persistent sessions to worker nodes.
//!
//! One TCP connection per node, authenticated by a hello frame whose token
//! is compared in constant time against the node's stored key. The registry
//! holds at most one session per node; a newer session replaces the older
//! one, whose queued frames fail `NodeUnavailable`. Outbound frames go
//! through a bounded queue with a bounded admission window, so `send` never
//! blocks past backpressure. Transport errors tear the session down and
//! mark the node offline until the next successful handshake.

use crate::domain::error::CoreResult;
use crate::domain::events::{DomainEvent, NodeEvent};
use crate::domain::gateway::{AgentCommand, AgentEvent, GatewayError, NodeGateway};
use crate::domain::node::NodeId;
use crate::domain::repository::NodeRepository;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::gateway::protocol::{
    self, Handshake, HandshakeReply, BLOB_CHUNK_SIZE,
};
use crate::infrastructure::gateway::router::AgentEventRouter;
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio_util::codec::Framed;
use tracing::{info, warn};

/// Outbound frames queued per session before admission backpressure.
const SESSION_QUEUE_DEPTH: usize = 64;
/// How long an agent gets to present its hello frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct SessionHandle {
    epoch: u64,
    tx: mpsc::Sender<Bytes>,
    next_id: Arc<AtomicU64>,
    shutdown: Arc<Notify>,
    /// Unix seconds of the last inbound frame.
    last_seen: Arc<AtomicI64>,
}

pub struct GatewayServer {
    nodes: Arc<dyn NodeRepository>,
    /// Installed after construction; the lifecycle engine behind the router
    /// itself depends on this gateway.
    router: std::sync::OnceLock<Arc<AgentEventRouter>>,
    event_bus: EventBus,
    sessions: DashMap<NodeId, SessionHandle>,
    epochs: AtomicU64,
    admission_timeout: Duration,
    liveness_window: Duration,
}

impl GatewayServer {
    pub fn new(
        nodes: Arc<dyn NodeRepository>,
        event_bus: EventBus,
        admission_timeout: Duration,
        liveness_window: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            nodes,
            router: std::sync::OnceLock::new(),
            event_bus,
            sessions: DashMap::new(),
            epochs: AtomicU64::new(1),
            admission_timeout,
            liveness_window,
        })
    }

    /// Install the event router. Must happen before `serve`.
    pub fn set_router(&self, router: Arc<AgentEventRouter>) {
        let _ = self.router.set(router);
    }

    async fn dispatch_event(&self, node_id: NodeId, event: AgentEvent) {
        match self.router.get() {
            Some(router) => router.route(node_id, event).await,
            // No router yet: still fan the frame out for correlating
            // subscribers.
            None => self
                .event_bus
                .publish(DomainEvent::Agent { node_id, event }),
        }
    }

    /// Accept loop plus the liveness sweeper. Runs until the listener
    /// errors.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        let sweeper = Arc::clone(&self);
        tokio::spawn(async move { sweeper.liveness_sweep().await });

        loop {
            let (stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    warn!(%peer, error = %e, "agent session ended with error");
                }
            });
        }
    }

    async fn handle_connection(self: &Arc<Self>, stream: TcpStream) -> CoreResult<()> {
        let mut framed = Framed::new(stream, protocol::codec());

        let hello = tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next())
            .await
            .ok()
            .flatten()
            .transpose()?
            .and_then(|frame| protocol::decode_handshake(&frame));
        let Some(Handshake::Hello { node_id, token }) = hello else {
            return Ok(());
        };

        let Some(node) = self.nodes.find_by_id(node_id).await? else {
            warn!(%node_id, "hello from unknown node");
            let _ = framed.send(protocol::encode_handshake_reply(&HandshakeReply::HelloRejected)).await;
            return Ok(());
        };
        if !token_matches(&node.agent_key, &token) {
            warn!(%node_id, "hello with invalid key");
            metrics::counter!("catalyst_gateway_auth_failures_total").increment(1);
            let _ = framed.send(protocol::encode_handshake_reply(&HandshakeReply::HelloRejected)).await;
            return Ok(());
        }
        framed.send(protocol::encode_handshake_reply(&HandshakeReply::HelloOk)).await?;

        let (tx, mut rx) = mpsc::channel::<Bytes>(SESSION_QUEUE_DEPTH);
        let handle = SessionHandle {
            epoch: self.epochs.fetch_add(1, Ordering::SeqCst),
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            shutdown: Arc::new(Notify::new()),
            last_seen: Arc::new(AtomicI64::new(Utc::now().timestamp())),
        };
        let epoch = handle.epoch;
        let shutdown = Arc::clone(&handle.shutdown);
        let last_seen = Arc::clone(&handle.last_seen);

        if let Some(previous) = self.sessions.insert(node_id, handle) {
            info!(%node_id, "replacing existing agent session");
            previous.shutdown.notify_waiters();
        }
        self.nodes.set_online(node_id, true, Some(Utc::now())).await?;
        self.event_bus.publish(DomainEvent::Node(NodeEvent::SessionOpened { node_id }));
        metrics::gauge!("catalyst_gateway_sessions").increment(1.0);
        info!(%node_id, "agent session established");

        let (mut sink, mut stream) = framed.split();
        let shutdown_signal = shutdown.notified();
        tokio::pin!(shutdown_signal);

        let result: CoreResult<()> = async {
            loop {
                tokio::select! {
                    outbound = rx.recv() => match outbound {
                        Some(frame) => sink.send(frame).await?,
                        None => break,
                    },
                    inbound = stream.next() => match inbound {
                        Some(frame) => {
                            let frame = frame?;
                            last_seen.store(Utc::now().timestamp(), Ordering::Relaxed);
                            if let Some(event) = protocol::decode_event(&frame) {
                                if matches!(event, AgentEvent::NodeHeartbeat) {
                                    let _ = self
                                        .nodes
                                        .set_online(node_id, true, Some(Utc::now()))
                                        .await;
                                }
                                self.dispatch_event(node_id, event).await;
                            }
                        }
                        None => break,
                    },
                    _ = &mut shutdown_signal => break,
                }
            }
            Ok(())
        }
        .await;

        self.teardown(node_id, epoch).await;
        result
    }

    /// Remove the session if it is still the current one, and mark the node
    /// offline.
    async fn teardown(&self, node_id: NodeId, epoch: u64) {
        let removed = self
            .sessions
            .remove_if(&node_id, |_, handle| handle.epoch == epoch)
            .is_some();
        metrics::gauge!("catalyst_gateway_sessions").decrement(1.0);
        if removed {
            if let Err(e) = self.nodes.set_online(node_id, false, None).await {
                warn!(%node_id, error = %e, "offline mark failed");
            }
            self.event_bus.publish(DomainEvent::Node(NodeEvent::SessionClosed { node_id }));
            info!(%node_id, "agent session closed");
        }
    }

    /// Periodically drop sessions that stopped heartbeating.
    async fn liveness_sweep(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.liveness_window / 3);
        loop {
            ticker.tick().await;
            let deadline = Utc::now().timestamp() - self.liveness_window.as_secs() as i64;
            let stale: Vec<(NodeId, Arc<Notify>)> = self
                .sessions
                .iter()
                .filter(|entry| entry.value().last_seen.load(Ordering::Relaxed) < deadline)
                .map(|entry| (*entry.key(), Arc::clone(&entry.value().shutdown)))
                .collect();
            for (node_id, shutdown) in stale {
                warn!(%node_id, "no heartbeat within liveness window; dropping session");
                self.event_bus.publish(DomainEvent::Node(NodeEvent::MarkedOffline { node_id }));
                shutdown.notify_waiters();
            }
        }
    }

    fn session(&self, node: NodeId) -> Result<SessionHandle, GatewayError> {
        self.sessions
            .get(&node)
            .map(|entry| entry.value().clone())
            .ok_or(GatewayError::Unavailable)
    }
}

/// Constant-time key comparison over digests so mismatched lengths leak
/// nothing either.
fn token_matches(expected: &str, presented: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let expected = Sha256::digest(expected.as_bytes());
    let presented = Sha256::digest(presented.as_bytes());
    expected.as_slice().ct_eq(presented.as_slice()).into()
}

#[async_trait]
impl NodeGateway for GatewayServer {
    async fn send(&self, node: NodeId, command: AgentCommand) -> Result<u64, GatewayError> {
        let handle = self.session(node)?;
        let id = handle.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = protocol::encode_command(id, &command)
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        metrics::counter!(
            "catalyst_gateway_commands_total",
            "command" => command.wire_name()
        )
        .increment(1);

        match tokio::time::timeout(self.admission_timeout, handle.tx.send(frame)).await {
            Ok(Ok(())) => Ok(id),
            // The session went away while we were queueing.
            Ok(Err(_)) => Err(GatewayError::Unavailable),
            Err(_) => Err(GatewayError::Backpressured),
        }
    }

    async fn stream_to(
        &self,
        node: NodeId,
        target_path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, GatewayError> {
        let engine = base64::engine::general_purpose::STANDARD;
        let mut buffer = vec![0u8; BLOB_CHUNK_SIZE];
        let mut seq = 0u64;
        let mut total = 0u64;

        loop {
            let read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| GatewayError::Transport(e.to_string()))?;
            if read == 0 {
                self.send(
                    node,
                    AgentCommand::UploadBlobChunk {
                        target_path: target_path.to_string(),
                        data: String::new(),
                        seq,
                        eos: true,
                    },
                )
                .await?;
                return Ok(total);
            }
            self.send(
                node,
                AgentCommand::UploadBlobChunk {
                    target_path: target_path.to_string(),
                    data: engine.encode(&buffer[..read]),
                    seq,
                    eos: false,
                },
            )
            .await?;
            seq += 1;
            total += read as u64;
        }
    }

    fn is_online(&self, node: NodeId) -> bool {
        self.sessions.contains_key(&node)
    }
}
