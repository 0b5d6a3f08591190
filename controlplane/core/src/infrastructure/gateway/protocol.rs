// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Wire framing for agent sessions.
//!
//! Frames are length-prefixed JSON. Control-plane-originated frames carry a
//! monotonically assigned correlation id next to the command's own fields;
//! inbound frames are the event vocabulary plus the hello handshake. The
//! frame set is closed: unknown inbound types are logged and dropped.

use crate::domain::gateway::{AgentCommand, AgentEvent};
use crate::domain::node::NodeId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;
use tracing::warn;

/// Upper bound on a single frame; comfortably above the 1 MiB blob chunk
/// plus envelope overhead.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Raw payload bytes per `upload_blob_chunk` frame.
pub const BLOB_CHUNK_SIZE: usize = 1024 * 1024;

pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// First frame an agent sends after connecting.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Handshake {
    #[serde(rename_all = "camelCase")]
    Hello { node_id: NodeId, token: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeReply {
    HelloOk,
    HelloRejected,
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    id: u64,
    #[serde(flatten)]
    command: &'a AgentCommand,
}

pub fn encode_command(id: u64, command: &AgentCommand) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(&OutboundFrame { id, command }).map(Bytes::from)
}

pub fn encode_handshake_reply(reply: &HandshakeReply) -> Bytes {
    Bytes::from(serde_json::to_vec(reply).expect("handshake reply serializes"))
}

pub fn decode_handshake(frame: &[u8]) -> Option<Handshake> {
    serde_json::from_slice(frame).ok()
}

/// Decode one inbound event frame. Unknown or malformed types return `None`
/// after a log entry; the session keeps running.
pub fn decode_event(frame: &[u8]) -> Option<AgentEvent> {
    match serde_json::from_slice::<AgentEvent>(frame) {
        Ok(event) => Some(event),
        Err(_) => {
            let kind = serde_json::from_slice::<serde_json::Value>(frame)
                .ok()
                .and_then(|v| v.get("type").and_then(|t| t.as_str().map(str::to_string)))
                .unwrap_or_else(|| "<unparseable>".to_string());
            warn!(frame_type = %kind, "dropping unknown agent frame");
            None
        }
    }
}
