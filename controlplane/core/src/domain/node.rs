// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub i64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A worker host that runs workloads and hosts an agent.
///
/// `agent_key` is the hex-encoded shared secret the node's agent presents in
/// its gateway hello frame. It never leaves the persistence boundary except
/// for the constant-time comparison at session admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    /// Public network address the agent and SFTP clients reach this node at.
    pub address: String,
    pub max_memory_mb: u64,
    pub max_cpu_cores: u32,
    pub online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub agent_key: String,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn new(id: NodeId, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            address: address.into(),
            max_memory_mb: 0,
            max_cpu_cores: 0,
            online: false,
            last_seen_at: None,
            agent_key: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_capacity(mut self, max_memory_mb: u64, max_cpu_cores: u32) -> Self {
        self.max_memory_mb = max_memory_mb;
        self.max_cpu_cores = max_cpu_cores;
        self
    }

    pub fn with_agent_key(mut self, key: impl Into<String>) -> Self {
        self.agent_key = key.into();
        self
    }
}
