// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Append-only workload console/system log and the audit trail.

use crate::domain::workload::WorkloadId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Control-plane decisions (transfer steps, crash-limit notices, ...).
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadLogEntry {
    pub workload_id: WorkloadId,
    pub stream: LogStream,
    pub line: String,
    pub at: DateTime<Utc>,
}

impl WorkloadLogEntry {
    pub fn system(workload_id: WorkloadId, line: impl Into<String>) -> Self {
        Self { workload_id, stream: LogStream::System, line: line.into(), at: Utc::now() }
    }
}

/// Append-only audit record. Business code never mutates or deletes these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub resource_id: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        resource_id: impl std::fmt::Display,
    ) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            resource: resource.into(),
            resource_id: resource_id.to_string(),
            details: serde_json::Value::Null,
            at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// One agent-reported resource sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSample {
    pub workload_id: WorkloadId,
    pub cpu_percent: f64,
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub at: DateTime<Utc>,
}
