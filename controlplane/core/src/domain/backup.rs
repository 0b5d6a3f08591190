// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::workload::{BackupMode, WorkloadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A backup artifact row. Recorded up front (before the agent confirms) so
/// crash recovery can locate the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub id: i64,
    pub workload_id: WorkloadId,
    pub name: String,
    /// Filesystem path or object key, depending on mode.
    pub path: String,
    pub mode: BackupMode,
    pub size_mb: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Set when the agent's backup_complete event arrives.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Backup {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}
