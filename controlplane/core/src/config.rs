// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Control-plane configuration, sourced from the environment once at
//! start-up and injected everywhere else. No module-level singletons; tests
//! construct their own instances.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What delete on a suspended workload does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuspensionDeletePolicy {
    /// Delete stays available to the owner.
    Allow,
    /// Delete is locked like every other mutation.
    Block,
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root directory for per-workload file trees.
    pub server_data_root: PathBuf,
    /// SFTP root; defaults to `server_data_root`.
    pub sftp_root: PathBuf,
    pub sftp_port: u16,
    pub sftp_host_key: PathBuf,
    pub sftp_idle_timeout: Duration,
    /// Optional process-wide disk ceiling in MiB.
    pub max_disk_mb: Option<u64>,
    /// `false` disables suspension gating entirely.
    pub suspension_enforced: bool,
    pub suspension_delete_policy: SuspensionDeletePolicy,
    /// Whether `reset-crash-count` is honored while suspended.
    pub suspension_reset_crash_allowed: bool,
    pub gateway_bind: String,
    pub http_bind: String,
    /// Bounded gateway queue admission window.
    pub send_admission_timeout: Duration,
    /// How long a transfer waits for the correlated backup_complete event.
    pub backup_wait_timeout: Duration,
    /// No heartbeat within this window marks the node offline.
    pub node_liveness_window: Duration,
    /// Backups root, one subdirectory per workload id.
    pub backups_root: PathBuf,
    pub database_url: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            server_data_root: PathBuf::from("/tmp/catalyst-servers"),
            sftp_root: PathBuf::from("/tmp/catalyst-servers"),
            sftp_port: 2022,
            sftp_host_key: PathBuf::from("/var/lib/catalyst/sftp_host_key"),
            sftp_idle_timeout: Duration::from_secs(30 * 60),
            max_disk_mb: None,
            suspension_enforced: true,
            suspension_delete_policy: SuspensionDeletePolicy::Allow,
            suspension_reset_crash_allowed: true,
            gateway_bind: "0.0.0.0:8081".to_string(),
            http_bind: "0.0.0.0:8080".to_string(),
            send_admission_timeout: Duration::from_secs(5),
            backup_wait_timeout: Duration::from_secs(10 * 60),
            node_liveness_window: Duration::from_secs(90),
            backups_root: PathBuf::from("/var/lib/catalyst/backups"),
            database_url: None,
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SERVER_DATA_PATH") {
            cfg.server_data_root = PathBuf::from(&v);
            cfg.sftp_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SERVER_FILES_ROOT") {
            cfg.sftp_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SFTP_PORT") {
            if let Ok(port) = v.parse() {
                cfg.sftp_port = port;
            }
        }
        if let Ok(v) = std::env::var("SFTP_HOST_KEY") {
            cfg.sftp_host_key = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MAX_DISK_MB") {
            cfg.max_disk_mb = v.parse().ok();
        }
        if let Ok(v) = std::env::var("SUSPENSION_ENFORCED") {
            cfg.suspension_enforced = v != "false";
        }
        if let Ok(v) = std::env::var("SUSPENSION_DELETE_POLICY") {
            cfg.suspension_delete_policy = if v == "block" {
                SuspensionDeletePolicy::Block
            } else {
                SuspensionDeletePolicy::Allow
            };
        }
        if let Ok(v) = std::env::var("SUSPENSION_RESET_CRASH") {
            cfg.suspension_reset_crash_allowed = v != "block";
        }
        if let Ok(v) = std::env::var("GATEWAY_BIND") {
            cfg.gateway_bind = v;
        }
        if let Ok(v) = std::env::var("HTTP_BIND") {
            cfg.http_bind = v;
        }
        if let Ok(v) = std::env::var("BACKUPS_PATH") {
            cfg.backups_root = PathBuf::from(v);
        }
        cfg.database_url = std::env::var("DATABASE_URL").ok();

        cfg
    }
}
