// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Principals, per-workload grants and roles.

use crate::domain::workload::WorkloadId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrincipalId(pub i64);

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Permission tokens understood by the evaluator. Grants and roles carry
/// free-form strings; these constants are the tokens the core itself asks
/// for.
pub mod permissions {
    pub const WILDCARD: &str = "*";
    pub const ADMIN_READ: &str = "admin.read";

    pub const SERVER_VIEW: &str = "server.view";
    pub const SERVER_INSTALL: &str = "server.install";
    pub const SERVER_START: &str = "server.start";
    pub const SERVER_STOP: &str = "server.stop";
    pub const SERVER_RESTART: &str = "server.restart";
    pub const SERVER_UPDATE: &str = "server.update";
    pub const SERVER_SUSPEND: &str = "server.suspend";
    pub const SERVER_TRANSFER: &str = "server.transfer";
    pub const SERVER_DELETE: &str = "server.delete";

    pub const FILE_READ: &str = "file.read";
    pub const FILE_WRITE: &str = "file.write";
    pub const FILE_DELETE: &str = "file.delete";

    /// The permission set written for the owner at workload creation.
    pub const OWNER_DEFAULTS: &[&str] = &[
        SERVER_VIEW,
        SERVER_INSTALL,
        SERVER_START,
        SERVER_STOP,
        SERVER_RESTART,
        SERVER_UPDATE,
        FILE_READ,
        FILE_WRITE,
        FILE_DELETE,
    ];

    /// True for tokens that only read state; `admin.read` grants these.
    pub fn is_read_scope(token: &str) -> bool {
        token == SERVER_VIEW || token == FILE_READ || token.ends_with(".read")
    }
}

/// A per-workload grant row: (principal, workload, permission set).
/// Rows are ordered by insertion; the owner implicitly holds all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadAccess {
    pub principal: PrincipalId,
    pub workload: WorkloadId,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkloadAccess {
    pub fn allows(&self, token: &str) -> bool {
        self.permissions
            .iter()
            .any(|p| p == permissions::WILDCARD || p == token)
    }
}

/// A named collection of permission strings held by principals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub permissions: Vec<String>,
}

impl Role {
    pub fn allows(&self, token: &str) -> bool {
        self.permissions.iter().any(|p| {
            p == permissions::WILDCARD
                || p == token
                || (p == permissions::ADMIN_READ && permissions::is_read_scope(token))
        })
    }
}
