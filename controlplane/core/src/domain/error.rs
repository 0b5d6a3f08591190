// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Error kinds surfaced by the control-plane core.
//!
//! Every fallible core operation returns one of these kinds. The HTTP layer
//! consumes `CoreError::status_code()` as the single kind-to-status mapping;
//! nothing else in the tree hardcodes status codes.

use crate::domain::repository::RepositoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("workload is suspended")]
    Locked,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient capacity on node: {0}")]
    CapacityExceeded(String),

    #[error("allocation conflict: {0}")]
    AllocationConflict(String),

    #[error("node is not connected")]
    NodeUnavailable,

    #[error("node session queue is full")]
    NodeBackpressured,

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("path escapes workload directory: {0}")]
    PathTraversal(String),

    #[error("unsupported archive name: {0}")]
    UnsupportedArchive(String),

    #[error("authentication failed")]
    AuthFailed,

    /// Failure reported by the external database-provisioning collaborator,
    /// surfaced verbatim with its suggested status code.
    #[error("database provisioning failed: {message}")]
    DatabaseProvisioning { message: String, status: u16 },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// HTTP status code for this kind. Consumed by the presentation layer.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::NotFound(_) => 404,
            CoreError::Forbidden(_) => 403,
            CoreError::Locked => 423,
            CoreError::InvalidState(_) => 409,
            CoreError::Validation(_)
            | CoreError::AllocationConflict(_)
            | CoreError::CapacityExceeded(_)
            | CoreError::PathTraversal(_)
            | CoreError::UnsupportedArchive(_) => 400,
            CoreError::NodeUnavailable | CoreError::NodeBackpressured => 503,
            CoreError::AuthFailed => 401,
            CoreError::DatabaseProvisioning { status, .. } => *status,
            CoreError::TransferFailed(_) => 500,
            CoreError::Repository(RepositoryError::Unavailable(_)) => 503,
            CoreError::Repository(_) | CoreError::Io(_) => 500,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_surface_contract() {
        assert_eq!(CoreError::not_found("workload").status_code(), 404);
        assert_eq!(CoreError::Forbidden("server.start".into()).status_code(), 403);
        assert_eq!(CoreError::Locked.status_code(), 423);
        assert_eq!(CoreError::InvalidState("must be stopped".into()).status_code(), 409);
        assert_eq!(CoreError::AllocationConflict("port 25570".into()).status_code(), 400);
        assert_eq!(CoreError::NodeUnavailable.status_code(), 503);
        assert_eq!(CoreError::PathTraversal("../etc".into()).status_code(), 400);
    }
}
