// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Catalyst control plane core
//!
//! Control plane for a fleet of containerized game-server workloads on
//! remote worker nodes: the workload lifecycle engine, the resource and
//! allocation arbiter, the node agent gateway, the chroot-confined file
//! tree with its SFTP surface, and the template importer.
//!
//! Layering follows the usual slices: `domain` holds entities, the state
//! machine and the persistence/gateway contracts; `application` holds the
//! services; `infrastructure` holds the transports and repository backends;
//! `presentation` holds the HTTP router.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
