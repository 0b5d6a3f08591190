// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Resource and allocation arbiter: capacity headroom, host-port
//! arbitration and IP-pool assignment.
//!
//! The decision functions are pure; the arbiter service wraps them with
//! repository reads and a per-node critical section so concurrent
//! admissions on one node cannot lose updates. Multi-master coordination is
//! out of scope, so the critical section is process-local; the PostgreSQL
//! pool backend additionally locks its rows inside the allocation
//! transaction.

use crate::domain::error::{CoreError, CoreResult};
use crate::domain::ip_pool::IpPool;
use crate::domain::node::{Node, NodeId};
use crate::domain::ports;
use crate::domain::repository::{IpPoolRepository, NodeRepository, WorkloadRepository};
use crate::domain::workload::{Allocations, NetworkMode, Workload, WorkloadId};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Check that `requested` fits node capacity next to `siblings`
/// (the node's other workloads; the updating workload itself excluded by
/// the caller). `max_disk_mb` is the optional process-wide ceiling.
pub fn check_capacity(
    node: &Node,
    siblings: &[Workload],
    requested: Allocations,
    max_disk_mb: Option<u64>,
) -> CoreResult<()> {
    let used_memory: u64 = siblings.iter().map(|w| w.allocations.memory_mb).sum();
    let used_cpu: u32 = siblings.iter().map(|w| w.allocations.cpu_cores).sum();

    if used_memory + requested.memory_mb > node.max_memory_mb {
        return Err(CoreError::CapacityExceeded(format!(
            "memory: {} + {} MiB exceeds {} MiB on {}",
            used_memory, requested.memory_mb, node.max_memory_mb, node.name
        )));
    }
    if used_cpu + requested.cpu_cores > node.max_cpu_cores {
        return Err(CoreError::CapacityExceeded(format!(
            "cpu: {} + {} cores exceeds {} on {}",
            used_cpu, requested.cpu_cores, node.max_cpu_cores, node.name
        )));
    }
    if let Some(ceiling) = max_disk_mb {
        if requested.disk_mb > ceiling {
            return Err(CoreError::CapacityExceeded(format!(
                "disk: {} MiB exceeds the configured ceiling of {ceiling} MiB",
                requested.disk_mb
            )));
        }
    }
    Ok(())
}

/// Validate and arbitrate a binding map against the node's sibling
/// workloads. Returns the effective map (primary binding guaranteed).
/// IPAM-mode workloads contribute no host ports on either side.
pub fn arbitrate_ports(
    siblings: &[Workload],
    network_mode: NetworkMode,
    primary_port: u16,
    bindings: BTreeMap<u16, u16>,
) -> CoreResult<BTreeMap<u16, u16>> {
    let bindings = ports::validate_bindings(primary_port, bindings)?;
    if !network_mode.uses_host_ports() {
        return Ok(bindings);
    }

    let mut used = std::collections::BTreeSet::new();
    for sibling in siblings {
        if !sibling.network_mode.uses_host_ports() {
            continue;
        }
        used.extend(ports::occupied_host_ports(sibling.primary_port, &sibling.port_bindings));
    }

    for host in bindings.values() {
        if used.contains(host) {
            return Err(CoreError::AllocationConflict(format!("host port {host} is in use")));
        }
    }
    Ok(bindings)
}

/// Pick an address from the pool, honoring an explicit request.
pub fn pick_ip(pool: &IpPool, requested: Option<IpAddr>) -> CoreResult<IpAddr> {
    match requested {
        Some(addr) => {
            if !pool.contains(addr) {
                return Err(CoreError::AllocationConflict(format!(
                    "address {addr} is not part of pool {}",
                    pool.network_name
                )));
            }
            if !pool.is_free(addr) {
                return Err(CoreError::AllocationConflict(format!("address {addr} is in use")));
            }
            Ok(addr)
        }
        None => pool.first_free().ok_or_else(|| {
            CoreError::CapacityExceeded(format!("ip pool {} is exhausted", pool.network_name))
        }),
    }
}

pub struct ResourceArbiter {
    nodes: Arc<dyn NodeRepository>,
    workloads: Arc<dyn WorkloadRepository>,
    pools: Arc<dyn IpPoolRepository>,
    max_disk_mb: Option<u64>,
    node_locks: DashMap<NodeId, Arc<Mutex<()>>>,
}

impl ResourceArbiter {
    pub fn new(
        nodes: Arc<dyn NodeRepository>,
        workloads: Arc<dyn WorkloadRepository>,
        pools: Arc<dyn IpPoolRepository>,
        max_disk_mb: Option<u64>,
    ) -> Self {
        Self { nodes, workloads, pools, max_disk_mb, node_locks: DashMap::new() }
    }

    /// The per-node critical section. Held across read-check-write so
    /// concurrent admissions serialize.
    pub fn node_lock(&self, node: NodeId) -> Arc<Mutex<()>> {
        self.node_locks.entry(node).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Admission check for placing (or resizing) a workload on a node:
    /// capacity plus host-port arbitration. `exclude` removes the workload
    /// itself from the sibling set on update. Returns the effective binding
    /// map. Caller must hold [`Self::node_lock`].
    pub async fn check_admission(
        &self,
        node_id: NodeId,
        exclude: Option<WorkloadId>,
        requested: Allocations,
        network_mode: NetworkMode,
        primary_port: u16,
        bindings: BTreeMap<u16, u16>,
    ) -> CoreResult<BTreeMap<u16, u16>> {
        let node = self
            .nodes
            .find_by_id(node_id)
            .await?
            .ok_or_else(|| CoreError::not_found("node"))?;

        let siblings: Vec<Workload> = self
            .workloads
            .list_by_node(node_id)
            .await?
            .into_iter()
            .filter(|w| Some(w.id) != exclude)
            .collect();

        check_capacity(&node, &siblings, requested, self.max_disk_mb)?;
        arbitrate_ports(&siblings, network_mode, primary_port, bindings)
    }

    /// Assign an address from the node's pool for `network_name` to the
    /// workload. Caller must hold [`Self::node_lock`].
    pub async fn allocate_ip(
        &self,
        node_id: NodeId,
        network_name: &str,
        workload: WorkloadId,
        requested: Option<IpAddr>,
    ) -> CoreResult<IpAddr> {
        let mut pool = self
            .pools
            .find_pool(node_id, network_name)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("ip pool for network {network_name}")))?;

        let addr = pick_ip(&pool, requested)?;
        pool.assign(addr, workload);
        self.pools.update_pool(&pool).await?;
        tracing::info!(%addr, %workload, network = %network_name, "allocated pool address");
        Ok(addr)
    }

    /// Return every address the workload holds. Idempotent.
    pub async fn release_ip(&self, workload: WorkloadId) -> CoreResult<Vec<IpAddr>> {
        let freed = self.pools.release_for(workload).await?;
        if !freed.is_empty() {
            tracing::info!(%workload, count = freed.len(), "released pool addresses");
        }
        Ok(freed)
    }
}
