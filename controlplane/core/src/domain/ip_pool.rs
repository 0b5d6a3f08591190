// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Per-node, per-network address pools for IPAM-mode workloads.

use crate::domain::node::NodeId;
use crate::domain::workload::WorkloadId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpPool {
    pub id: i64,
    pub node_id: NodeId,
    pub network_name: String,
    /// Every address the pool manages, free or assigned.
    pub addresses: Vec<IpAddr>,
    /// address -> holder. Absent addresses are free.
    #[serde(default)]
    pub assignments: BTreeMap<IpAddr, WorkloadId>,
}

impl IpPool {
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.addresses.contains(&addr)
    }

    pub fn is_free(&self, addr: IpAddr) -> bool {
        self.contains(addr) && !self.assignments.contains_key(&addr)
    }

    pub fn first_free(&self) -> Option<IpAddr> {
        self.addresses
            .iter()
            .copied()
            .find(|a| !self.assignments.contains_key(a))
    }

    pub fn assign(&mut self, addr: IpAddr, holder: WorkloadId) {
        self.assignments.insert(addr, holder);
    }

    /// Return every address held by `holder` to the free set. Idempotent.
    pub fn release_for(&mut self, holder: WorkloadId) -> usize {
        let before = self.assignments.len();
        self.assignments.retain(|_, w| *w != holder);
        before - self.assignments.len()
    }

    pub fn holder_of(&self, addr: IpAddr) -> Option<WorkloadId> {
        self.assignments.get(&addr).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> IpPool {
        IpPool {
            id: 1,
            node_id: NodeId(1),
            network_name: "mc-lan-static".into(),
            addresses: vec![
                "10.0.30.5".parse().unwrap(),
                "10.0.30.6".parse().unwrap(),
            ],
            assignments: BTreeMap::new(),
        }
    }

    #[test]
    fn assignment_and_idempotent_release() {
        let mut p = pool();
        let a: IpAddr = "10.0.30.5".parse().unwrap();

        assert!(p.is_free(a));
        p.assign(a, WorkloadId(9));
        assert!(!p.is_free(a));
        assert_eq!(p.holder_of(a), Some(WorkloadId(9)));
        assert_eq!(p.first_free(), Some("10.0.30.6".parse().unwrap()));

        assert_eq!(p.release_for(WorkloadId(9)), 1);
        assert_eq!(p.release_for(WorkloadId(9)), 0);
        assert!(p.is_free(a));
    }

    #[test]
    fn foreign_address_is_not_free() {
        let p = pool();
        assert!(!p.is_free("192.168.1.1".parse().unwrap()));
    }
}
