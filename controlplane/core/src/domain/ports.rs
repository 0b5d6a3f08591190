// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Port-binding map parsing and validation.
//!
//! Arbitration against sibling workloads lives in the resource arbiter;
//! this module owns the shape rules: port range, duplicate host ports, and
//! primary-binding presence.

use crate::domain::error::{CoreError, CoreResult};
use std::collections::BTreeMap;

/// Parse a caller-submitted string map into container-port -> host-port.
/// Each side must be an integer in `[1, 65535]`.
pub fn parse_bindings(raw: &BTreeMap<String, String>) -> CoreResult<BTreeMap<u16, u16>> {
    let mut out = BTreeMap::new();
    for (container, host) in raw {
        let container = parse_port(container)?;
        let host = parse_port(host)?;
        out.insert(container, host);
    }
    Ok(out)
}

fn parse_port(s: &str) -> CoreResult<u16> {
    let n: u32 = s
        .trim()
        .parse()
        .map_err(|_| CoreError::validation(format!("invalid port '{s}'")))?;
    if !(1..=65535).contains(&n) {
        return Err(CoreError::validation(format!("port {n} out of range 1-65535")));
    }
    Ok(n as u16)
}

/// Validate a binding map and guarantee the primary container-port maps to a
/// host port, defaulting to the same number when unspecified. Duplicate host
/// ports within the map are rejected. Removing the primary binding is
/// forbidden by construction.
pub fn validate_bindings(
    primary_port: u16,
    mut bindings: BTreeMap<u16, u16>,
) -> CoreResult<BTreeMap<u16, u16>> {
    if primary_port == 0 {
        return Err(CoreError::validation("primary port must be in 1-65535"));
    }
    bindings.entry(primary_port).or_insert(primary_port);

    let mut seen = std::collections::BTreeSet::new();
    for host in bindings.values() {
        if !seen.insert(*host) {
            return Err(CoreError::validation(format!(
                "host port {host} is bound more than once"
            )));
        }
    }
    Ok(bindings)
}

/// The host-port set a workload occupies on its node: its binding values,
/// or its primary port when it carries no explicit bindings.
pub fn occupied_host_ports(
    primary_port: u16,
    bindings: &BTreeMap<u16, u16>,
) -> Vec<u16> {
    if bindings.is_empty() {
        vec![primary_port]
    } else {
        bindings.values().copied().collect()
    }
}
