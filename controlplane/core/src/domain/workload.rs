// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workload aggregate and the lifecycle state machine.
//!
//! A workload is one runnable container-based game-server instance. Status
//! transitions are split in two: `WorkloadStatus::permits` gates what the
//! control plane may *initiate*, and `WorkloadStatus::accepts_report` gates
//! which agent-reported refinements are legal from the current state. Both
//! sides of the split are driven through the per-workload reducer so no
//! transition can be observed outside the table.

use crate::domain::access::PrincipalId;
use crate::domain::node::NodeId;
use crate::domain::template::{Template, TemplateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Environment key for the workload's on-disk directory, computed last.
pub const ENV_SERVER_DIR: &str = "SERVER_DIR";
/// Environment key for the IPAM-assigned primary address, computed last.
pub const ENV_NETWORK_IP: &str = "CATALYST_NETWORK_IP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadId(pub i64);

impl std::fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    Stopped,
    Installing,
    Installed,
    Starting,
    Running,
    Stopping,
    Crashed,
    Suspended,
    Transferring,
}

impl WorkloadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadStatus::Stopped => "stopped",
            WorkloadStatus::Installing => "installing",
            WorkloadStatus::Installed => "installed",
            WorkloadStatus::Starting => "starting",
            WorkloadStatus::Running => "running",
            WorkloadStatus::Stopping => "stopping",
            WorkloadStatus::Crashed => "crashed",
            WorkloadStatus::Suspended => "suspended",
            WorkloadStatus::Transferring => "transferring",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "stopped" => WorkloadStatus::Stopped,
            "installing" => WorkloadStatus::Installing,
            "installed" => WorkloadStatus::Installed,
            "starting" => WorkloadStatus::Starting,
            "running" => WorkloadStatus::Running,
            "stopping" => WorkloadStatus::Stopping,
            "crashed" => WorkloadStatus::Crashed,
            "suspended" => WorkloadStatus::Suspended,
            "transferring" => WorkloadStatus::Transferring,
            _ => return None,
        })
    }

    /// Control-plane-initiated transition table.
    pub fn permits(self, action: LifecycleAction) -> bool {
        use LifecycleAction::*;
        use WorkloadStatus::*;
        match action {
            Install => matches!(self, Stopped | Crashed),
            // `installed` is the post-install resting state; it is
            // start-eligible, otherwise a freshly installed workload could
            // never be brought up.
            Start => matches!(self, Stopped | Crashed | Installed),
            Stop => matches!(self, Starting | Running),
            Restart => matches!(self, Running),
            Suspend => !matches!(self, Transferring),
            Unsuspend => matches!(self, Suspended),
            Transfer => matches!(self, Stopped),
        }
    }

    /// Target state entered when an action is accepted.
    pub fn action_target(action: LifecycleAction) -> WorkloadStatus {
        use LifecycleAction::*;
        match action {
            Install => WorkloadStatus::Installing,
            Start => WorkloadStatus::Starting,
            Stop | Restart => WorkloadStatus::Stopping,
            Suspend => WorkloadStatus::Suspended,
            Unsuspend => WorkloadStatus::Stopped,
            Transfer => WorkloadStatus::Transferring,
        }
    }

    /// Agent-reported refinement table. Returns the state to enter, or `None`
    /// when the report is illegal from the current state and must be dropped.
    pub fn accepts_report(self, reported: WorkloadStatus) -> Option<WorkloadStatus> {
        use WorkloadStatus::*;
        match (self, reported) {
            (Starting, Running) => Some(Running),
            (Starting | Running, Crashed) => Some(Crashed),
            (Stopping, Stopped) => Some(Stopped),
            // Install completion: the agent reports `installed`, after which
            // the workload is ready to start. A failed install surfaces as a
            // crash so the crash counter and restart policy apply.
            (Installing, Installed) => Some(Installed),
            (Installing, Crashed) => Some(Crashed),
            (Installed, Stopped) => Some(Stopped),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Install,
    Start,
    Stop,
    Restart,
    Suspend,
    Unsuspend,
    Transfer,
}

impl LifecycleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleAction::Install => "install",
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Restart => "restart",
            LifecycleAction::Suspend => "suspend",
            LifecycleAction::Unsuspend => "unsuspend",
            LifecycleAction::Transfer => "transfer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkMode {
    Bridge,
    MacvlanDhcp,
    MacvlanStatic,
}

impl NetworkMode {
    /// True when the control plane assigns the primary IP from a pool.
    /// `macvlan-dhcp` hands addressing to the LAN's DHCP stack, so only the
    /// static variant is pool-managed.
    pub fn is_ipam(self) -> bool {
        matches!(self, NetworkMode::MacvlanStatic)
    }

    /// True when container ports are published onto host ports and therefore
    /// participate in per-node host-port arbitration.
    pub fn uses_host_ports(self) -> bool {
        matches!(self, NetworkMode::Bridge)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Always,
    OnFailure,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    Local,
    S3,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Allocations {
    pub memory_mb: u64,
    pub cpu_cores: u32,
    pub disk_mb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suspension {
    pub suspended_at: DateTime<Utc>,
    pub suspended_by: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub id: WorkloadId,
    /// Opaque identity used as the on-disk directory name and SFTP principal.
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner_id: PrincipalId,
    pub node_id: NodeId,
    #[serde(default)]
    pub location: Option<String>,
    pub template_id: TemplateId,
    pub allocations: Allocations,
    pub network_mode: NetworkMode,
    /// Named macvlan network the workload attaches to; `None` in bridge mode.
    #[serde(default)]
    pub network_name: Option<String>,
    pub primary_port: u16,
    /// container-port -> host-port. Always contains `primary_port`.
    pub port_bindings: BTreeMap<u16, u16>,
    #[serde(default)]
    pub primary_ip: Option<IpAddr>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub status: WorkloadStatus,
    #[serde(default)]
    pub crash_count: u32,
    #[serde(default)]
    pub last_crash_at: Option<DateTime<Utc>>,
    pub restart_policy: RestartPolicy,
    pub max_crash_count: u32,
    pub backup_mode: BackupMode,
    #[serde(default)]
    pub backup_retention_count: u32,
    #[serde(default)]
    pub backup_retention_days: u32,
    #[serde(default)]
    pub suspension: Option<Suspension>,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workload {
    pub fn is_suspended(&self) -> bool {
        self.suspension.is_some()
    }

    /// The workload's chroot base under the configured data root.
    pub fn data_dir(&self, data_root: &Path) -> PathBuf {
        data_root.join(self.uuid.to_string())
    }

    /// Compose the environment the agent sees for install/start/restart.
    ///
    /// Template variable defaults first, then the workload's own environment
    /// (right-hand side wins), then the two computed keys which override
    /// everything.
    pub fn compose_environment(
        &self,
        template: &Template,
        data_root: &Path,
    ) -> BTreeMap<String, String> {
        let mut env = template.default_environment();
        env.extend(self.environment.clone());
        env.insert(
            ENV_SERVER_DIR.to_string(),
            self.data_dir(data_root).display().to_string(),
        );
        if let Some(ip) = self.primary_ip {
            env.insert(ENV_NETWORK_IP.to_string(), ip.to_string());
        }
        env
    }

    pub fn record_crash(&mut self, at: DateTime<Utc>) {
        self.crash_count += 1;
        self.last_crash_at = Some(at);
    }

    pub fn reset_crash_count(&mut self) {
        self.crash_count = 0;
        self.last_crash_at = None;
    }

    /// Whether the crash-restart policy wants an automatic start right now.
    pub fn wants_auto_restart(&self) -> bool {
        match self.restart_policy {
            RestartPolicy::Never => false,
            RestartPolicy::Always | RestartPolicy::OnFailure => {
                self.crash_count <= self.max_crash_count
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub(crate) fn workload() -> Workload {
        let now = Utc::now();
        Workload {
            id: WorkloadId(1),
            uuid: Uuid::new_v4(),
            name: "mc-1".into(),
            description: None,
            owner_id: PrincipalId(7),
            node_id: NodeId(1),
            location: None,
            template_id: TemplateId(1),
            allocations: Allocations { memory_mb: 1024, cpu_cores: 2, disk_mb: 10240 },
            network_mode: NetworkMode::Bridge,
            network_name: None,
            primary_port: 25565,
            port_bindings: BTreeMap::from([(25565, 25565)]),
            primary_ip: None,
            environment: BTreeMap::new(),
            status: WorkloadStatus::Stopped,
            crash_count: 0,
            last_crash_at: None,
            restart_policy: RestartPolicy::OnFailure,
            max_crash_count: 3,
            backup_mode: BackupMode::Local,
            backup_retention_count: 3,
            backup_retention_days: 14,
            suspension: None,
            container_id: None,
            container_name: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_matches_lifecycle_contract() {
        use LifecycleAction::*;
        use WorkloadStatus::*;

        assert!(Stopped.permits(Install));
        assert!(Crashed.permits(Install));
        assert!(!Running.permits(Install));

        assert!(Stopped.permits(Start));
        assert!(Crashed.permits(Start));
        assert!(Installed.permits(Start));
        assert!(!Installing.permits(Start));

        assert!(Starting.permits(Stop));
        assert!(Running.permits(Stop));
        assert!(!Stopped.permits(Stop));

        assert!(Running.permits(Restart));
        assert!(!Starting.permits(Restart));

        for s in [Stopped, Installing, Installed, Starting, Running, Stopping, Crashed, Suspended] {
            assert!(s.permits(Suspend), "{s} should allow suspend");
        }
        assert!(!Transferring.permits(Suspend));

        assert!(Suspended.permits(Unsuspend));
        assert!(!Stopped.permits(Unsuspend));

        assert!(Stopped.permits(Transfer));
        assert!(!Running.permits(Transfer));
    }

    #[test]
    fn report_refinements() {
        use WorkloadStatus::*;
        assert_eq!(Starting.accepts_report(Running), Some(Running));
        assert_eq!(Running.accepts_report(Crashed), Some(Crashed));
        assert_eq!(Starting.accepts_report(Crashed), Some(Crashed));
        assert_eq!(Stopping.accepts_report(Stopped), Some(Stopped));
        // Illegal reports are dropped.
        assert_eq!(Stopped.accepts_report(Running), None);
        assert_eq!(Running.accepts_report(Stopped), None);
    }

    #[test]
    fn environment_composition_order() {
        use crate::domain::template::{Template, TemplateVariable, VariableInput};

        let mut template = Template::minimal(TemplateId(1), "vanilla", "game:latest");
        template.variables.push(TemplateVariable {
            name: "SERVER_MEMORY".into(),
            description: "Heap size".into(),
            default_value: "1024".into(),
            required: true,
            input: VariableInput::Number,
            rules: "required|integer".into(),
        });
        template.variables.push(TemplateVariable {
            name: "MOTD".into(),
            description: "Message of the day".into(),
            default_value: "hello".into(),
            required: false,
            input: VariableInput::Text,
            rules: String::new(),
        });

        let mut w = super::testutil::workload();
        w.environment.insert("MOTD".into(), "welcome".into());
        // A stale explicit SERVER_DIR must lose to the computed key.
        w.environment.insert(ENV_SERVER_DIR.into(), "/elsewhere".into());
        w.primary_ip = Some("10.0.30.5".parse().unwrap());

        let env = w.compose_environment(&template, Path::new("/srv/catalyst"));
        assert_eq!(env["SERVER_MEMORY"], "1024");
        assert_eq!(env["MOTD"], "welcome");
        assert_eq!(env[ENV_SERVER_DIR], format!("/srv/catalyst/{}", w.uuid));
        assert_eq!(env[ENV_NETWORK_IP], "10.0.30.5");
    }

    #[test]
    fn crash_bookkeeping() {
        let mut w = super::testutil::workload();
        w.restart_policy = RestartPolicy::OnFailure;
        w.max_crash_count = 2;

        w.record_crash(Utc::now());
        assert_eq!(w.crash_count, 1);
        assert!(w.wants_auto_restart());

        w.record_crash(Utc::now());
        w.record_crash(Utc::now());
        assert_eq!(w.crash_count, 3);
        assert!(!w.wants_auto_restart());

        w.reset_crash_count();
        assert_eq!(w.crash_count, 0);
        assert!(w.last_crash_at.is_none());

        w.restart_policy = RestartPolicy::Never;
        w.record_crash(Utc::now());
        assert!(!w.wants_auto_restart());
    }
}
