// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared test harness: the full service stack on the in-memory backend
//! with a recording fake gateway.

use async_trait::async_trait;
use catalyst_core::application::access::{AccessEvaluator, SuspensionPolicy};
use catalyst_core::application::allocator::ResourceArbiter;
use catalyst_core::application::files::FileTreeService;
use catalyst_core::application::lifecycle::WorkloadLifecycleService;
use catalyst_core::application::provision::{
    CreateWorkloadRequest, WorkloadProvisioningService,
};
use catalyst_core::application::template_import::TemplateImporter;
use catalyst_core::application::transfer::{FsBlobStore, TransferCoordinator};
use catalyst_core::config::CoreConfig;
use catalyst_core::domain::access::PrincipalId;
use catalyst_core::domain::gateway::{AgentCommand, GatewayError, NodeGateway};
use catalyst_core::domain::ip_pool::IpPool;
use catalyst_core::domain::node::{Node, NodeId};
use catalyst_core::domain::template::{Template, TemplateId, TemplateVariable, VariableInput};
use catalyst_core::domain::workload::{
    Allocations, BackupMode, NetworkMode, RestartPolicy, WorkloadId,
};
use catalyst_core::infrastructure::event_bus::EventBus;
use catalyst_core::infrastructure::repositories::RepositoryBundle;
use catalyst_core::presentation::api::{app, AppState};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const OWNER: PrincipalId = PrincipalId(7);

/// Records every dispatched command instead of talking to a node.
#[derive(Default)]
pub struct FakeGateway {
    pub commands: Mutex<Vec<(NodeId, AgentCommand)>>,
    pub online: Mutex<HashSet<NodeId>>,
    pub streamed: Mutex<Vec<(NodeId, String, u64)>>,
    next_id: Mutex<u64>,
}

impl FakeGateway {
    pub fn set_online(&self, node: NodeId) {
        self.online.lock().insert(node);
    }

    pub fn commands_for(&self, node: NodeId) -> Vec<AgentCommand> {
        self.commands
            .lock()
            .iter()
            .filter(|(n, _)| *n == node)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn last_command(&self) -> Option<(NodeId, AgentCommand)> {
        self.commands.lock().last().cloned()
    }
}

#[async_trait]
impl NodeGateway for FakeGateway {
    async fn send(&self, node: NodeId, command: AgentCommand) -> Result<u64, GatewayError> {
        if !self.online.lock().contains(&node) {
            return Err(GatewayError::Unavailable);
        }
        let mut next = self.next_id.lock();
        *next += 1;
        self.commands.lock().push((node, command));
        Ok(*next)
    }

    async fn stream_to(
        &self,
        node: NodeId,
        target_path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, GatewayError> {
        let mut sink = Vec::new();
        reader
            .read_to_end(&mut sink)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        self.streamed.lock().push((node, target_path.to_string(), sink.len() as u64));
        Ok(sink.len() as u64)
    }

    fn is_online(&self, node: NodeId) -> bool {
        self.online.lock().contains(&node)
    }
}

pub struct Harness {
    pub config: Arc<CoreConfig>,
    pub repos: RepositoryBundle,
    pub gateway: Arc<FakeGateway>,
    pub event_bus: EventBus,
    pub lifecycle: Arc<WorkloadLifecycleService>,
    pub provisioning: Arc<WorkloadProvisioningService>,
    pub transfer: Arc<TransferCoordinator>,
    pub arbiter: Arc<ResourceArbiter>,
    pub files: FileTreeService,
    _data_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut CoreConfig)) -> Self {
        let data_dir = tempfile::tempdir().expect("tempdir");
        let mut config = CoreConfig {
            server_data_root: data_dir.path().join("servers"),
            sftp_root: data_dir.path().join("servers"),
            backups_root: data_dir.path().join("backups"),
            ..CoreConfig::default()
        };
        tweak(&mut config);
        let config = Arc::new(config);

        let repos = RepositoryBundle::in_memory();
        let gateway = Arc::new(FakeGateway::default());
        let event_bus = EventBus::with_default_capacity();

        let access = Arc::new(AccessEvaluator::new(
            repos.access.clone(),
            SuspensionPolicy::from_config(&config),
        ));
        let arbiter = Arc::new(ResourceArbiter::new(
            repos.nodes.clone(),
            repos.workloads.clone(),
            repos.ip_pools.clone(),
            config.max_disk_mb,
        ));
        let lifecycle = Arc::new(WorkloadLifecycleService::new(
            config.clone(),
            repos.workloads.clone(),
            repos.templates.clone(),
            repos.logs.clone(),
            repos.audit.clone(),
            access.clone(),
            gateway.clone(),
            event_bus.clone(),
        ));
        let provisioning = Arc::new(WorkloadProvisioningService::new(
            config.clone(),
            arbiter.clone(),
            repos.workloads.clone(),
            repos.templates.clone(),
            repos.access.clone(),
            repos.audit.clone(),
            access.clone(),
            gateway.clone(),
        ));
        let transfer = Arc::new(TransferCoordinator::new(
            config.clone(),
            repos.workloads.clone(),
            repos.nodes.clone(),
            repos.backups.clone(),
            repos.logs.clone(),
            arbiter.clone(),
            access.clone(),
            gateway.clone(),
            lifecycle.clone(),
            event_bus.clone(),
            Arc::new(FsBlobStore),
            None,
        ));
        let files = FileTreeService::new(&config.server_data_root);

        Self {
            config,
            repos,
            gateway,
            event_bus,
            lifecycle,
            provisioning,
            transfer,
            arbiter,
            files,
            _data_dir: data_dir,
        }
    }

    pub fn router(&self) -> axum::Router {
        app(Arc::new(AppState {
            provisioning: self.provisioning.clone(),
            lifecycle: self.lifecycle.clone(),
            transfer: self.transfer.clone(),
            files: self.files.clone(),
            access: Arc::new(AccessEvaluator::new(
                self.repos.access.clone(),
                SuspensionPolicy::from_config(&self.config),
            )),
            workloads: self.repos.workloads.clone(),
            nodes: self.repos.nodes.clone(),
            templates: self.repos.templates.clone(),
            importer: TemplateImporter::new(),
        }))
    }

    pub async fn seed_node(&self, id: i64, memory: u64, cpu: u32) -> NodeId {
        let node = Node::new(NodeId(id), format!("node-{id}"), format!("10.0.0.{id}"))
            .with_capacity(memory, cpu)
            .with_agent_key("0badc0de");
        let node = self.repos.nodes.insert(node).await.expect("node insert");
        let mut stored = node.clone();
        stored.online = true;
        self.repos.nodes.update(&stored).await.expect("node online");
        self.gateway.set_online(stored.id);
        stored.id
    }

    pub async fn seed_pool(&self, node: NodeId, network: &str, addrs: &[&str]) {
        self.repos
            .ip_pools
            .insert_pool(IpPool {
                id: 0,
                node_id: node,
                network_name: network.to_string(),
                addresses: addrs.iter().map(|a| a.parse().unwrap()).collect(),
                assignments: BTreeMap::new(),
            })
            .await
            .expect("pool insert");
    }

    pub async fn seed_template(&self) -> TemplateId {
        let mut template = Template::minimal(TemplateId(0), "minecraft", "ghcr.io/images/java:21");
        template.startup = "java -Xmx{{SERVER_MEMORY}}M -jar server.jar".into();
        template.variables.push(TemplateVariable {
            name: "SERVER_MEMORY".into(),
            description: "Heap in MiB".into(),
            default_value: "1024".into(),
            required: true,
            input: VariableInput::Number,
            rules: "required".into(),
        });
        self.repos.templates.insert(template).await.expect("template insert").id
    }

    pub fn create_request(
        &self,
        node: NodeId,
        template: TemplateId,
        primary_port: u16,
    ) -> CreateWorkloadRequest {
        CreateWorkloadRequest {
            name: "mc-1".into(),
            description: None,
            node_id: node,
            template_id: template,
            allocations: Allocations { memory_mb: 1024, cpu_cores: 2, disk_mb: 10240 },
            network_mode: NetworkMode::Bridge,
            network_name: None,
            primary_port,
            port_bindings: BTreeMap::new(),
            requested_ip: None,
            environment: BTreeMap::new(),
            restart_policy: RestartPolicy::OnFailure,
            max_crash_count: 3,
            backup_mode: BackupMode::Local,
        }
    }

    pub async fn workload(&self, id: WorkloadId) -> catalyst_core::domain::workload::Workload {
        self.repos.workloads.find_by_id(id).await.expect("load").expect("workload exists")
    }
}
