// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP surface for the core operations.
//!
//! Thin JSON layer: parse, resolve the authenticated principal (installed
//! as a header by the outer auth proxy), call the service, map the error
//! kind to a status code. Response shape is `{success, data?, error?}`.

use crate::application::access::{AccessEvaluator, SuspensionGate};
use crate::application::files::FileTreeService;
use crate::application::lifecycle::WorkloadLifecycleService;
use crate::application::provision::{
    CreateWorkloadRequest, UpdateWorkloadRequest, WorkloadProvisioningService,
};
use crate::application::template_import::TemplateImporter;
use crate::application::transfer::TransferCoordinator;
use crate::domain::access::{permissions, PrincipalId};
use crate::domain::error::{CoreError, CoreResult};
use crate::domain::node::NodeId;
use crate::domain::repository::{NodeRepository, TemplateRepository, WorkloadRepository};
use crate::domain::template::TemplateId;
use crate::domain::workload::{
    Allocations, BackupMode, NetworkMode, RestartPolicy, Workload, WorkloadId,
};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Header the auth proxy sets after authenticating the caller.
pub const PRINCIPAL_HEADER: &str = "x-principal-id";

pub struct AppState {
    pub provisioning: Arc<WorkloadProvisioningService>,
    pub lifecycle: Arc<WorkloadLifecycleService>,
    pub transfer: Arc<TransferCoordinator>,
    pub files: FileTreeService,
    pub access: Arc<AccessEvaluator>,
    pub workloads: Arc<dyn WorkloadRepository>,
    pub nodes: Arc<dyn NodeRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub importer: TemplateImporter,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/servers", post(create_server).get(list_servers))
        .route("/servers/{id}", get(get_server).put(update_server).delete(delete_server))
        .route("/servers/{id}/install", post(install_server))
        .route("/servers/{id}/start", post(start_server))
        .route("/servers/{id}/stop", post(stop_server))
        .route("/servers/{id}/restart", post(restart_server))
        .route("/servers/{id}/suspend", post(suspend_server))
        .route("/servers/{id}/unsuspend", post(unsuspend_server))
        .route("/servers/{id}/reset-crash-count", post(reset_crash_count))
        .route("/servers/{id}/transfer", post(transfer_server))
        .route("/servers/{id}/files", get(list_files).delete(delete_path))
        .route("/servers/{id}/files/read", get(read_file))
        .route("/servers/{id}/files/write", post(write_file))
        .route("/servers/{id}/files/create", post(create_file))
        .route("/servers/{id}/files/mkdir", post(make_dir))
        .route("/servers/{id}/files/rename", post(rename_path))
        .route("/servers/{id}/files/chmod", post(chmod_path))
        .route("/servers/{id}/files/compress", post(compress_paths))
        .route("/servers/{id}/files/decompress", post(decompress_archive))
        .route("/templates", post(create_template).get(list_templates))
        .route("/nodes", post(create_node).get(list_nodes))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn ok(data: serde_json::Value) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

fn created(data: serde_json::Value) -> Response {
    (StatusCode::CREATED, Json(json!({ "success": true, "data": data }))).into_response()
}

fn fail(e: CoreError) -> Response {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "success": false, "error": e.to_string() }))).into_response()
}

fn principal(headers: &HeaderMap) -> CoreResult<PrincipalId> {
    headers
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .map(PrincipalId)
        .ok_or(CoreError::AuthFailed)
}

/// Public projection of a workload row.
fn server_json(w: &Workload) -> serde_json::Value {
    json!({
        "id": w.id.0,
        "uuid": w.uuid,
        "name": w.name,
        "description": w.description,
        "nodeId": w.node_id.0,
        "templateId": w.template_id.0,
        "status": w.status,
        "allocations": w.allocations,
        "networkMode": w.network_mode,
        "network": w.network_name,
        "primaryPort": w.primary_port,
        "portBindings": w.port_bindings,
        "primaryIp": w.primary_ip,
        "environment": w.environment,
        "restartPolicy": w.restart_policy,
        "crashCount": w.crash_count,
        "suspended": w.is_suspended(),
        "suspendedAt": w.suspension.as_ref().map(|s| s.suspended_at),
        "containerId": w.container_id,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateServerRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    node_id: i64,
    template_id: i64,
    memory: u64,
    cpu: u32,
    disk: u64,
    #[serde(default)]
    network_mode: Option<NetworkMode>,
    /// Named network for macvlan modes.
    #[serde(default)]
    network: Option<String>,
    primary_port: u16,
    #[serde(default)]
    port_bindings: BTreeMap<String, String>,
    #[serde(default)]
    requested_ip: Option<IpAddr>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    #[serde(default)]
    restart_policy: Option<RestartPolicy>,
    #[serde(default)]
    max_crash_count: Option<u32>,
    #[serde(default)]
    backup_mode: Option<BackupMode>,
}

async fn create_server(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateServerRequest>,
) -> Response {
    let principal = match principal(&headers) {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    let bindings = match crate::domain::ports::parse_bindings(&body.port_bindings) {
        Ok(b) => b,
        Err(e) => return fail(e),
    };

    // The named network implies the static macvlan mode unless the caller
    // says otherwise.
    let network_mode = body.network_mode.unwrap_or(if body.network.is_some() {
        NetworkMode::MacvlanStatic
    } else {
        NetworkMode::Bridge
    });

    let request = CreateWorkloadRequest {
        name: body.name,
        description: body.description,
        node_id: NodeId(body.node_id),
        template_id: TemplateId(body.template_id),
        allocations: Allocations { memory_mb: body.memory, cpu_cores: body.cpu, disk_mb: body.disk },
        network_mode,
        network_name: body.network,
        primary_port: body.primary_port,
        port_bindings: bindings,
        requested_ip: body.requested_ip,
        environment: body.environment,
        restart_policy: body.restart_policy.unwrap_or(RestartPolicy::OnFailure),
        max_crash_count: body.max_crash_count.unwrap_or(3),
        backup_mode: body.backup_mode.unwrap_or(BackupMode::Local),
    };

    match state.provisioning.create(principal, request).await {
        Ok(workload) => created(server_json(&workload)),
        Err(e) => fail(e),
    }
}

async fn list_servers(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let principal = match principal(&headers) {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    let all = match state.workloads.list_all().await {
        Ok(all) => all,
        Err(e) => return fail(e.into()),
    };

    let mut visible = Vec::new();
    for workload in &all {
        let allowed = state
            .access
            .check(principal, workload, permissions::SERVER_VIEW, SuspensionGate::Read)
            .await
            .is_ok();
        if allowed {
            visible.push(server_json(workload));
        }
    }
    ok(json!(visible))
}

async fn load_checked(
    state: &AppState,
    headers: &HeaderMap,
    id: i64,
    token: &str,
    gate: SuspensionGate,
) -> CoreResult<(PrincipalId, Workload)> {
    let principal = principal(headers)?;
    let workload = state
        .workloads
        .find_by_id(WorkloadId(id))
        .await?
        .ok_or_else(|| CoreError::not_found("workload"))?;
    state.access.check(principal, &workload, token, gate).await?;
    Ok((principal, workload))
}

async fn get_server(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    match load_checked(&state, &headers, id, permissions::SERVER_VIEW, SuspensionGate::Read).await
    {
        Ok((_, workload)) => ok(server_json(&workload)),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UpdateServerRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "memory")]
    allocated_memory_mb: Option<u64>,
    #[serde(default, alias = "cpu")]
    allocated_cpu_cores: Option<u32>,
    #[serde(default, alias = "disk")]
    allocated_disk_mb: Option<u64>,
    #[serde(default)]
    primary_port: Option<u16>,
    #[serde(default)]
    port_bindings: Option<BTreeMap<String, String>>,
    #[serde(default)]
    environment: Option<BTreeMap<String, String>>,
    #[serde(default)]
    restart_policy: Option<RestartPolicy>,
    #[serde(default)]
    max_crash_count: Option<u32>,
}

async fn update_server(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<UpdateServerRequest>,
) -> Response {
    let principal = match principal(&headers) {
        Ok(p) => p,
        Err(e) => return fail(e),
    };

    let current = match state.workloads.find_by_id(WorkloadId(id)).await {
        Ok(Some(w)) => w,
        Ok(None) => return fail(CoreError::not_found("workload")),
        Err(e) => return fail(e.into()),
    };

    let allocations = if body.allocated_memory_mb.is_some()
        || body.allocated_cpu_cores.is_some()
        || body.allocated_disk_mb.is_some()
    {
        Some(Allocations {
            memory_mb: body.allocated_memory_mb.unwrap_or(current.allocations.memory_mb),
            cpu_cores: body.allocated_cpu_cores.unwrap_or(current.allocations.cpu_cores),
            disk_mb: body.allocated_disk_mb.unwrap_or(current.allocations.disk_mb),
        })
    } else {
        None
    };

    let port_bindings = match body.port_bindings {
        Some(raw) => match crate::domain::ports::parse_bindings(&raw) {
            Ok(parsed) => Some(parsed),
            Err(e) => return fail(e),
        },
        None => None,
    };

    let request = UpdateWorkloadRequest {
        name: body.name,
        description: body.description,
        allocations,
        primary_port: body.primary_port,
        port_bindings,
        environment: body.environment,
        restart_policy: body.restart_policy,
        max_crash_count: body.max_crash_count,
    };

    match state.provisioning.update(principal, WorkloadId(id), request).await {
        Ok(workload) => ok(server_json(&workload)),
        Err(e) => fail(e),
    }
}

async fn delete_server(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    let principal = match principal(&headers) {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    match state.provisioning.delete(principal, WorkloadId(id)).await {
        Ok(()) => ok(json!({ "deleted": true })),
        Err(e) => fail(e),
    }
}

macro_rules! lifecycle_handler {
    ($name:ident, $method:ident) => {
        async fn $name(
            State(state): State<Arc<AppState>>,
            headers: HeaderMap,
            Path(id): Path<i64>,
        ) -> Response {
            let principal = match principal(&headers) {
                Ok(p) => p,
                Err(e) => return fail(e),
            };
            match state.lifecycle.$method(principal, WorkloadId(id)).await {
                Ok(workload) => ok(server_json(&workload)),
                Err(e) => fail(e),
            }
        }
    };
}

lifecycle_handler!(install_server, install);
lifecycle_handler!(start_server, start);
lifecycle_handler!(stop_server, stop);
lifecycle_handler!(restart_server, restart);
lifecycle_handler!(unsuspend_server, unsuspend);
lifecycle_handler!(reset_crash_count, reset_crash_count);

#[derive(Deserialize, Default)]
struct SuspendRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn suspend_server(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<SuspendRequest>,
) -> Response {
    let principal = match principal(&headers) {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    let reason = body.reason.unwrap_or_else(|| "suspended by operator".to_string());
    match state.lifecycle.suspend(principal, WorkloadId(id), reason).await {
        Ok(workload) => ok(server_json(&workload)),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest {
    target_node_id: i64,
    #[serde(default)]
    mode: Option<BackupMode>,
}

async fn transfer_server(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<TransferRequest>,
) -> Response {
    let principal = match principal(&headers) {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    let mode = body.mode.unwrap_or(BackupMode::Stream);
    match state
        .transfer
        .transfer(principal, WorkloadId(id), NodeId(body.target_node_id), mode)
        .await
    {
        Ok(workload) => ok(server_json(&workload)),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
struct PathQuery {
    #[serde(default)]
    path: String,
}

async fn list_files(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<PathQuery>,
) -> Response {
    let workload = match load_checked(&state, &headers, id, permissions::FILE_READ, SuspensionGate::Read)
        .await
    {
        Ok((_, w)) => w,
        Err(e) => return fail(e),
    };
    match state.files.list(workload.uuid, &query.path).await {
        Ok(entries) => ok(json!(entries)),
        Err(e) => fail(e),
    }
}

async fn read_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<PathQuery>,
) -> Response {
    let workload = match load_checked(&state, &headers, id, permissions::FILE_READ, SuspensionGate::Read)
        .await
    {
        Ok((_, w)) => w,
        Err(e) => return fail(e),
    };
    match state.files.read_file(workload.uuid, &query.path).await {
        Ok(bytes) => ok(json!({
            "path": query.path,
            "contents": String::from_utf8_lossy(&bytes),
        })),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
struct WriteFileRequest {
    path: String,
    contents: String,
}

async fn write_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<WriteFileRequest>,
) -> Response {
    let workload = match load_checked(
        &state,
        &headers,
        id,
        permissions::FILE_WRITE,
        SuspensionGate::Mutation,
    )
    .await
    {
        Ok((_, w)) => w,
        Err(e) => return fail(e),
    };
    match state.files.write_file(workload.uuid, &body.path, body.contents.as_bytes()).await {
        Ok(()) => ok(json!({ "written": body.path })),
        Err(e) => fail(e),
    }
}

async fn create_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<PathQuery>,
) -> Response {
    let workload = match load_checked(
        &state,
        &headers,
        id,
        permissions::FILE_WRITE,
        SuspensionGate::Mutation,
    )
    .await
    {
        Ok((_, w)) => w,
        Err(e) => return fail(e),
    };
    match state.files.create_file(workload.uuid, &body.path).await {
        Ok(()) => ok(json!({ "created": body.path })),
        Err(e) => fail(e),
    }
}

async fn make_dir(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<PathQuery>,
) -> Response {
    let workload = match load_checked(
        &state,
        &headers,
        id,
        permissions::FILE_WRITE,
        SuspensionGate::Mutation,
    )
    .await
    {
        Ok((_, w)) => w,
        Err(e) => return fail(e),
    };
    match state.files.create_dir(workload.uuid, &body.path).await {
        Ok(()) => ok(json!({ "created": body.path })),
        Err(e) => fail(e),
    }
}

async fn delete_path(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<PathQuery>,
) -> Response {
    let workload = match load_checked(
        &state,
        &headers,
        id,
        permissions::FILE_DELETE,
        SuspensionGate::Mutation,
    )
    .await
    {
        Ok((_, w)) => w,
        Err(e) => return fail(e),
    };
    match state.files.delete_recursive(workload.uuid, &query.path).await {
        Ok(()) => ok(json!({ "deleted": query.path })),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
struct RenameRequest {
    from: String,
    to: String,
}

async fn rename_path(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<RenameRequest>,
) -> Response {
    let workload = match load_checked(
        &state,
        &headers,
        id,
        permissions::FILE_WRITE,
        SuspensionGate::Mutation,
    )
    .await
    {
        Ok((_, w)) => w,
        Err(e) => return fail(e),
    };
    match state.files.rename(workload.uuid, &body.from, &body.to).await {
        Ok(()) => ok(json!({ "renamed": body.to })),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
struct ChmodRequest {
    path: String,
    mode: String,
}

async fn chmod_path(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<ChmodRequest>,
) -> Response {
    let workload = match load_checked(
        &state,
        &headers,
        id,
        permissions::FILE_WRITE,
        SuspensionGate::Mutation,
    )
    .await
    {
        Ok((_, w)) => w,
        Err(e) => return fail(e),
    };
    match state.files.chmod(workload.uuid, &body.path, &body.mode).await {
        Ok(()) => ok(json!({ "path": body.path, "mode": body.mode })),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
struct CompressRequest {
    paths: Vec<String>,
    archive: String,
}

async fn compress_paths(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<CompressRequest>,
) -> Response {
    let workload = match load_checked(
        &state,
        &headers,
        id,
        permissions::FILE_WRITE,
        SuspensionGate::Mutation,
    )
    .await
    {
        Ok((_, w)) => w,
        Err(e) => return fail(e),
    };
    match state.files.compress(workload.uuid, body.paths, &body.archive).await {
        Ok(entry) => ok(json!(entry)),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
struct DecompressRequest {
    archive: String,
    target: String,
}

async fn decompress_archive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<DecompressRequest>,
) -> Response {
    let workload = match load_checked(
        &state,
        &headers,
        id,
        permissions::FILE_WRITE,
        SuspensionGate::Mutation,
    )
    .await
    {
        Ok((_, w)) => w,
        Err(e) => return fail(e),
    };
    match state.files.decompress(workload.uuid, &body.archive, &body.target).await {
        Ok(()) => ok(json!({ "extracted": body.target })),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
struct CreateTemplateRequest {
    /// Raw template document in any accepted dialect.
    document: String,
}

async fn create_template(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateTemplateRequest>,
) -> Response {
    if let Err(e) = principal(&headers) {
        return fail(e);
    }
    let template = match state.importer.import(&body.document) {
        Ok(t) => t,
        Err(e) => return fail(e.into()),
    };
    match state.templates.insert(template).await {
        Ok(stored) => created(json!(stored)),
        Err(e) => fail(e.into()),
    }
}

async fn list_templates(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(e) = principal(&headers) {
        return fail(e);
    }
    match state.templates.list_all().await {
        Ok(templates) => ok(json!(templates)),
        Err(e) => fail(e.into()),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateNodeRequest {
    name: String,
    address: String,
    max_memory_mb: u64,
    max_cpu_cores: u32,
    agent_key: String,
}

async fn create_node(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateNodeRequest>,
) -> Response {
    if let Err(e) = principal(&headers) {
        return fail(e);
    }
    let node = crate::domain::node::Node::new(NodeId(0), body.name, body.address)
        .with_capacity(body.max_memory_mb, body.max_cpu_cores)
        .with_agent_key(body.agent_key);
    match state.nodes.insert(node).await {
        Ok(stored) => created(json!({
            "id": stored.id.0,
            "name": stored.name,
            "address": stored.address,
            "online": stored.online,
        })),
        Err(e) => fail(e.into()),
    }
}

async fn list_nodes(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(e) = principal(&headers) {
        return fail(e);
    }
    match state.nodes.list_all().await {
        Ok(nodes) => {
            let view: Vec<_> = nodes
                .iter()
                .map(|n| {
                    json!({
                        "id": n.id.0,
                        "name": n.name,
                        "address": n.address,
                        "maxMemoryMb": n.max_memory_mb,
                        "maxCpuCores": n.max_cpu_cores,
                        "online": n.online,
                        "lastSeenAt": n.last_seen_at,
                    })
                })
                .collect();
            ok(json!(view))
        }
        Err(e) => fail(e.into()),
    }
}
