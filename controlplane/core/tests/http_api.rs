// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP surface seed scenarios: status codes follow the error-kind mapping.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use catalyst_core::domain::workload::WorkloadStatus;
use catalyst_core::presentation::api::PRINCIPAL_HEADER;
use common::{Harness, OWNER};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn call(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header(PRINCIPAL_HEADER, OWNER.0.to_string())
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn put(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .header(PRINCIPAL_HEADER, OWNER.0.to_string())
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(PRINCIPAL_HEADER, OWNER.0.to_string())
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn create_then_install_over_http() {
    let h = Arc::new(Harness::new());
    let node = h.seed_node(1, 4096, 4).await;
    h.seed_pool(node, "mc-lan-static", &["10.0.30.7"]).await;
    let template = h.seed_template().await;
    let router = h.router();

    let (status, body) = call(
        &router,
        post(
            "/servers",
            json!({
                "name": "mc-1",
                "nodeId": node.0,
                "templateId": template.0,
                "memory": 1024,
                "cpu": 2,
                "disk": 10240,
                "primaryPort": 25565,
                "network": "mc-lan-static"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "stopped");
    assert_eq!(body["data"]["primaryIp"], "10.0.30.7");

    let id = body["data"]["id"].as_i64().unwrap();
    let (status, body) = call(&router, post(&format!("/servers/{id}/install"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "installing");
}

#[tokio::test]
async fn port_conflict_maps_to_400() {
    let h = Arc::new(Harness::new());
    let node = h.seed_node(1, 8192, 8).await;
    let template = h.seed_template().await;
    let router = h.router();

    let (status, _) = call(
        &router,
        post(
            "/servers",
            json!({
                "name": "w1",
                "nodeId": node.0,
                "templateId": template.0,
                "memory": 1024, "cpu": 1, "disk": 1024,
                "primaryPort": 25565,
                "portBindings": { "25565": "25565", "25566": "25570" }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        &router,
        post(
            "/servers",
            json!({
                "name": "w2",
                "nodeId": node.0,
                "templateId": template.0,
                "memory": 1024, "cpu": 1, "disk": 1024,
                "primaryPort": 25570
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
    assert_eq!(body["success"], false);

    let (status, _) = call(
        &router,
        post(
            "/servers",
            json!({
                "name": "w3",
                "nodeId": node.0,
                "templateId": template.0,
                "memory": 1024, "cpu": 1, "disk": 1024,
                "primaryPort": 25567
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn stopped_gating_and_suspension_codes() {
    let h = Arc::new(Harness::new());
    let node = h.seed_node(1, 4096, 4).await;
    let template = h.seed_template().await;
    let router = h.router();

    let workload =
        h.provisioning.create(OWNER, h.create_request(node, template, 25565)).await.unwrap();
    let id = workload.id;

    h.lifecycle.start(OWNER, id).await.unwrap();
    h.lifecycle.clone().apply_status_update(id, WorkloadStatus::Running, None).await.unwrap();

    // Resize while running -> 409.
    let (status, _) =
        call(&router, put(&format!("/servers/{}", id.0), json!({ "allocatedMemoryMb": 2048 })))
            .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Suspend, then start -> 423.
    let (status, body) =
        call(&router, post(&format!("/servers/{}/suspend", id.0), json!({ "reason": "abuse" })))
            .await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["data"]["suspended"], true);
    assert!(body["data"]["suspendedAt"].is_string());

    let (status, _) = call(&router, post(&format!("/servers/{}/start", id.0), json!({}))).await;
    assert_eq!(status, StatusCode::LOCKED);

    let (status, body) =
        call(&router, post(&format!("/servers/{}/unsuspend", id.0), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "stopped");
    assert_eq!(body["data"]["suspended"], false);

    // Stopped now, so the resize lands.
    let (status, body) =
        call(&router, put(&format!("/servers/{}", id.0), json!({ "allocatedMemoryMb": 2048 })))
            .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["allocations"]["memory_mb"], 2048);
}

#[tokio::test]
async fn path_traversal_maps_to_400_without_touching_disk() {
    let h = Arc::new(Harness::new());
    let node = h.seed_node(1, 4096, 4).await;
    let template = h.seed_template().await;
    let router = h.router();

    let workload =
        h.provisioning.create(OWNER, h.create_request(node, template, 25565)).await.unwrap();

    let (status, body) = call(
        &router,
        get(&format!("/servers/{}/files?path=../../etc/passwd", workload.id.0)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
    assert_eq!(body["success"], false);

    // The failed request never created the workload's base directory.
    assert!(!h
        .config
        .server_data_root
        .join(workload.uuid.to_string())
        .exists());
}

#[tokio::test]
async fn missing_principal_is_unauthorized() {
    let h = Arc::new(Harness::new());
    let router = h.router();

    let request = Request::builder()
        .method("GET")
        .uri("/servers")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn unknown_workload_is_404() {
    let h = Arc::new(Harness::new());
    let router = h.router();
    let (status, _) = call(&router, get("/servers/999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
