//! Integration tests for the instance lifecycle endpoints

mod common;

use axum::http::StatusCode;
use common::{auth_headers, extract_json_body, TestClient};
use serde_json::{json, Value};
use std::sync::Arc;
use ws_api::routes::instances::InstanceResponse;
use ws_orchestrator::{Clock, InstanceStatus};
use ws_provider::mock::MockBackend;
use ws_provider::BackendKind;

#[tokio::test]
async fn test_create_instance_endpoint() {
    let (client, backend) = TestClient::new().await;

    let response = client
        .post(
            "/api/v1/instances",
            &json!({ "kind": "notebook", "ttl_seconds": 3600 }),
            Some(auth_headers("testuser")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let created: InstanceResponse = extract_json_body(response).await;
    let instance = &created.instance;
    assert_eq!(instance.owner_id, "testuser");
    assert_eq!(instance.status, InstanceStatus::Stopped);
    assert!(instance.endpoint.is_none());
    assert_eq!(created.access_path, format!("/workspaces/{}", instance.id));
    assert_eq!(
        instance.ttl_deadline,
        client.harness.clock.now() + chrono::Duration::hours(1)
    );
    assert_eq!(backend.launch_count(), 0);
}

#[tokio::test]
async fn test_create_instance_without_auth_fails() {
    let (client, _) = TestClient::new().await;

    let response = client
        .post("/api/v1/instances", &json!({ "kind": "editor" }), None)
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_instance_rejects_ttl_over_limit() {
    let (client, _) = TestClient::new().await;

    let response = client
        .post(
            "/api/v1/instances",
            &json!({ "kind": "editor", "ttl_seconds": 7 * 24 * 3600 }),
            Some(auth_headers("testuser")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = extract_json_body(response).await;
    assert_eq!(body["retryable"], false);
    assert!(body["error"].as_str().unwrap().contains("ttl"));
}

#[tokio::test]
async fn test_list_instances_only_returns_own() {
    let (client, _) = TestClient::new().await;
    client.create_instance("alice", "editor").await;
    client.create_instance("alice", "notebook").await;
    client.create_instance("bob", "editor").await;

    let response = client
        .get("/api/v1/instances", Some(auth_headers("alice")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let instances: Vec<InstanceResponse> = extract_json_body(response).await;
    assert_eq!(instances.len(), 2);
    assert!(instances.iter().all(|i| i.instance.owner_id == "alice"));
}

#[tokio::test]
async fn test_get_instance_of_another_user_is_forbidden() {
    let (client, _) = TestClient::new().await;
    let created = client.create_instance("alice", "editor").await;

    let uri = format!("/api/v1/instances/{}", created.instance.id);
    let response = client.get(&uri, Some(auth_headers("bob"))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client.get(&uri, Some(auth_headers("alice"))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_get_unknown_instance_is_not_found() {
    let (client, _) = TestClient::new().await;

    let response = client
        .get("/api/v1/instances/does-not-exist", Some(auth_headers("alice")))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_then_stop() {
    let (client, backend) = TestClient::new().await;
    let running = client.running_instance("alice", "editor").await;
    let id = running.instance.id.clone();

    assert_eq!(running.instance.status, InstanceStatus::Running);
    assert!(running.instance.endpoint.is_some());
    assert!(running.instance.launch_handle.is_some());

    // A second start is answered with the running instance, not a second launch
    let response = client
        .post_empty(
            &format!("/api/v1/instances/{id}/start"),
            Some(auth_headers("alice")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(backend.launch_count(), 1);

    let response = client
        .post_empty(
            &format!("/api/v1/instances/{id}/stop"),
            Some(auth_headers("alice")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let stopped: InstanceResponse = extract_json_body(response).await;
    assert_eq!(stopped.instance.status, InstanceStatus::Stopped);
    assert!(stopped.instance.endpoint.is_none());
    assert!(stopped.instance.launch_handle.is_none());
    assert_eq!(backend.terminate_count(), 1);
}

#[tokio::test]
async fn test_failed_start_is_retryable_and_reset_by_stop() {
    let backend = Arc::new(MockBackend::new(BackendKind::Local).with_launch_failure("no capacity"));
    let client = TestClient::with_backend(backend.clone()).await;
    let created = client.create_instance("alice", "editor").await;
    let start_uri = format!("/api/v1/instances/{}/start", created.instance.id);

    let response = client.post_empty(&start_uri, Some(auth_headers("alice"))).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["retryable"], true);

    // Still in error until the owner resets it
    backend.set_launch_failure(None);
    let response = client.post_empty(&start_uri, Some(auth_headers("alice"))).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = client
        .post_empty(
            &format!("/api/v1/instances/{}/stop", created.instance.id),
            Some(auth_headers("alice")),
        )
        .await;
    let reset: InstanceResponse = extract_json_body(response).await;
    assert_eq!(reset.instance.status, InstanceStatus::Stopped);

    let response = client.post_empty(&start_uri, Some(auth_headers("alice"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(backend.launch_count(), 2);
}

#[tokio::test]
async fn test_endpoint_timeout_maps_to_gateway_timeout() {
    let backend =
        Arc::new(MockBackend::new(BackendKind::Local).with_deferred_endpoint(None));
    let client = TestClient::with_backend(backend.clone()).await;
    let created = client.create_instance("alice", "editor").await;

    let response = client
        .post_empty(
            &format!("/api/v1/instances/{}/start", created.instance.id),
            Some(auth_headers("alice")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

    // The launched workload was cleaned up
    assert_eq!(backend.terminate_count(), 1);
}

#[tokio::test]
async fn test_heartbeat_updates_last_active() {
    let (client, _) = TestClient::new().await;
    let running = client.running_instance("alice", "editor").await;
    let id = running.instance.id;

    client.harness.clock.advance(chrono::Duration::minutes(30));
    let response = client
        .post_empty(
            &format!("/api/v1/instances/{id}/heartbeat"),
            Some(auth_headers("alice")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client
        .get(&format!("/api/v1/instances/{id}"), Some(auth_headers("alice")))
        .await;
    let touched: InstanceResponse = extract_json_body(response).await;
    assert_eq!(touched.instance.last_active_at, client.harness.clock.now());
}

#[tokio::test]
async fn test_heartbeat_from_another_user_is_forbidden() {
    let (client, _) = TestClient::new().await;
    let running = client.running_instance("alice", "editor").await;

    let response = client
        .post_empty(
            &format!("/api/v1/instances/{}/heartbeat", running.instance.id),
            Some(auth_headers("bob")),
        )
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_health_endpoints() {
    let (client, _) = TestClient::new().await;

    let response = client.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["service"], "ws-api");

    let response = client.get("/health/ready", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["database"], "connected");
}
