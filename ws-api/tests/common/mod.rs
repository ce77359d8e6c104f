//! Common test utilities and helpers for ws-api tests

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use std::sync::Arc;
use tower::ServiceExt;
use ws_api::routes::instances::InstanceResponse;
use ws_orchestrator::test_utils::{harness, local_mock, TestHarness};
use ws_provider::mock::MockBackend;

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: Response<Body>) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

/// Helper to create authenticated request headers
pub fn auth_headers(username: &str) -> Vec<(&'static str, &str)> {
    vec![("x-user", username)]
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
    pub harness: TestHarness,
}

impl TestClient {
    /// App over a fresh in-memory database with a local mock backend.
    pub async fn new() -> (Self, Arc<MockBackend>) {
        let backend = local_mock();
        let client = Self::with_backend(backend.clone()).await;
        (client, backend)
    }

    pub async fn with_backend(backend: Arc<MockBackend>) -> Self {
        let harness = harness(backend).await;
        let app = ws_api::create_app(harness.orchestrator.clone());
        Self { app, harness }
    }

    /// Send a request to the API
    pub async fn send_request(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Post JSON to an endpoint
    pub async fn post<T: serde::Serialize>(
        &self,
        uri: &str,
        body: &T,
        headers: Option<Vec<(&str, &str)>>,
    ) -> Response<Body> {
        let req_body = serde_json::to_string(body).expect("Failed to serialize request body");
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");

        for (k, v) in headers.unwrap_or_default() {
            builder = builder.header(k, v);
        }

        let request = builder.body(Body::from(req_body)).unwrap();
        self.send_request(request).await
    }

    /// Post without a body, as the lifecycle actions expect
    pub async fn post_empty(
        &self,
        uri: &str,
        headers: Option<Vec<(&str, &str)>>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);

        for (k, v) in headers.unwrap_or_default() {
            builder = builder.header(k, v);
        }

        let request = builder.body(Body::empty()).unwrap();
        self.send_request(request).await
    }

    /// Get request to an endpoint
    pub async fn get(&self, uri: &str, headers: Option<Vec<(&str, &str)>>) -> Response<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);

        for (k, v) in headers.unwrap_or_default() {
            builder = builder.header(k, v);
        }

        let request = builder.body(Body::empty()).unwrap();
        self.send_request(request).await
    }

    /// Create an instance of `kind` for `user` through the API
    pub async fn create_instance(&self, user: &str, kind: &str) -> InstanceResponse {
        let response = self
            .post(
                "/api/v1/instances",
                &serde_json::json!({ "kind": kind }),
                Some(auth_headers(user)),
            )
            .await;
        assert_eq!(response.status(), axum::http::StatusCode::CREATED);
        extract_json_body(response).await
    }

    /// Create and start an instance for `user`
    pub async fn running_instance(&self, user: &str, kind: &str) -> InstanceResponse {
        let created = self.create_instance(user, kind).await;
        let response = self
            .post_empty(
                &format!("/api/v1/instances/{}/start", created.instance.id),
                Some(auth_headers(user)),
            )
            .await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        extract_json_body(response).await
    }
}
