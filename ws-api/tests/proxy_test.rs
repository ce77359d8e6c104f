//! Integration tests for the traffic router
//!
//! Upstream workloads are small axum servers on loopback ports; the mock
//! backend hands their address out as the instance endpoint.

mod common;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use common::{auth_headers, extract_json_body, TestClient};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use ws_orchestrator::test_utils::epoch;
use ws_provider::mock::MockBackend;
use ws_provider::{BackendKind, Endpoint};

#[derive(Clone)]
struct Upstream {
    name: &'static str,
    hits: Arc<AtomicUsize>,
}

async fn echo(State(upstream): State<Upstream>, req: Request) -> Json<Value> {
    upstream.hits.fetch_add(1, Ordering::SeqCst);

    let summary = {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        json!({
            "upstream": upstream.name,
            "method": req.method().as_str(),
            "path": req.uri().path(),
            "query": req.uri().query(),
            "host": header("host"),
            "prefix": header("x-forwarded-prefix"),
            "keep_alive": header("keep-alive"),
        })
    };

    let body = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .unwrap();
    let mut summary = summary;
    summary["body"] = Value::String(String::from_utf8_lossy(&body).into_owned());
    Json(summary)
}

/// Switches to a raw byte echo protocol.
async fn upgrade(mut req: Request) -> Response {
    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        let mut io = TokioIo::new(on_upgrade.await.unwrap());
        let mut buf = [0u8; 64];
        loop {
            let n = io.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            io.write_all(&buf[..n]).await.unwrap();
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "upgrade")
        .header(header::UPGRADE, "echo")
        .body(Body::empty())
        .unwrap()
}

async fn spawn_upstream(name: &'static str) -> (u16, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/upgrade", get(upgrade))
        .fallback(echo)
        .with_state(Upstream {
            name,
            hits: hits.clone(),
        });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port, hits)
}

/// A client whose instances come up on a fresh upstream, plus an `api` service.
async fn proxied_client() -> (TestClient, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let (port, hits) = spawn_upstream("primary").await;
    let (api_port, api_hits) = spawn_upstream("api").await;

    let endpoint = Endpoint::Network {
        address: "127.0.0.1".to_string(),
        port,
        services: BTreeMap::from([("api".to_string(), api_port)]),
    };
    let backend = Arc::new(MockBackend::new(BackendKind::Local).with_endpoint(endpoint));
    (TestClient::with_backend(backend).await, hits, api_hits)
}

#[tokio::test]
async fn test_request_is_forwarded_with_prefix_stripped() {
    let (client, hits, _) = proxied_client().await;
    let running = client.running_instance("alice", "editor").await;

    let response = client
        .get(
            &format!("{}/lab/tree?token=abc&x=1", running.access_path),
            Some(auth_headers("alice")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let seen: Value = extract_json_body(response).await;
    assert_eq!(seen["upstream"], "primary");
    assert_eq!(seen["path"], "/lab/tree");
    assert_eq!(seen["query"], "token=abc&x=1");
    assert!(seen["host"].as_str().unwrap().starts_with("127.0.0.1:"));
    assert_eq!(seen["prefix"], running.access_path);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bare_target_maps_to_root() {
    let (client, _, _) = proxied_client().await;
    let running = client.running_instance("alice", "editor").await;

    let response = client
        .get(&running.access_path, Some(auth_headers("alice")))
        .await;
    let seen: Value = extract_json_body(response).await;
    assert_eq!(seen["path"], "/");
}

#[tokio::test]
async fn test_request_body_and_method_are_relayed() {
    let (client, _, _) = proxied_client().await;
    let running = client.running_instance("alice", "editor").await;

    let response = client
        .post(
            &format!("{}/submit", running.access_path),
            &json!({ "cell": 3 }),
            Some(vec![("x-user", "alice"), ("keep-alive", "timeout=5")]),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let seen: Value = extract_json_body(response).await;
    assert_eq!(seen["method"], "POST");
    assert_eq!(seen["body"], r#"{"cell":3}"#);
    assert!(seen["keep_alive"].is_null());
}

#[tokio::test]
async fn test_named_service_is_routed_to_its_port() {
    let (client, primary_hits, api_hits) = proxied_client().await;
    let running = client.running_instance("alice", "relational_db").await;

    let response = client
        .get(
            &format!("/workspaces/{}:api/status", running.instance.id),
            Some(auth_headers("alice")),
        )
        .await;
    let seen: Value = extract_json_body(response).await;
    assert_eq!(seen["upstream"], "api");
    assert_eq!(seen["path"], "/status");
    assert_eq!(api_hits.load(Ordering::SeqCst), 1);
    assert_eq!(primary_hits.load(Ordering::SeqCst), 0);

    let response = client
        .get(
            &format!("/workspaces/{}:metrics/", running.instance.id),
            Some(auth_headers("alice")),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_other_user_is_forbidden_and_nothing_is_proxied() {
    let (client, hits, _) = proxied_client().await;
    let running = client.running_instance("alice", "editor").await;

    let response = client
        .get(
            &format!("{}/secret", running.access_path),
            Some(auth_headers("bob")),
        )
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unauthenticated_request_is_rejected() {
    let (client, hits, _) = proxied_client().await;
    let running = client.running_instance("alice", "editor").await;

    let response = client.get(&running.access_path, None).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stopped_instance_is_unavailable() {
    let (client, hits, _) = proxied_client().await;
    let created = client.create_instance("alice", "editor").await;

    let response = client
        .get(&created.access_path, Some(auth_headers("alice")))
        .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    // Bind and drop a listener to get a port nothing listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let backend = Arc::new(
        MockBackend::new(BackendKind::Local).with_endpoint(Endpoint::network("127.0.0.1", port)),
    );
    let client = TestClient::with_backend(backend).await;
    let running = client.running_instance("alice", "editor").await;

    let response = client
        .get(&running.access_path, Some(auth_headers("alice")))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["retryable"], true);
}

#[tokio::test]
async fn test_access_url_is_redirected_until_expiry() {
    let url = "https://signin.example.test/console?token=abc";
    let backend = Arc::new(MockBackend::new(BackendKind::ManagedAccount).with_endpoint(
        Endpoint::AccessUrl {
            url: url.to_string(),
            expires_at: epoch() + chrono::Duration::hours(1),
        },
    ));
    let client = TestClient::with_backend(backend).await;
    let running = client.running_instance("alice", "cloud_account").await;

    let response = client
        .get(&running.access_path, Some(auth_headers("alice")))
        .await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()[header::LOCATION], url);

    client.harness.clock.advance(chrono::Duration::minutes(61));
    let response = client
        .get(&running.access_path, Some(auth_headers("alice")))
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_upgrade_is_tunnelled() {
    let (client, _, _) = proxied_client().await;
    let running = client.running_instance("alice", "editor").await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = ws_api::create_app(client.harness.orchestrator.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {}/upgrade HTTP/1.1\r\nHost: {addr}\r\nx-user: alice\r\n\
         Connection: Upgrade\r\nUpgrade: echo\r\n\r\n",
        running.access_path
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 101"), "unexpected response: {head}");

    stream.write_all(b"ping").await.unwrap();
    let mut reply = [0u8; 4];
    tokio::time::timeout(std::time::Duration::from_secs(5), stream.read_exact(&mut reply))
        .await
        .expect("echo should arrive")
        .unwrap();
    assert_eq!(&reply, b"ping");
}
