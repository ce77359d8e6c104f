//! Traffic router: forwards `/workspaces/<target>/...` to the instance behind it.
//!
//! Network endpoints are reverse-proxied with the routing prefix stripped, so
//! the workload sees root-relative paths. Bodies are streamed both ways and
//! `Connection: upgrade` requests are tunnelled once both sides switch
//! protocols. Access-URL endpoints get a temporary redirect instead.

use crate::{
    auth::AuthenticatedUser,
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri, Version},
    response::{IntoResponse, Redirect, Response},
    routing::any,
    Extension, Router,
};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, warn};
use ws_orchestrator::Route;

const PREFIX: &str = "/workspaces/";

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/workspaces/{target}", any(proxy))
        .route("/workspaces/{target}/", any(proxy))
        .route("/workspaces/{target}/{*rest}", any(proxy))
}

async fn proxy(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    mut req: Request,
) -> ApiResult<Response> {
    let path = req.uri().path().to_string();
    let (target, rest) = split_path(&path)
        .ok_or_else(|| ApiError::BadRequest(format!("not a workspace path: {path}")))?;

    let (address, port) = match state.orchestrator.route(&user.principal(), target).await? {
        Route::Redirect { url } => return Ok(Redirect::temporary(&url).into_response()),
        Route::Proxy { address, port } => (address, port),
    };

    let uri = upstream_uri(&address, port, rest, req.uri().query())?;
    let upgrade = upgrade_protocol(req.headers());
    let client_upgrade = upgrade.is_some().then(|| hyper::upgrade::on(&mut req));
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let (mut parts, body) = req.into_parts();
    let original_host = parts.headers.get(header::HOST).cloned();
    strip_hop_by_hop(&mut parts.headers);
    add_forwarded(
        &mut parts.headers,
        original_host,
        peer,
        &format!("{PREFIX}{target}"),
    );
    if let Some(protocol) = upgrade {
        parts
            .headers
            .insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
        parts.headers.insert(header::UPGRADE, protocol);
    }
    if let Ok(host) = HeaderValue::from_str(&authority(&address, port)) {
        parts.headers.insert(header::HOST, host);
    }
    parts.uri = uri;
    parts.version = Version::HTTP_11;

    debug!(instance = %target, upstream = %parts.uri, method = %parts.method, "Forwarding request");
    let mut response = state
        .proxy
        .request(Request::from_parts(parts, body))
        .await
        .map_err(|e| ApiError::BadGateway(e.to_string()))?;

    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        if let Some(client_upgrade) = client_upgrade {
            let upstream_upgrade = hyper::upgrade::on(&mut response);
            tokio::spawn(tunnel(client_upgrade, upstream_upgrade));
        }
        let (parts, _) = response.into_parts();
        return Ok(Response::from_parts(parts, Body::empty()));
    }

    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Ok(Response::from_parts(parts, Body::new(body)))
}

async fn tunnel(client: OnUpgrade, upstream: OnUpgrade) {
    let (client, upstream) = match tokio::try_join!(client, upstream) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "Protocol upgrade failed");
            return;
        }
    };

    let mut client = TokioIo::new(client);
    let mut upstream = TokioIo::new(upstream);
    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((sent, received)) => debug!(sent, received, "Upgraded connection closed"),
        Err(e) => debug!(error = %e, "Upgraded connection aborted"),
    }
}

/// Splits a raw request path into the routing target and the remainder
/// without its leading slash.
fn split_path(path: &str) -> Option<(&str, &str)> {
    let tail = path.strip_prefix(PREFIX)?;
    let (target, rest) = tail.split_once('/').unwrap_or((tail, ""));
    (!target.is_empty()).then_some((target, rest))
}

fn authority(address: &str, port: u16) -> String {
    if address.contains(':') {
        format!("[{address}]:{port}")
    } else {
        format!("{address}:{port}")
    }
}

fn upstream_uri(address: &str, port: u16, rest: &str, query: Option<&str>) -> ApiResult<Uri> {
    let mut uri = format!("http://{}/{rest}", authority(address, port));
    if let Some(query) = query {
        uri.push('?');
        uri.push_str(query);
    }
    uri.parse()
        .map_err(|e| ApiError::BadGateway(format!("invalid upstream URI {uri}: {e}")))
}

fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn upgrade_protocol(headers: &HeaderMap) -> Option<HeaderValue> {
    connection_tokens(headers)
        .iter()
        .any(|token| token == "upgrade")
        .then(|| headers.get(header::UPGRADE).cloned())
        .flatten()
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in connection_tokens(headers) {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn add_forwarded(
    headers: &mut HeaderMap,
    host: Option<HeaderValue>,
    peer: Option<IpAddr>,
    prefix: &str,
) {
    if let Some(host) = host {
        headers.insert("x-forwarded-host", host);
    }
    if !headers.contains_key("x-forwarded-proto") {
        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
    }
    if let Ok(prefix) = HeaderValue::from_str(prefix) {
        headers.insert("x-forwarded-prefix", prefix);
    }
    if let Some(ip) = peer {
        let chain = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip.to_string(),
        };
        if let Ok(chain) = HeaderValue::from_str(&chain) {
            headers.insert("x-forwarded-for", chain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/workspaces/abc"), Some(("abc", "")));
        assert_eq!(split_path("/workspaces/abc/"), Some(("abc", "")));
        assert_eq!(
            split_path("/workspaces/abc:api/v1/items"),
            Some(("abc:api", "v1/items"))
        );
        assert_eq!(split_path("/workspaces/"), None);
        assert_eq!(split_path("/other/abc"), None);
    }

    #[test]
    fn test_upstream_uri_keeps_query() {
        let uri = upstream_uri("10.0.0.7", 8443, "lab/tree", Some("token=x&a=1")).unwrap();
        assert_eq!(uri.to_string(), "http://10.0.0.7:8443/lab/tree?token=x&a=1");

        let uri = upstream_uri("::1", 80, "", None).unwrap();
        assert_eq!(uri.to_string(), "http://[::1]:80/");
    }

    #[test]
    fn test_hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn test_upgrade_needs_connection_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        assert_eq!(upgrade_protocol(&headers), None);

        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert_eq!(
            upgrade_protocol(&headers),
            Some(HeaderValue::from_static("websocket"))
        );
    }

    #[test]
    fn test_forwarded_for_appends_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));

        add_forwarded(
            &mut headers,
            Some(HeaderValue::from_static("ws.example.test")),
            Some(IpAddr::from([10, 1, 2, 3])),
            "/workspaces/abc",
        );

        assert_eq!(headers["x-forwarded-for"], "203.0.113.9, 10.1.2.3");
        assert_eq!(headers["x-forwarded-host"], "ws.example.test");
        assert_eq!(headers["x-forwarded-prefix"], "/workspaces/abc");
        assert_eq!(headers["x-forwarded-proto"], "http");
    }
}
