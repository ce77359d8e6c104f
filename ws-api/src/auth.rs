use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use ws_orchestrator::Principal;

/// Identity headers in order of trust.
pub const USER_HEADERS: [&str; 3] = ["x-ws-user", "x-forwarded-user", "x-user"];

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub username: String,
    pub email: Option<String>,
}

impl AuthenticatedUser {
    pub fn principal(&self) -> Principal {
        Principal::owner(self.username.clone())
    }
}

fn header_value<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Auth middleware - trusts the identity set by the authenticating proxy
/// in front of this service.
///
/// `x-user` is the local development fallback.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let username = USER_HEADERS
        .iter()
        .find_map(|name| header_value(&req, name))
        .map(String::from)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let email = header_value(&req, "x-ws-email")
        .or_else(|| header_value(&req, "x-forwarded-email"))
        .map(String::from);

    req.extensions_mut()
        .insert(AuthenticatedUser { username, email });

    Ok(next.run(req).await)
}
