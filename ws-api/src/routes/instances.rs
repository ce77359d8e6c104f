use crate::{auth::AuthenticatedUser, error::ApiResult, state::AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ws_orchestrator::Instance;
use ws_provider::WorkspaceKind;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/instances",
            get(list_instances).post(create_instance),
        )
        .route("/api/v1/instances/{id}", get(get_instance))
        .route("/api/v1/instances/{id}/start", post(start_instance))
        .route("/api/v1/instances/{id}/stop", post(stop_instance))
        .route("/api/v1/instances/{id}/heartbeat", post(heartbeat))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub kind: WorkspaceKind,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// An instance as returned to its owner, with the path its traffic goes through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceResponse {
    #[serde(flatten)]
    pub instance: Instance,
    pub access_path: String,
}

impl From<Instance> for InstanceResponse {
    fn from(instance: Instance) -> Self {
        let access_path = format!("/workspaces/{}", instance.id);
        Self {
            instance,
            access_path,
        }
    }
}

async fn create_instance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateInstanceRequest>,
) -> ApiResult<(StatusCode, Json<InstanceResponse>)> {
    let instance = state
        .orchestrator
        .create(
            &user.principal(),
            req.kind,
            req.ttl_seconds.map(Duration::from_secs),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(instance.into())))
}

async fn list_instances(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Vec<InstanceResponse>>> {
    let instances = state.orchestrator.list(&user.username).await?;
    Ok(Json(instances.into_iter().map(Into::into).collect()))
}

async fn get_instance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceResponse>> {
    let instance = state.orchestrator.get(&user.principal(), &id).await?;
    Ok(Json(instance.into()))
}

async fn start_instance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceResponse>> {
    let instance = state.orchestrator.start(&user.principal(), &id).await?;
    Ok(Json(instance.into()))
}

async fn stop_instance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceResponse>> {
    let instance = state.orchestrator.stop(&user.principal(), &id).await?;
    Ok(Json(instance.into()))
}

async fn heartbeat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.orchestrator.heartbeat(&user.principal(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
