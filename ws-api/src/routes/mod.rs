pub mod health;
pub mod instances;
pub mod proxy;

use crate::{auth::auth_middleware, state::AppState};
use axum::{middleware, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use ws_orchestrator::InstanceOrchestrator;

pub fn create_app(orchestrator: Arc<InstanceOrchestrator>) -> Router {
    let state = AppState::new(orchestrator);

    // Allow CORS for browser clients served from another origin
    let cors = CorsLayer::permissive();

    Router::new()
        .merge(health::routes()) // Health routes don't need auth
        .merge(
            instances::routes()
                .merge(proxy::routes())
                .layer(middleware::from_fn(auth_middleware)),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
