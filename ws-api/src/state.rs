use axum::body::Body;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use ws_orchestrator::InstanceOrchestrator;

pub type ProxyClient = Client<HttpConnector, Body>;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<InstanceOrchestrator>,
    pub proxy: ProxyClient,
}

impl AppState {
    pub fn new(orchestrator: Arc<InstanceOrchestrator>) -> Self {
        let proxy = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            orchestrator,
            proxy,
        }
    }
}
