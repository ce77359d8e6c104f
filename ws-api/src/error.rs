use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use ws_orchestrator::OrchestratorError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Upstream request failed: {0}")]
    BadGateway(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Orchestrator(err) => match err {
                OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
                OrchestratorError::Forbidden(_) => StatusCode::FORBIDDEN,
                OrchestratorError::InvalidTransition { .. } | OrchestratorError::Conflict(_) => {
                    StatusCode::CONFLICT
                }
                OrchestratorError::Unavailable(_)
                | OrchestratorError::Provision(_)
                | OrchestratorError::InstanceFailed { .. }
                | OrchestratorError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
                OrchestratorError::EndpointResolution(_) => StatusCode::BAD_GATEWAY,
                OrchestratorError::EndpointTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                OrchestratorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn retryable(&self) -> bool {
        match self {
            ApiError::Orchestrator(err) => err.is_retryable(),
            ApiError::BadGateway(_) => true,
            ApiError::BadRequest(_) => false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self, "Request failed");
        }

        let body = json!({
            "error": self.to_string(),
            "retryable": self.retryable(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ws_orchestrator::InstanceStatus;

    fn status_of(err: OrchestratorError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_orchestrator_errors_map_to_status() {
        assert_eq!(
            status_of(OrchestratorError::NotFound("a".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(OrchestratorError::Forbidden("a".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(OrchestratorError::InvalidTransition {
                from: InstanceStatus::Stopping,
                action: "start",
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(OrchestratorError::EndpointTimeout { attempts: 8 }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(OrchestratorError::EndpointResolution("eni".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(OrchestratorError::Provision("quota".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(OrchestratorError::InvalidInput("ttl".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_retryable_flag_follows_orchestrator() {
        assert!(ApiError::from(OrchestratorError::Provision("quota".into())).retryable());
        assert!(!ApiError::from(OrchestratorError::Forbidden("a".into())).retryable());
    }
}
