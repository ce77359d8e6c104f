use crate::instance::{InstanceStatus, TransitionError};
use thiserror::Error;
use ws_provider::ProviderError;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Cannot {action} an instance that is {from}")]
    InvalidTransition {
        from: InstanceStatus,
        action: &'static str,
    },

    #[error("Provisioning failed: {0}")]
    Provision(String),

    #[error("Endpoint not found after {attempts} attempts")]
    EndpointTimeout { attempts: u32 },

    #[error("Endpoint resolution failed: {0}")]
    EndpointResolution(String),

    #[error("Access to instance {0} denied")]
    Forbidden(String),

    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Instance unavailable: {0}")]
    Unavailable(String),

    /// Start was requested on an instance in `Error`; stop it to reset.
    #[error("Instance {id} is in error state: {reason}")]
    InstanceFailed { id: String, reason: String },

    #[error("Backend error: {0}")]
    Backend(String),

    /// Another writer changed the record between read and write.
    #[error("Concurrent update to instance {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Whether the caller may simply try the same operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Provision(_)
                | OrchestratorError::EndpointTimeout { .. }
                | OrchestratorError::EndpointResolution(_)
                | OrchestratorError::InstanceFailed { .. }
                | OrchestratorError::Backend(_)
                | OrchestratorError::Conflict(_)
        )
    }
}

impl From<TransitionError> for OrchestratorError {
    fn from(err: TransitionError) -> Self {
        OrchestratorError::InvalidTransition {
            from: err.from,
            action: err.action,
        }
    }
}

impl From<ProviderError> for OrchestratorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Provision(msg) => OrchestratorError::Provision(msg),
            ProviderError::EndpointTimeout { attempts } => {
                OrchestratorError::EndpointTimeout { attempts }
            }
            ProviderError::EndpointResolution(msg) => OrchestratorError::EndpointResolution(msg),
            other => OrchestratorError::Backend(other.to_string()),
        }
    }
}
