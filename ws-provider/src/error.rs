//! Error types for backend adapter operations.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by backend adapters and the endpoint resolver.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The backend could not launch the workload (quota, missing image or
    /// task definition, network setup).
    #[error("Provisioning failed: {0}")]
    Provision(String),

    /// The workload launched but never reported a network attachment.
    #[error("Endpoint not found after {attempts} attempts")]
    EndpointTimeout { attempts: u32 },

    /// An attachment was reported but could not be turned into an address.
    #[error("Endpoint resolution failed: {0}")]
    EndpointResolution(String),

    /// Terminating a workload failed for a reason other than it being gone.
    #[error("Terminate failed: {0}")]
    Terminate(String),

    /// An external call did not finish before its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The control plane answered with an error status.
    #[error("Control plane error: {0}")]
    Api(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_yaml_ng::Error> for ProviderError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        ProviderError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
