//! Managed cloud-account backend.
//!
//! Instead of running a workload this backend provisions a scoped sandbox
//! session and hands back a pre-authenticated console URL that expires on its
//! own. Terminating is a best-effort revoke.

use crate::endpoint::{Endpoint, LaunchHandle};
use crate::error::{ProviderError, Result};
use crate::http::{check, join_url};
use crate::kind::BackendKind;
use crate::{BackendAdapter, LaunchRequest, Launched, TerminateOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSession {
    pub account_ref: String,
    pub console_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRequest {
    pub account_name: String,
    pub instance_id: String,
    pub owner_id: String,
    pub lifetime_seconds: u64,
}

#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn create_session(&self, request: &SessionRequest) -> Result<AccountSession>;

    /// Returns `false` when the account or session no longer exists.
    async fn revoke(&self, account_ref: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub session_lifetime: Duration,
    /// Sandbox account names are `<prefix><instance id>`.
    pub account_prefix: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            session_lifetime: Duration::from_secs(3600),
            account_prefix: "ws-".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ManagedAccountBackend {
    api: Arc<dyn AccountApi>,
    config: AccountConfig,
}

impl ManagedAccountBackend {
    pub fn new(api: Arc<dyn AccountApi>, config: AccountConfig) -> Self {
        Self { api, config }
    }
}

#[async_trait]
impl BackendAdapter for ManagedAccountBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ManagedAccount
    }

    #[instrument(skip(self, request), fields(instance_id = %request.instance_id))]
    async fn launch(&self, request: &LaunchRequest) -> Result<Launched> {
        let session = self
            .api
            .create_session(&SessionRequest {
                account_name: format!("{}{}", self.config.account_prefix, request.instance_id),
                instance_id: request.instance_id.clone(),
                owner_id: request.owner_id.clone(),
                lifetime_seconds: self.config.session_lifetime.as_secs(),
            })
            .await
            .map_err(|e| ProviderError::Provision(e.to_string()))?;

        info!(
            account = %session.account_ref,
            expires_at = %session.expires_at,
            "Sandbox session issued"
        );

        Ok(Launched {
            handle: LaunchHandle::single(BackendKind::ManagedAccount, session.account_ref),
            endpoint: Some(Endpoint::AccessUrl {
                url: session.console_url,
                expires_at: session.expires_at,
            }),
        })
    }

    async fn terminate(&self, handle: &LaunchHandle) -> Result<TerminateOutcome> {
        let Some(account_ref) = handle.primary() else {
            return Ok(TerminateOutcome::AlreadyGone);
        };

        match self.api.revoke(account_ref).await {
            Ok(true) => Ok(TerminateOutcome::Terminated),
            Ok(false) => Ok(TerminateOutcome::AlreadyGone),
            Err(e) => {
                warn!(%account_ref, error = %e, "Session revoke failed; it will lapse at expiry");
                Ok(TerminateOutcome::Abandoned(e.to_string()))
            }
        }
    }
}

/// JSON client for the account provisioning service.
///
/// Routes: `POST /sessions`, `DELETE /sessions/{account_ref}`.
#[derive(Debug, Clone)]
pub struct HttpAccountApi {
    client: Client,
    base: Url,
}

impl HttpAccountApi {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| {
            ProviderError::Config(format!("invalid account API URL {base_url}: {e}"))
        })?;
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, base })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        join_url(&self.base, segments)
    }
}

#[async_trait]
impl AccountApi for HttpAccountApi {
    async fn create_session(&self, request: &SessionRequest) -> Result<AccountSession> {
        let response = self
            .client
            .post(self.url(&["sessions"])?)
            .json(request)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn revoke(&self, account_ref: &str) -> Result<bool> {
        let response = self
            .client
            .delete(self.url(&["sessions", account_ref])?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }
}
