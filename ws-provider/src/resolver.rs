//! Bounded discovery of a launched workload's network address.
//!
//! Cluster tasks come up without an address; the backend attaches a network
//! interface some time after launch. The resolver polls for that attachment
//! under a fixed attempt budget so the worst-case latency of a start is known
//! up front, then resolves the attachment to an address exactly once.

use crate::endpoint::{Endpoint, LaunchHandle};
use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Backend-side lookups the resolver drives.
#[async_trait]
pub trait AttachmentProbe: Send + Sync {
    /// Returns the attachment id once the backend reports one.
    async fn find_attachment(&self, handle: &LaunchHandle) -> Result<Option<String>>;

    /// Turns an attachment id into a routable address.
    async fn resolve_address(&self, attachment: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Upper bound for the lightly growing delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            max_delay: delay,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1.5_f64.powi(attempt.saturating_sub(1).min(16) as i32);
        self.delay.mul_f64(factor).min(self.max_delay.max(self.delay))
    }

    /// Total sleep time when every attempt comes back empty.
    pub fn worst_case_wait(&self) -> Duration {
        (1..self.attempts()).map(|a| self.delay_after(a)).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EndpointResolver {
    policy: RetryPolicy,
}

impl EndpointResolver {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Wait for the workload's attachment and resolve it to `address:port`.
    ///
    /// Fails with [`ProviderError::EndpointTimeout`] when the budget runs out
    /// before an attachment shows up, and with
    /// [`ProviderError::EndpointResolution`] when the attachment exists but has
    /// no usable address.
    pub async fn resolve(
        &self,
        probe: &dyn AttachmentProbe,
        handle: &LaunchHandle,
        port: u16,
    ) -> Result<Endpoint> {
        let attachment = self.await_attachment(probe, handle).await?;

        let address = probe
            .resolve_address(&attachment)
            .await
            .map_err(|e| ProviderError::EndpointResolution(format!("{attachment}: {e}")))?;

        if address.trim().is_empty() {
            return Err(ProviderError::EndpointResolution(format!(
                "{attachment}: no address assigned"
            )));
        }

        Ok(Endpoint::network(address, port))
    }

    async fn await_attachment(
        &self,
        probe: &dyn AttachmentProbe,
        handle: &LaunchHandle,
    ) -> Result<String> {
        let attempts = self.policy.attempts();

        for attempt in 1..=attempts {
            match probe.find_attachment(handle).await {
                Ok(Some(attachment)) => {
                    debug!(attempt, %attachment, "Network attachment found");
                    return Ok(attachment);
                }
                Ok(None) => debug!(attempt, "No network attachment yet"),
                Err(e) => warn!(attempt, error = %e, "Task description failed"),
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.delay_after(attempt)).await;
            }
        }

        Err(ProviderError::EndpointTimeout { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::BackendKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProbe {
        calls: AtomicU32,
        ready_on: Option<u32>,
        fail_first: u32,
        address: std::result::Result<String, String>,
    }

    impl ScriptedProbe {
        fn new(ready_on: Option<u32>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                ready_on,
                fail_first: 0,
                address: Ok("10.1.2.3".to_string()),
            }
        }
    }

    #[async_trait]
    impl AttachmentProbe for ScriptedProbe {
        async fn find_attachment(&self, _handle: &LaunchHandle) -> Result<Option<String>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                return Err(ProviderError::CommandFailed("throttled".to_string()));
            }
            Ok(match self.ready_on {
                Some(n) if call >= n => Some("eni-123".to_string()),
                _ => None,
            })
        }

        async fn resolve_address(&self, _attachment: &str) -> Result<String> {
            self.address
                .clone()
                .map_err(ProviderError::CommandFailed)
        }
    }

    fn handle() -> LaunchHandle {
        LaunchHandle::single(BackendKind::ClusterTask, "task/1")
    }

    fn resolver(attempts: u32) -> EndpointResolver {
        EndpointResolver::new(RetryPolicy::fixed(attempts, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let probe = ScriptedProbe::new(Some(3));
        let endpoint = resolver(5).resolve(&probe, &handle(), 8080).await.unwrap();

        assert_eq!(endpoint, Endpoint::network("10.1.2.3", 8080));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhausted_is_timeout() {
        let probe = ScriptedProbe::new(None);
        let err = resolver(4).resolve(&probe, &handle(), 8080).await.unwrap_err();

        assert!(matches!(err, ProviderError::EndpointTimeout { attempts: 4 }));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_describe_errors_consume_budget_but_do_not_abort() {
        let mut probe = ScriptedProbe::new(Some(1));
        probe.fail_first = 2;
        let endpoint = resolver(5).resolve(&probe, &handle(), 8888).await.unwrap();

        assert_eq!(endpoint.socket_for(None), Some(("10.1.2.3".to_string(), 8888)));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_address_failure_is_resolution_error() {
        let mut probe = ScriptedProbe::new(Some(1));
        probe.address = Err("interface deleted".to_string());
        let err = resolver(3).resolve(&probe, &handle(), 8080).await.unwrap_err();

        assert!(matches!(err, ProviderError::EndpointResolution(_)));
    }

    #[tokio::test]
    async fn test_blank_address_is_resolution_error() {
        let mut probe = ScriptedProbe::new(Some(1));
        probe.address = Ok("  ".to_string());
        let err = resolver(3).resolve(&probe, &handle(), 8080).await.unwrap_err();

        assert!(matches!(err, ProviderError::EndpointResolution(_)));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(3));
        assert_eq!(policy.delay_after(9), Duration::from_secs(5));
        assert!(policy.worst_case_wait() <= Duration::from_secs(45));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy::fixed(0, Duration::from_secs(1));
        assert_eq!(policy.worst_case_wait(), Duration::ZERO);
    }
}
