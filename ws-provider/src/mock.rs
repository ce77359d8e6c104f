//! Scriptable in-memory adapter for exercising the orchestrator without a backend.

use crate::endpoint::{Endpoint, LaunchHandle};
use crate::error::{ProviderError, Result};
use crate::kind::BackendKind;
use crate::resolver::AttachmentProbe;
use crate::{BackendAdapter, LaunchRequest, Launched, TerminateOutcome};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
enum LaunchMode {
    Ready(Endpoint),
    /// No endpoint at launch; the probe attaches after this many lookups, or never.
    Deferred(Option<u32>),
    Fail(String),
}

#[derive(Debug, Clone)]
enum TerminateMode {
    Outcome(TerminateOutcome),
    Fail(String),
}

#[derive(Debug)]
pub struct MockBackend {
    kind: BackendKind,
    launch_mode: Mutex<LaunchMode>,
    terminate_mode: Mutex<TerminateMode>,
    launch_delay: Duration,
    terminate_delay: Duration,
    launches: AtomicUsize,
    discards: AtomicUsize,
    probes: AtomicU32,
    terminated: Mutex<Vec<LaunchHandle>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockBackend {
    /// A backend whose workloads come up at `127.0.0.1:8080` straight away.
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            launch_mode: Mutex::new(LaunchMode::Ready(Endpoint::network("127.0.0.1", 8080))),
            terminate_mode: Mutex::new(TerminateMode::Outcome(TerminateOutcome::Terminated)),
            launch_delay: Duration::ZERO,
            terminate_delay: Duration::ZERO,
            launches: AtomicUsize::new(0),
            discards: AtomicUsize::new(0),
            probes: AtomicU32::new(0),
            terminated: Mutex::new(Vec::new()),
        }
    }

    pub fn with_endpoint(self, endpoint: Endpoint) -> Self {
        *lock(&self.launch_mode) = LaunchMode::Ready(endpoint);
        self
    }

    /// Launch without an endpoint. The probe reports an attachment once it has
    /// been asked `attach_after` times; `None` means it never does.
    pub fn with_deferred_endpoint(self, attach_after: Option<u32>) -> Self {
        *lock(&self.launch_mode) = LaunchMode::Deferred(attach_after);
        self
    }

    pub fn with_launch_failure(self, message: &str) -> Self {
        *lock(&self.launch_mode) = LaunchMode::Fail(message.to_string());
        self
    }

    pub fn with_terminate_failure(self, message: &str) -> Self {
        *lock(&self.terminate_mode) = TerminateMode::Fail(message.to_string());
        self
    }

    pub fn with_terminate_outcome(self, outcome: TerminateOutcome) -> Self {
        *lock(&self.terminate_mode) = TerminateMode::Outcome(outcome);
        self
    }

    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    pub fn with_terminate_delay(mut self, delay: Duration) -> Self {
        self.terminate_delay = delay;
        self
    }

    /// Switch launch behaviour on a backend that is already shared.
    pub fn set_launch_failure(&self, message: Option<&str>) {
        *lock(&self.launch_mode) = match message {
            Some(message) => LaunchMode::Fail(message.to_string()),
            None => LaunchMode::Ready(Endpoint::network("127.0.0.1", 8080)),
        };
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn discard_count(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }

    pub fn terminate_count(&self) -> usize {
        lock(&self.terminated).len()
    }

    pub fn terminated_handles(&self) -> Vec<LaunchHandle> {
        lock(&self.terminated).clone()
    }
}

#[async_trait]
impl BackendAdapter for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<Launched> {
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }

        let mode = lock(&self.launch_mode).clone();
        let n = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = LaunchHandle::single(self.kind, format!("mock-{}-{n}", request.instance_id));

        match mode {
            LaunchMode::Ready(endpoint) => Ok(Launched {
                handle,
                endpoint: Some(endpoint),
            }),
            LaunchMode::Deferred(_) => {
                self.probes.store(0, Ordering::SeqCst);
                Ok(Launched {
                    handle,
                    endpoint: None,
                })
            }
            LaunchMode::Fail(message) => Err(ProviderError::Provision(message)),
        }
    }

    async fn terminate(&self, handle: &LaunchHandle) -> Result<TerminateOutcome> {
        if !self.terminate_delay.is_zero() {
            tokio::time::sleep(self.terminate_delay).await;
        }

        lock(&self.terminated).push(handle.clone());
        match lock(&self.terminate_mode).clone() {
            TerminateMode::Outcome(outcome) => Ok(outcome),
            TerminateMode::Fail(message) => Err(ProviderError::Terminate(message)),
        }
    }

    async fn discard(&self, _request: &LaunchRequest) -> Result<()> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn attachment_probe(&self) -> Option<&dyn AttachmentProbe> {
        Some(self)
    }
}

#[async_trait]
impl AttachmentProbe for MockBackend {
    async fn find_attachment(&self, handle: &LaunchHandle) -> Result<Option<String>> {
        let seen = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        let attach_after = match &*lock(&self.launch_mode) {
            LaunchMode::Deferred(attach_after) => *attach_after,
            _ => Some(1),
        };

        Ok(match attach_after {
            Some(after) if seen >= after => handle.primary().map(|id| format!("att-{id}")),
            _ => None,
        })
    }

    async fn resolve_address(&self, _attachment: &str) -> Result<String> {
        Ok("10.0.0.7".to_string())
    }
}
