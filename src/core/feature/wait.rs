//! # Readiness waiter module
//!
//! A generic readiness [`Postcondition`] that polls a `Deployment` at a
//! fixed interval up to a bounded duration, matching the `WaitForPodsToBeReady`
//! waiter named in spec.md §5 (2s interval, 5 minute bound).

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::Api;
use tokio::time::sleep;

use crate::core::context::Context;

use super::{FeatureData, Postcondition};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// -----------------------------------------------------------------------------
// WaitError

#[derive(thiserror::Error, Debug)]
pub enum WaitError {
    #[error("deployment '{0}/{1}' did not become ready within {2:?}")]
    Timeout(String, String, Duration),
    #[error("failed to fetch deployment '{0}/{1}', {2}")]
    Get(String, String, kube::Error),
}

// -----------------------------------------------------------------------------
// WaitForDeploymentReady

/// polls a `Deployment`'s status until `readyReplicas == replicas` (and at
/// least one replica is desired), or the bound elapses.
pub struct WaitForDeploymentReady {
    namespace: String,
    name: String,
    interval: Duration,
    timeout: Duration,
}

impl WaitForDeploymentReady {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn is_ready(deployment: &Deployment) -> bool {
        let Some(status) = &deployment.status else {
            return false;
        };
        let desired = status.replicas.unwrap_or(0);
        let ready = status.ready_replicas.unwrap_or(0);
        desired > 0 && ready >= desired
    }
}

#[async_trait]
impl Postcondition for WaitForDeploymentReady {
    fn name(&self) -> &str {
        "wait-for-deployment-ready"
    }

    async fn check(
        &self,
        ctx: &Context,
        _data: &FeatureData,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let api: Api<Deployment> = Api::namespaced(ctx.kube.clone(), &self.namespace);
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            let deployment = api
                .get(&self.name)
                .await
                .map_err(|err| WaitError::Get(self.namespace.clone(), self.name.clone(), err))?;

            if Self::is_ready(&deployment) {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(Box::new(WaitError::Timeout(
                    self.namespace.clone(),
                    self.name.clone(),
                    self.timeout,
                )));
            }

            sleep(self.interval).await;
        }
    }
}
