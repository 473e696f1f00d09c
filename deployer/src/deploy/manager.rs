//! Admits deployments, spawns their workers and routes control signals

use std::sync::Arc;
use std::time::Duration;

use openapi_server::models::DeployRequest;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::cache::deployments::DeploymentStore;
use crate::deploy::handle::DeploymentHandle;
use crate::deploy::worker::DeploymentWorker;
use crate::errors::DeployerError;
use crate::models::deployment::DeploymentRequest;
use crate::utils::generate_uuid;

/// Deployment manager options
#[derive(Debug, Clone)]
pub struct Options {
    /// Tool timeout used when a request does not set one
    pub default_timeout: Duration,

    /// Per-subscriber live log queue length
    pub live_capacity: usize,

    /// Maximum concurrently executing deployments; `None` is unbounded
    pub max_concurrent: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(60 * 60),
            live_capacity: 1024,
            max_concurrent: None,
        }
    }
}

pub struct DeploymentManager {
    options: Options,
    store: Arc<dyn DeploymentStore>,
    worker: Arc<DeploymentWorker>,
    limiter: Option<Arc<Semaphore>>,
}

impl DeploymentManager {
    pub fn new(options: Options, store: Arc<dyn DeploymentStore>, worker: Arc<DeploymentWorker>) -> Self {
        let limiter = options
            .max_concurrent
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));
        Self {
            options,
            store,
            worker,
            limiter,
        }
    }

    /// Validate `request`, register it and start its worker.
    ///
    /// Returns once the deployment is visible to status queries; execution
    /// continues in the background.
    pub fn create(&self, request: DeployRequest) -> Result<Arc<DeploymentHandle>, DeployerError> {
        let request = DeploymentRequest::from_wire(request, self.options.default_timeout)?;
        let handle = DeploymentHandle::new(generate_uuid(), request, self.options.live_capacity);
        self.store.insert(handle.clone())?;
        info!(
            "Accepted deployment {} ({} @ {})",
            handle.id(),
            handle.request().git_url,
            handle.request().git_ref
        );

        let worker = self.worker.clone();
        let limiter = self.limiter.clone();
        let task_handle = handle.clone();
        tokio::spawn(async move {
            let _permit = match limiter {
                Some(limiter) => match limiter.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(e) => {
                        warn!("Deployment {} could not be scheduled: {}", task_handle.id(), e);
                        task_handle.fail(format!("could not be scheduled: {}", e));
                        return;
                    }
                },
                None => None,
            };
            let run = tokio::spawn({
                let handle = task_handle.clone();
                async move { worker.run(handle).await }
            });
            if let Err(e) = run.await {
                error!("Worker for deployment {} aborted: {}", task_handle.id(), e);
                task_handle.fail(format!("worker aborted: {}", e));
            }
        });

        Ok(handle)
    }

    pub fn get(&self, deployment_id: &str) -> Result<Arc<DeploymentHandle>, DeployerError> {
        self.store.get(deployment_id).ok_or_else(|| {
            DeployerError::NotFound(format!("deployment {} not found", deployment_id))
        })
    }

    pub fn approve(&self, deployment_id: &str) -> Result<Arc<DeploymentHandle>, DeployerError> {
        let handle = self.get(deployment_id)?;
        handle.decide(true)?;
        Ok(handle)
    }

    pub fn reject(&self, deployment_id: &str) -> Result<Arc<DeploymentHandle>, DeployerError> {
        let handle = self.get(deployment_id)?;
        handle.decide(false)?;
        Ok(handle)
    }

    pub fn cancel(&self, deployment_id: &str) -> Result<Arc<DeploymentHandle>, DeployerError> {
        let handle = self.get(deployment_id)?;
        handle.cancel()?;
        Ok(handle)
    }
}
