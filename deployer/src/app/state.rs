//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::cache::deployments::{DeploymentStore, InMemoryDeploymentStore};
use crate::deploy::git::GitCloner;
use crate::deploy::manager::DeploymentManager;
use crate::deploy::process::{PipeExecutor, ProcessExecutor, PtyExecutor};
use crate::deploy::registry_config::RegistryConfigurator;
use crate::deploy::tool::ToolRunner;
use crate::deploy::worker::DeploymentWorker;
use crate::errors::DeployerError;

/// Main application state
pub struct AppState {
    /// Deployment registry and worker launcher
    pub manager: Arc<DeploymentManager>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, DeployerError> {
        info!("Initializing application state...");

        options.layout.setup().await?;

        let deployments = &options.deployments;
        let executor: Arc<dyn ProcessExecutor> = if deployments.use_pty {
            Arc::new(PtyExecutor)
        } else {
            Arc::new(PipeExecutor)
        };

        let registry = match &deployments.registry_host {
            Some(host) => {
                let configurator = RegistryConfigurator::new(host)?;
                info!("Private registry configured: {}", configurator.hostname());
                Some(configurator)
            }
            None => None,
        };

        let worker = Arc::new(DeploymentWorker::new(
            deployments.worker.clone(),
            options.layout.clone(),
            Arc::new(GitCloner::new(deployments.git_bin.clone())),
            ToolRunner::new(executor, deployments.binaries.clone()),
            registry,
        ));

        let store: Arc<dyn DeploymentStore> = Arc::new(InMemoryDeploymentStore::default());
        let manager = Arc::new(DeploymentManager::new(
            deployments.manager.clone(),
            store,
            worker,
        ));

        Ok(Self { manager })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), DeployerError> {
        info!("Shutting down application state...");
        Ok(())
    }
}
