//! Deployment store

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::deploy::handle::DeploymentHandle;
use crate::errors::DeployerError;

/// Lookup of deployments by ID. Implementations must tolerate concurrent use.
pub trait DeploymentStore: Send + Sync {
    /// Store a new deployment; IDs are never reused
    fn insert(&self, handle: Arc<DeploymentHandle>) -> Result<(), DeployerError>;

    /// Get a deployment by ID
    fn get(&self, deployment_id: &str) -> Option<Arc<DeploymentHandle>>;
}

/// Process-local store. Records live until the process exits.
#[derive(Default)]
pub struct InMemoryDeploymentStore {
    entries: RwLock<HashMap<String, Arc<DeploymentHandle>>>,
}

impl InMemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeploymentStore for InMemoryDeploymentStore {
    fn insert(&self, handle: Arc<DeploymentHandle>) -> Result<(), DeployerError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(handle.id()) {
            return Err(DeployerError::Conflict(format!(
                "deployment {} already exists",
                handle.id()
            )));
        }
        entries.insert(handle.id().to_string(), handle);
        Ok(())
    }

    fn get(&self, deployment_id: &str) -> Option<Arc<DeploymentHandle>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(deployment_id).cloned()
    }
}
