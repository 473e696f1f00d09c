//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::DeployerError;
use crate::filesys::dir::Dir;

/// Storage layout for the deployer
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Parent of every per-deployment working directory
    pub fn deployments_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployments"))
    }

    /// Working directory of a single deployment
    pub fn deployment_dir(&self, deployment_id: &str) -> Dir {
        self.deployments_dir().subdir(deployment_id)
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), DeployerError> {
        self.deployments_dir().create().await
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("iac-deployer"))
    }
}
