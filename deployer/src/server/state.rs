//! Server state

use std::sync::Arc;

use tokio::sync::watch;

use crate::deploy::manager::DeploymentManager;

/// Server state shared across handlers
pub struct ServerState {
    pub manager: Arc<DeploymentManager>,

    /// Flips to `true` when the server starts shutting down
    pub shutdown: watch::Receiver<bool>,
}

impl ServerState {
    pub fn new(manager: Arc<DeploymentManager>, shutdown: watch::Receiver<bool>) -> Self {
        Self { manager, shutdown }
    }
}
