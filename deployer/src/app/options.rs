//! Application configuration options

use std::time::Duration;

use crate::deploy::tool::ToolBinaries;
use crate::deploy::{manager, worker};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::janitor;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// Deployment execution
    pub deployments: DeploymentOptions,

    /// Janitor worker options
    pub janitor: janitor::Options,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let worker = worker::Options::default();
        let janitor = janitor::Options {
            retention: worker.workdir_retention,
            ..janitor::Options::default()
        };

        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::new(&settings.work_dir),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            deployments: DeploymentOptions {
                manager: manager::Options {
                    default_timeout: Duration::from_secs(settings.default_timeout_minutes * 60),
                    max_concurrent: settings.max_concurrent_deployments.filter(|n| *n > 0),
                    ..manager::Options::default()
                },
                worker,
                binaries: ToolBinaries {
                    terraform: settings.tools.terraform_bin.clone(),
                    tofu: settings.tools.tofu_bin.clone(),
                },
                git_bin: settings.tools.git_bin.clone(),
                registry_host: settings.registry_host.clone().filter(|h| !h.trim().is_empty()),
                use_pty: settings.use_pty,
            },
            janitor,
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
        }
    }
}

/// Deployment execution options
#[derive(Debug, Clone)]
pub struct DeploymentOptions {
    pub manager: manager::Options,

    pub worker: worker::Options,

    /// terraform / tofu binaries
    pub binaries: ToolBinaries,

    pub git_bin: String,

    /// Private registry base URL
    pub registry_host: Option<String>,

    /// PTY execution instead of plain pipes
    pub use_pty: bool,
}
