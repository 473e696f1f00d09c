//! Periodic removal of expired deployment working directories

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::errors::DeployerError;
use crate::storage::layout::StorageLayout;

/// Janitor worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between sweeps
    pub interval: Duration,

    /// Minimum age of a working directory before it is removed
    pub retention: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Run the janitor worker. Sweeps once immediately, then every interval.
pub async fn run<S, F>(
    options: &Options,
    layout: &StorageLayout,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Janitor worker starting...");

    loop {
        match sweep(layout, options.retention).await {
            Ok(0) => debug!("Janitor found nothing to remove"),
            Ok(removed) => info!("Janitor removed {} expired working directories", removed),
            Err(e) => error!("Janitor sweep failed: {}", e),
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Janitor worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}

/// Remove every deployment directory at least `retention` old
pub async fn sweep(layout: &StorageLayout, retention: Duration) -> Result<usize, DeployerError> {
    let root = layout.deployments_dir();
    if !root.exists().await {
        return Ok(0);
    }

    let mut removed = 0;
    for dir in root.list_dirs().await? {
        let age = match dir.age().await {
            Ok(age) => age,
            Err(e) => {
                warn!("Skipping {}: {}", dir.path().display(), e);
                continue;
            }
        };
        if age < retention {
            continue;
        }
        match dir.delete().await {
            Ok(true) => {
                debug!("Removed {} (age {:?})", dir.path().display(), age);
                removed += 1;
            }
            Ok(false) => {}
            Err(e) => warn!("Failed to remove {}: {}", dir.path().display(), e),
        }
    }
    Ok(removed)
}
