//! Settings file management

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Deployer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs
    #[serde(default)]
    pub log_json: bool,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// HTTP listener configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Base directory holding per-deployment working directories
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Base URL of the private module/provider registry
    #[serde(default)]
    pub registry_host: Option<String>,

    /// External binaries
    #[serde(default)]
    pub tools: ToolSettings,

    /// Upper bound on concurrently executing deployments; unbounded when unset
    #[serde(default)]
    pub max_concurrent_deployments: Option<usize>,

    /// Run tools under a pseudo-terminal (false uses plain pipes)
    #[serde(default = "default_true")]
    pub use_pty: bool,

    /// Tool timeout applied when a request does not set one
    #[serde(default = "default_timeout_minutes")]
    pub default_timeout_minutes: u64,
}

fn default_true() -> bool {
    true
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("iac-deployer")
}

fn default_timeout_minutes() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            work_dir: default_work_dir(),
            registry_host: None,
            tools: ToolSettings::default(),
            max_concurrent_deployments: None,
            use_pty: true,
            default_timeout_minutes: default_timeout_minutes(),
        }
    }
}

impl Settings {
    /// Load settings from an optional JSON file, then apply environment overrides
    pub async fn load(path: Option<&Path>) -> Result<Self, DeployerError> {
        let mut settings = match path {
            Some(path) => File::new(path).read_json::<Settings>().await.map_err(|e| {
                DeployerError::ConfigError(format!(
                    "unable to read settings file {}: {}",
                    path.display(),
                    e
                ))
            })?,
            None => Settings::default(),
        };
        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Apply `DEPLOYER_*` / `REGISTRY_HOST` overrides from `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), DeployerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DEPLOYER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("DEPLOYER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| DeployerError::ConfigError(format!("invalid DEPLOYER_PORT: {}", port)))?;
        }
        if let Some(dir) = lookup("DEPLOYER_WORK_DIR") {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(host) = lookup("REGISTRY_HOST") {
            let host = host.trim().to_string();
            self.registry_host = if host.is_empty() { None } else { Some(host) };
        }
        if let Some(level) = lookup("DEPLOYER_LOG_LEVEL") {
            self.log_level = level.parse().map_err(DeployerError::ConfigError)?;
        }
        if let Some(max) = lookup("DEPLOYER_MAX_CONCURRENT") {
            let max: usize = max.parse().map_err(|_| {
                DeployerError::ConfigError(format!("invalid DEPLOYER_MAX_CONCURRENT: {}", max))
            })?;
            self.max_concurrent_deployments = if max == 0 { None } else { Some(max) };
        }
        if let Some(use_pty) = lookup("DEPLOYER_USE_PTY") {
            self.use_pty = matches!(use_pty.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8090
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Names or paths of the external binaries the deployer drives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_terraform_bin")]
    pub terraform_bin: String,

    #[serde(default = "default_tofu_bin")]
    pub tofu_bin: String,

    #[serde(default = "default_git_bin")]
    pub git_bin: String,
}

fn default_terraform_bin() -> String {
    "terraform".to_string()
}

fn default_tofu_bin() -> String {
    "tofu".to_string()
}

fn default_git_bin() -> String {
    "git".to_string()
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            terraform_bin: default_terraform_bin(),
            tofu_bin: default_tofu_bin(),
            git_bin: default_git_bin(),
        }
    }
}
