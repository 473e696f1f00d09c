//! Error types for the deployer

use std::time::Duration;

use thiserror::Error;

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Git clone failed: {0}")]
    CloneError(String),

    #[error("{tool} {subcommand} failed: {reason}")]
    ToolError {
        tool: String,
        subcommand: String,
        reason: String,
    },

    #[error("{tool} {subcommand} timed out after {timeout:?}; process killed")]
    ToolTimeout {
        tool: String,
        subcommand: String,
        timeout: Duration,
    },

    #[error("Process error: {0}")]
    ProcessError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
